//! AWS Credentials
//!
//! Credentials used to sign Secrets Manager requests, and the providers that
//! source them: environment variables, the ECS container endpoint and the EC2
//! instance metadata service, tried in that order behind a refreshing cache.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::core::{Clock, HttpMethod, HttpRequest, HttpTransport, SystemClock};
use crate::error::{LifecycleError, StorageError};

pub const AWS_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const AWS_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
pub const AWS_SESSION_TOKEN: &str = "AWS_SESSION_TOKEN";
pub const AWS_CONTAINER_CREDENTIALS_RELATIVE_URI: &str = "AWS_CONTAINER_CREDENTIALS_RELATIVE_URI";
pub const AWS_CONTAINER_CREDENTIALS_FULL_URI: &str = "AWS_CONTAINER_CREDENTIALS_FULL_URI";
pub const AWS_CONTAINER_AUTHORIZATION_TOKEN: &str = "AWS_CONTAINER_AUTHORIZATION_TOKEN";
pub const AWS_EC2_METADATA_DISABLED: &str = "AWS_EC2_METADATA_DISABLED";

/// Link-local host serving ECS task role credentials.
const CONTAINER_ENDPOINT: &str = "http://169.254.170.2";
const IMDS_ENDPOINT: &str = "http://169.254.169.254";
const IMDS_TOKEN_TTL_HEADER: &str = "x-aws-ec2-metadata-token-ttl-seconds";
const IMDS_TOKEN_HEADER: &str = "x-aws-ec2-metadata-token";
const IMDS_TOKEN_TTL_SECS: &str = "21600";
const METADATA_TIMEOUT: Duration = Duration::from_secs(2);

/// Cached credentials without an expiry are re-sourced after this long.
const DEFAULT_CACHE_TTL_SECS: i64 = 900;
/// Expiring credentials are replaced this long before they lapse.
const DEFAULT_REFRESH_BUFFER_SECS: i64 = 300;

/// AWS credentials used to sign requests.
#[derive(Clone)]
pub struct AwsCredentials {
    access_key_id: String,
    secret_access_key: SecretString,
    session_token: Option<SecretString>,
    expiration: Option<DateTime<Utc>>,
}

impl AwsCredentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: SecretString::new(secret_access_key.into()),
            session_token: None,
            expiration: None,
        }
    }

    /// Attach a session token for temporary credentials.
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(SecretString::new(token.into()));
        self
    }

    /// Mark temporary credentials with their expiry.
    pub fn with_expiration(mut self, expiration: DateTime<Utc>) -> Self {
        self.expiration = Some(expiration);
        self
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        self.expiration
    }

    pub(crate) fn secret_access_key(&self) -> &str {
        self.secret_access_key.expose_secret()
    }

    pub(crate) fn session_token(&self) -> Option<&str> {
        self.session_token.as_ref().map(|t| t.expose_secret().as_str())
    }
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field("session_token", &self.session_token.as_ref().map(|_| "[REDACTED]"))
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// Source of AWS credentials.
#[async_trait]
pub trait AwsCredentialProvider: Send + Sync {
    async fn credentials(&self) -> Result<AwsCredentials, LifecycleError>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Fixed credentials.
#[async_trait]
impl AwsCredentialProvider for AwsCredentials {
    async fn credentials(&self) -> Result<AwsCredentials, LifecycleError> {
        Ok(self.clone())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

fn unavailable(message: impl Into<String>) -> LifecycleError {
    StorageError::AwsCredentialsUnavailable {
        message: message.into(),
    }
    .into()
}

/// Variable lookup; the process environment unless overridden.
#[derive(Clone, Default)]
struct EnvSource(Option<Arc<HashMap<String, String>>>);

impl EnvSource {
    fn from_vars<K: Into<String>, V: Into<String>>(vars: impl IntoIterator<Item = (K, V)>) -> Self {
        Self(Some(Arc::new(
            vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        )))
    }

    fn get(&self, name: &str) -> Option<String> {
        let value = match &self.0 {
            Some(vars) => vars.get(name).cloned(),
            None => std::env::var(name).ok(),
        };
        value.filter(|v| !v.is_empty())
    }
}

/// Reads `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and the optional
/// `AWS_SESSION_TOKEN` at each call.
#[derive(Clone, Default)]
pub struct EnvironmentCredentialProvider {
    env: EnvSource,
}

impl EnvironmentCredentialProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read from `vars` instead of the process environment.
    pub fn from_vars<K: Into<String>, V: Into<String>>(
        vars: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        Self {
            env: EnvSource::from_vars(vars),
        }
    }
}

#[async_trait]
impl AwsCredentialProvider for EnvironmentCredentialProvider {
    async fn credentials(&self) -> Result<AwsCredentials, LifecycleError> {
        let access_key_id = self
            .env
            .get(AWS_ACCESS_KEY_ID)
            .ok_or_else(|| unavailable(format!("{} not set", AWS_ACCESS_KEY_ID)))?;
        let secret_access_key = self
            .env
            .get(AWS_SECRET_ACCESS_KEY)
            .ok_or_else(|| unavailable(format!("{} not set", AWS_SECRET_ACCESS_KEY)))?;

        let credentials = AwsCredentials::new(access_key_id, secret_access_key);
        Ok(match self.env.get(AWS_SESSION_TOKEN) {
            Some(token) => credentials.with_session_token(token),
            None => credentials,
        })
    }

    fn name(&self) -> &'static str {
        "environment"
    }
}

/// Credential document served by both the container endpoint and IMDS.
#[derive(Deserialize)]
struct CredentialDocument {
    #[serde(rename = "AccessKeyId")]
    access_key_id: String,
    #[serde(rename = "SecretAccessKey")]
    secret_access_key: String,
    #[serde(rename = "Token", default)]
    token: Option<String>,
    #[serde(rename = "Expiration", default)]
    expiration: Option<String>,
}

impl CredentialDocument {
    fn parse(source: &str, body: &str) -> Result<AwsCredentials, LifecycleError> {
        let document: CredentialDocument = serde_json::from_str(body)
            .map_err(|e| unavailable(format!("{} returned malformed credentials: {}", source, e)))?;

        let mut credentials =
            AwsCredentials::new(document.access_key_id, document.secret_access_key);
        if let Some(token) = document.token.filter(|t| !t.is_empty()) {
            credentials = credentials.with_session_token(token);
        }
        if let Some(expiration) = document.expiration {
            let expiration = DateTime::parse_from_rfc3339(&expiration)
                .map_err(|e| unavailable(format!("{} returned a bad expiration: {}", source, e)))?;
            credentials = credentials.with_expiration(expiration.with_timezone(&Utc));
        }
        Ok(credentials)
    }
}

async fn fetch<T: HttpTransport>(
    transport: &T,
    source: &str,
    request: HttpRequest,
) -> Result<String, LifecycleError> {
    let response = transport
        .send(request)
        .await
        .map_err(|e| unavailable(format!("{}: {}", source, e)))?;
    if !response.is_success() {
        return Err(unavailable(format!(
            "{} returned HTTP {}",
            source, response.status
        )));
    }
    Ok(response.body)
}

/// ECS/Fargate task role credentials from the container endpoint.
pub struct ContainerCredentialProvider<T: HttpTransport> {
    uri: Option<String>,
    authorization: Option<SecretString>,
    transport: Arc<T>,
}

impl<T: HttpTransport> ContainerCredentialProvider<T> {
    /// Configure from `AWS_CONTAINER_CREDENTIALS_RELATIVE_URI` or
    /// `AWS_CONTAINER_CREDENTIALS_FULL_URI`, with the optional
    /// `AWS_CONTAINER_AUTHORIZATION_TOKEN`.
    pub fn from_env(transport: Arc<T>) -> Self {
        Self::from_source(&EnvSource::default(), transport)
    }

    /// Same as `from_env`, reading `vars`.
    pub fn from_vars<K: Into<String>, V: Into<String>>(
        vars: impl IntoIterator<Item = (K, V)>,
        transport: Arc<T>,
    ) -> Self {
        Self::from_source(&EnvSource::from_vars(vars), transport)
    }

    fn from_source(env: &EnvSource, transport: Arc<T>) -> Self {
        let uri = env
            .get(AWS_CONTAINER_CREDENTIALS_RELATIVE_URI)
            .map(|relative| format!("{}{}", CONTAINER_ENDPOINT, relative))
            .or_else(|| env.get(AWS_CONTAINER_CREDENTIALS_FULL_URI));
        Self {
            uri,
            authorization: env.get(AWS_CONTAINER_AUTHORIZATION_TOKEN).map(SecretString::new),
            transport,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.uri.is_some()
    }
}

#[async_trait]
impl<T: HttpTransport> AwsCredentialProvider for ContainerCredentialProvider<T> {
    async fn credentials(&self) -> Result<AwsCredentials, LifecycleError> {
        let uri = self
            .uri
            .as_ref()
            .ok_or_else(|| unavailable("container credentials endpoint not configured"))?;

        let mut request = HttpRequest::new(HttpMethod::Get, uri.as_str())
            .header("accept", "application/json")
            .timeout(METADATA_TIMEOUT);
        if let Some(token) = &self.authorization {
            request = request.header("authorization", token.expose_secret().as_str());
        }

        let body = fetch(self.transport.as_ref(), "container endpoint", request).await?;
        CredentialDocument::parse("container endpoint", &body)
    }

    fn name(&self) -> &'static str {
        "container"
    }
}

/// EC2 instance role credentials from the instance metadata service.
///
/// Uses an IMDSv2 session token when one can be obtained and falls back to
/// IMDSv1 requests otherwise.
pub struct ImdsCredentialProvider<T: HttpTransport> {
    endpoint: String,
    disabled: bool,
    transport: Arc<T>,
}

impl<T: HttpTransport> ImdsCredentialProvider<T> {
    /// Default endpoint; disabled when `AWS_EC2_METADATA_DISABLED=true`.
    pub fn from_env(transport: Arc<T>) -> Self {
        let disabled = EnvSource::default()
            .get(AWS_EC2_METADATA_DISABLED)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        Self {
            endpoint: IMDS_ENDPOINT.to_string(),
            disabled,
            transport,
        }
    }

    pub fn with_endpoint(endpoint: impl Into<String>, transport: Arc<T>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            disabled: false,
            transport,
        }
    }

    async fn session_token(&self) -> Option<String> {
        let request = HttpRequest::new(HttpMethod::Put, format!("{}/latest/api/token", self.endpoint))
            .header(IMDS_TOKEN_TTL_HEADER, IMDS_TOKEN_TTL_SECS)
            .timeout(METADATA_TIMEOUT);
        match fetch(self.transport.as_ref(), "IMDS", request).await {
            Ok(token) => Some(token.trim().to_string()),
            Err(e) => {
                debug!(error = %e, "IMDSv2 token unavailable; using IMDSv1");
                None
            }
        }
    }

    fn metadata_request(&self, path: &str, token: Option<&str>) -> HttpRequest {
        let request = HttpRequest::new(
            HttpMethod::Get,
            format!("{}/latest/meta-data/iam/security-credentials/{}", self.endpoint, path),
        )
        .timeout(METADATA_TIMEOUT);
        match token {
            Some(token) => request.header(IMDS_TOKEN_HEADER, token),
            None => request,
        }
    }
}

#[async_trait]
impl<T: HttpTransport> AwsCredentialProvider for ImdsCredentialProvider<T> {
    async fn credentials(&self) -> Result<AwsCredentials, LifecycleError> {
        if self.disabled {
            return Err(unavailable("instance metadata disabled"));
        }

        let token = self.session_token().await;
        let roles = fetch(
            self.transport.as_ref(),
            "IMDS",
            self.metadata_request("", token.as_deref()),
        )
        .await?;
        let role = roles
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .ok_or_else(|| unavailable("no IAM role attached to the instance"))?;

        let body = fetch(
            self.transport.as_ref(),
            "IMDS",
            self.metadata_request(role, token.as_deref()),
        )
        .await?;
        CredentialDocument::parse("IMDS", &body)
    }

    fn name(&self) -> &'static str {
        "imds"
    }
}

/// Tries each provider in order; the first success wins.
#[derive(Clone, Default)]
pub struct AwsCredentialChain {
    providers: Vec<Arc<dyn AwsCredentialProvider>>,
}

impl AwsCredentialChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: impl AwsCredentialProvider + 'static) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }
}

#[async_trait]
impl AwsCredentialProvider for AwsCredentialChain {
    async fn credentials(&self) -> Result<AwsCredentials, LifecycleError> {
        let mut failures = Vec::with_capacity(self.providers.len());

        for provider in &self.providers {
            match provider.credentials().await {
                Ok(credentials) => {
                    debug!(provider = provider.name(), "AWS credentials sourced");
                    return Ok(credentials);
                }
                Err(e) => failures.push(format!("{}: {}", provider.name(), e)),
            }
        }

        Err(unavailable(if failures.is_empty() {
            "no credential providers configured".to_string()
        } else {
            failures.join("; ")
        }))
    }

    fn name(&self) -> &'static str {
        "chain"
    }
}

struct CachedEntry {
    credentials: AwsCredentials,
    fetched_at: DateTime<Utc>,
}

/// Caches credentials from `P`, re-sourcing them before they expire.
pub struct CachedCredentialProvider<P: AwsCredentialProvider> {
    inner: P,
    cache: Mutex<Option<CachedEntry>>,
    ttl: ChronoDuration,
    refresh_buffer: ChronoDuration,
    clock: Arc<dyn Clock>,
}

impl<P: AwsCredentialProvider> CachedCredentialProvider<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            cache: Mutex::new(None),
            ttl: ChronoDuration::seconds(DEFAULT_CACHE_TTL_SECS),
            refresh_buffer: ChronoDuration::seconds(DEFAULT_REFRESH_BUFFER_SECS),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_refresh_buffer(mut self, buffer: ChronoDuration) -> Self {
        self.refresh_buffer = buffer;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Drop the cached credentials.
    pub async fn invalidate(&self) {
        *self.cache.lock().await = None;
    }

    fn is_fresh(&self, entry: &CachedEntry, now: DateTime<Utc>) -> bool {
        match entry.credentials.expiration() {
            Some(expiration) => now + self.refresh_buffer < expiration,
            None => now - entry.fetched_at < self.ttl,
        }
    }
}

#[async_trait]
impl<P: AwsCredentialProvider> AwsCredentialProvider for CachedCredentialProvider<P> {
    async fn credentials(&self) -> Result<AwsCredentials, LifecycleError> {
        let mut cache = self.cache.lock().await;
        let now = self.clock.now();

        if let Some(entry) = cache.as_ref() {
            if self.is_fresh(entry, now) {
                return Ok(entry.credentials.clone());
            }
        }

        match self.inner.credentials().await {
            Ok(credentials) => {
                debug!(
                    expiration = ?credentials.expiration(),
                    "AWS credentials cached"
                );
                *cache = Some(CachedEntry {
                    credentials: credentials.clone(),
                    fetched_at: now,
                });
                Ok(credentials)
            }
            Err(e) => match cache.as_ref() {
                // Still usable, just inside the refresh buffer.
                Some(entry) if entry.credentials.expiration().map_or(false, |exp| now < exp) => {
                    warn!(error = %e, "AWS credential refresh failed; using cached credentials");
                    Ok(entry.credentials.clone())
                }
                _ => Err(e),
            },
        }
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

/// Environment, then container endpoint, then instance metadata, cached.
pub fn default_credential_chain<T: HttpTransport + 'static>(
    transport: Arc<T>,
) -> CachedCredentialProvider<AwsCredentialChain> {
    let chain = AwsCredentialChain::new()
        .with_provider(EnvironmentCredentialProvider::new())
        .with_provider(ContainerCredentialProvider::from_env(transport.clone()))
        .with_provider(ImdsCredentialProvider::from_env(transport));
    CachedCredentialProvider::new(chain)
}
