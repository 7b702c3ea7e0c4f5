//! AWS Secrets Manager Store
//!
//! Token record kept as a JSON secret. Unlike the local file, the secret also
//! carries the client identity so a deployed service needs nothing else.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::core::{HttpMethod, HttpRequest, HttpTransport};
use crate::error::{CredentialsError, LifecycleError, ProtocolError, StorageError};
use crate::token::aws_credentials::AwsCredentialProvider;
use crate::token::sigv4::{sign_request, SigningParams};
use crate::token::CredentialStore;
use crate::types::{ClientIdentity, Environment, TokenRecord, DEFAULT_REDIRECT_URI, DEFAULT_TIMEOUT_SECS};

const SERVICE: &str = "secretsmanager";
const JSON_CONTENT_TYPE: &str = "application/x-amz-json-1.1";

/// JSON layout of the stored secret.
#[derive(Debug, Default, Serialize, Deserialize)]
struct SecretPayload {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default, alias = "tenant_id")]
    realm_id: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    redirect_uri: Option<String>,
    #[serde(default)]
    environment: Option<String>,
}

impl SecretPayload {
    fn from_record(record: &TokenRecord) -> Self {
        let identity = record.identity();
        Self {
            access_token: record.access_token().map(str::to_string),
            refresh_token: record.refresh_token().map(str::to_string),
            realm_id: Some(record.tenant_id().to_string()),
            client_id: Some(identity.client_id.clone()),
            client_secret: Some(identity.client_secret.expose_secret().clone()),
            redirect_uri: Some(identity.redirect_uri.clone()),
            environment: Some(identity.environment.as_str().to_string()),
        }
    }

    fn into_record(self) -> Result<TokenRecord, LifecycleError> {
        let client_id = self.client_id.filter(|v| !v.is_empty()).ok_or_else(|| {
            CredentialsError::Incomplete {
                message: "secret has no client_id".to_string(),
            }
        })?;
        let client_secret = self.client_secret.filter(|v| !v.is_empty()).ok_or_else(|| {
            CredentialsError::Incomplete {
                message: "secret has no client_secret".to_string(),
            }
        })?;
        let environment = match self.environment.as_deref() {
            Some(value) if !value.is_empty() => value.parse::<Environment>()?,
            _ => Environment::Sandbox,
        };
        let identity = ClientIdentity::new(
            client_id,
            client_secret,
            self.redirect_uri
                .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string()),
            environment,
        );

        Ok(TokenRecord::from_parts(
            self.realm_id.unwrap_or_default(),
            identity,
            self.access_token,
            self.refresh_token,
        )?)
    }
}

#[derive(Deserialize)]
struct GetSecretValueResponse {
    #[serde(rename = "SecretString")]
    secret_string: Option<String>,
}

#[derive(Deserialize)]
struct AwsErrorBody {
    #[serde(rename = "__type", default)]
    error_type: String,
    #[serde(alias = "Message", default)]
    message: String,
}

/// Credential store backed by AWS Secrets Manager.
pub struct SecretsManagerStore<T: HttpTransport> {
    secret_id: String,
    region: String,
    endpoint: String,
    credentials: Arc<dyn AwsCredentialProvider>,
    timeout: Duration,
    transport: Arc<T>,
}

impl<T: HttpTransport> SecretsManagerStore<T> {
    /// Create a store for `secret_id` in `region`. Requests are signed with
    /// credentials obtained from `credentials` each time.
    pub fn new(
        secret_id: impl Into<String>,
        region: impl Into<String>,
        credentials: impl AwsCredentialProvider + 'static,
        transport: Arc<T>,
    ) -> Self {
        let region = region.into();
        Self {
            endpoint: format!("https://{}.{}.amazonaws.com/", SERVICE, region),
            secret_id: secret_id.into(),
            region,
            credentials: Arc::new(credentials),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            transport,
        }
    }

    /// Per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the service endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn invoke(&self, action: &str, body: serde_json::Value) -> Result<String, LifecycleError> {
        let request = HttpRequest::new(HttpMethod::Post, &self.endpoint)
            .header("content-type", JSON_CONTENT_TYPE)
            .header("x-amz-target", format!("secretsmanager.{}", action))
            .body(body.to_string())
            .timeout(self.timeout);

        let credentials = self.credentials.credentials().await?;
        let params = SigningParams {
            access_key_id: credentials.access_key_id(),
            secret_access_key: credentials.secret_access_key(),
            session_token: credentials.session_token(),
            region: &self.region,
            service: SERVICE,
        };
        let request = sign_request(request, &params, chrono::Utc::now())?;

        let response = self.transport.send(request).await?;
        if response.is_success() {
            return Ok(response.body);
        }

        Err(self.map_error(action, response.status, &response.body))
    }

    fn map_error(&self, action: &str, status: u16, body: &str) -> LifecycleError {
        let parsed: Option<AwsErrorBody> = serde_json::from_str(body).ok();
        let (code, message) = match parsed {
            Some(error) => {
                let code = error
                    .error_type
                    .rsplit('#')
                    .next()
                    .unwrap_or_default()
                    .to_string();
                (code, error.message)
            }
            None => (String::new(), format!("HTTP {}", status)),
        };

        let location = self.location();
        let error = match code.as_str() {
            "ResourceNotFoundException" => StorageError::NotFound { location },
            "AccessDeniedException" | "UnrecognizedClientException" => {
                StorageError::PermissionDenied { location }
            }
            _ if action == "PutSecretValue" => StorageError::WriteFailed {
                message: format!("{} {}: {}", code, status, message),
            },
            _ => StorageError::ReadFailed {
                message: format!("{} {}: {}", code, status, message),
            },
        };
        error.into()
    }
}

#[async_trait]
impl<T: HttpTransport> CredentialStore for SecretsManagerStore<T> {
    async fn load(&self) -> Result<TokenRecord, LifecycleError> {
        let body = self
            .invoke(
                "GetSecretValue",
                serde_json::json!({ "SecretId": self.secret_id }),
            )
            .await?;

        let response: GetSecretValueResponse =
            serde_json::from_str(&body).map_err(|e| ProtocolError::InvalidJson {
                message: e.to_string(),
            })?;
        let secret = response
            .secret_string
            .ok_or_else(|| StorageError::CorruptedData {
                message: "secret has no SecretString".to_string(),
            })?;
        let payload: SecretPayload =
            serde_json::from_str(&secret).map_err(|e| StorageError::CorruptedData {
                message: e.to_string(),
            })?;

        payload.into_record()
    }

    async fn save(&self, record: &TokenRecord) -> Result<(), LifecycleError> {
        let secret = serde_json::to_string(&SecretPayload::from_record(record)).map_err(|e| {
            StorageError::WriteFailed {
                message: e.to_string(),
            }
        })?;

        self.invoke(
            "PutSecretValue",
            serde_json::json!({
                "SecretId": self.secret_id,
                "SecretString": secret,
                "ClientRequestToken": uuid::Uuid::new_v4().to_string(),
            }),
        )
        .await?;

        tracing::debug!(secret_id = %self.secret_id, "secret version written");
        Ok(())
    }

    async fn exists(&self) -> bool {
        self.load().await.is_ok()
    }

    fn location(&self) -> String {
        format!("secretsmanager:{}/{}", self.region, self.secret_id)
    }
}
