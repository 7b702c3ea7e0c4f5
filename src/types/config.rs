//! Configuration Types
//!
//! Tuning for the credential lifecycle manager and wrapped calls.

use std::time::Duration;

use crate::builders::LifecycleConfigBuilder;
use crate::error::LifecycleError;

/// Intuit OAuth2 token endpoint (same for sandbox and production).
pub const DEFAULT_TOKEN_ENDPOINT: &str = "https://oauth.platform.intuit.com/oauth2/v1/tokens/bearer";

/// Default values.
pub const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;
pub const DEFAULT_REFRESH_MARGIN_SECS: u64 = 300;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// How client credentials are presented to the token endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClientAuthMethod {
    /// client_id and client_secret in request body.
    ClientSecretPost,
    /// HTTP Basic Authentication header.
    #[default]
    ClientSecretBasic,
}

/// Credential lifecycle configuration.
#[derive(Clone, Debug)]
pub struct LifecycleConfig {
    /// Token endpoint for refresh-grant exchanges.
    pub token_endpoint: String,
    /// Client authentication method at the token endpoint.
    pub auth_method: ClientAuthMethod,
    /// Assumed access token lifetime when the provider does not report one.
    pub default_token_lifetime: Duration,
    /// Safety margin subtracted from the token lifetime.
    pub refresh_margin: Duration,
    /// Use the provider-reported `expires_in` when available.
    pub prefer_provider_expiry: bool,
    /// Timeout for the refresh-grant exchange and store round trips.
    pub http_timeout: Duration,
    /// Timeout for each invocation of a wrapped API operation.
    pub call_timeout: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            token_endpoint: DEFAULT_TOKEN_ENDPOINT.to_string(),
            auth_method: ClientAuthMethod::ClientSecretBasic,
            default_token_lifetime: Duration::from_secs(DEFAULT_TOKEN_LIFETIME_SECS),
            refresh_margin: Duration::from_secs(DEFAULT_REFRESH_MARGIN_SECS),
            prefer_provider_expiry: true,
            http_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            call_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl LifecycleConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> LifecycleConfigBuilder {
        LifecycleConfigBuilder::new()
    }

    /// Age after which a token without a provider-reported expiry is stale.
    pub fn staleness_threshold(&self) -> Duration {
        self.default_token_lifetime
            .saturating_sub(self.refresh_margin)
    }

    /// Creates a configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `QBO_TOKEN_ENDPOINT` (optional): token endpoint URL
    /// - `QBO_TOKEN_LIFETIME_SECS` (optional): fallback access token lifetime
    /// - `QBO_REFRESH_MARGIN_SECS` (optional): safety margin before expiry
    /// - `QBO_HTTP_TIMEOUT_SECS` (optional): refresh-grant and store timeout
    /// - `QBO_CALL_TIMEOUT_SECS` (optional): wrapped call timeout
    pub fn from_env() -> Result<Self, LifecycleError> {
        let mut builder = LifecycleConfigBuilder::new();

        if let Ok(endpoint) = std::env::var("QBO_TOKEN_ENDPOINT") {
            builder = builder.token_endpoint(endpoint);
        }
        if let Some(secs) = env_secs("QBO_TOKEN_LIFETIME_SECS") {
            builder = builder.default_token_lifetime(secs);
        }
        if let Some(secs) = env_secs("QBO_REFRESH_MARGIN_SECS") {
            builder = builder.refresh_margin(secs);
        }
        if let Some(secs) = env_secs("QBO_HTTP_TIMEOUT_SECS") {
            builder = builder.http_timeout(secs);
        }
        if let Some(secs) = env_secs("QBO_CALL_TIMEOUT_SECS") {
            builder = builder.call_timeout(secs);
        }

        builder.build()
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}
