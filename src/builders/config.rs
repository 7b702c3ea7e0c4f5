//! Configuration Builder
//!
//! Fluent builder for lifecycle configuration.

use std::time::Duration;

use crate::error::{ConfigurationError, LifecycleError};
use crate::types::{
    ClientAuthMethod, LifecycleConfig, DEFAULT_REFRESH_MARGIN_SECS, DEFAULT_TIMEOUT_SECS,
    DEFAULT_TOKEN_ENDPOINT, DEFAULT_TOKEN_LIFETIME_SECS,
};

/// Lifecycle configuration builder.
pub struct LifecycleConfigBuilder {
    token_endpoint: String,
    auth_method: ClientAuthMethod,
    default_token_lifetime: Duration,
    refresh_margin: Duration,
    prefer_provider_expiry: bool,
    http_timeout: Duration,
    call_timeout: Duration,
}

impl Default for LifecycleConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleConfigBuilder {
    /// Create new configuration builder.
    pub fn new() -> Self {
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

    /// Set token endpoint.
    pub fn token_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.token_endpoint = endpoint.into();
        self
    }

    /// Set client authentication method.
    pub fn auth_method(mut self, method: ClientAuthMethod) -> Self {
        self.auth_method = method;
        self
    }

    /// Set the assumed access token lifetime.
    pub fn default_token_lifetime(mut self, lifetime: Duration) -> Self {
        self.default_token_lifetime = lifetime;
        self
    }

    /// Set the refresh safety margin.
    pub fn refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    /// Prefer the provider-reported expiry over the assumed lifetime.
    pub fn prefer_provider_expiry(mut self, prefer: bool) -> Self {
        self.prefer_provider_expiry = prefer;
        self
    }

    /// Set refresh-grant timeout.
    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Set wrapped call timeout.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Build configuration.
    pub fn build(self) -> Result<LifecycleConfig, LifecycleError> {
        let endpoint = url::Url::parse(&self.token_endpoint).map_err(|_| {
            ConfigurationError::InvalidEndpoint {
                url: self.token_endpoint.clone(),
            }
        })?;

        if endpoint.scheme() != "https" && endpoint.scheme() != "http" {
            return Err(ConfigurationError::InvalidEndpoint {
                url: self.token_endpoint,
            }
            .into());
        }

        if self.default_token_lifetime.is_zero() {
            return Err(ConfigurationError::InvalidConfig {
                message: "default token lifetime must be positive".to_string(),
            }
            .into());
        }

        if self.refresh_margin >= self.default_token_lifetime {
            return Err(ConfigurationError::InvalidConfig {
                message: "refresh margin must be shorter than the token lifetime".to_string(),
            }
            .into());
        }

        if self.http_timeout.is_zero() || self.call_timeout.is_zero() {
            return Err(ConfigurationError::InvalidConfig {
                message: "timeouts must be positive".to_string(),
            }
            .into());
        }

        Ok(LifecycleConfig {
            token_endpoint: self.token_endpoint,
            auth_method: self.auth_method,
            default_token_lifetime: self.default_token_lifetime,
            refresh_margin: self.refresh_margin,
            prefer_provider_expiry: self.prefer_provider_expiry,
            http_timeout: self.http_timeout,
            call_timeout: self.call_timeout,
        })
    }
}

/// Create a new lifecycle configuration builder.
pub fn lifecycle_config() -> LifecycleConfigBuilder {
    LifecycleConfigBuilder::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_defaults() {
        let config = lifecycle_config().build().unwrap();
        assert_eq!(config.token_endpoint, DEFAULT_TOKEN_ENDPOINT);
        assert_eq!(config.auth_method, ClientAuthMethod::ClientSecretBasic);
        assert!(config.prefer_provider_expiry);
    }

    #[test]
    fn test_invalid_endpoint() {
        let result = lifecycle_config().token_endpoint("not a url").build();
        assert!(matches!(
            result,
            Err(LifecycleError::Configuration(ConfigurationError::InvalidEndpoint { .. }))
        ));
    }

    #[test]
    fn test_margin_must_fit_in_lifetime() {
        let result = lifecycle_config()
            .default_token_lifetime(Duration::from_secs(600))
            .refresh_margin(Duration::from_secs(600))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_custom_values() {
        let config = lifecycle_config()
            .token_endpoint("https://login.example.com/oauth/token")
            .auth_method(ClientAuthMethod::ClientSecretPost)
            .default_token_lifetime(Duration::from_secs(7200))
            .refresh_margin(Duration::from_secs(60))
            .call_timeout(Duration::from_secs(10))
            .build()
            .unwrap();

        assert_eq!(config.staleness_threshold(), Duration::from_secs(7140));
        assert_eq!(config.call_timeout, Duration::from_secs(10));
    }
}
