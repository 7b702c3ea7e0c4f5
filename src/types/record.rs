//! Credential Record Types
//!
//! The durable token record and the static application identity it is scoped to.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{ConfigurationError, CredentialsError, LifecycleError};

/// Default OAuth redirect URI registered for local authorization.
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8000/callback";

/// Provider environment the application is registered in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Sandbox,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sandbox => "sandbox",
            Self::Production => "production",
        }
    }
}

impl FromStr for Environment {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sandbox" | "development" => Ok(Self::Sandbox),
            "production" | "prod" => Ok(Self::Production),
            other => Err(ConfigurationError::InvalidConfig {
                message: format!("unknown environment '{}'", other),
            }),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static application identity needed for a refresh-grant exchange.
///
/// Loaded once; a refresh never changes it.
#[derive(Clone)]
pub struct ClientIdentity {
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_uri: String,
    pub environment: Environment,
}

impl ClientIdentity {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
        environment: Environment,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: SecretString::new(client_secret.into()),
            redirect_uri: redirect_uri.into(),
            environment,
        }
    }

    /// Creates the identity from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `QBO_CLIENT_ID` (required)
    /// - `QBO_CLIENT_SECRET` (required)
    /// - `QBO_REDIRECT_URI` (optional, defaults to `http://localhost:8000/callback`)
    /// - `QBO_ENVIRONMENT` (optional, `sandbox` or `production`, defaults to `sandbox`)
    pub fn from_env() -> Result<Self, LifecycleError> {
        let client_id = required_env("QBO_CLIENT_ID")?;
        let client_secret = required_env("QBO_CLIENT_SECRET")?;
        let redirect_uri = std::env::var("QBO_REDIRECT_URI")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string());
        let environment = match std::env::var("QBO_ENVIRONMENT") {
            Ok(value) if !value.is_empty() => value.parse()?,
            _ => Environment::Sandbox,
        };

        Ok(Self::new(client_id, client_secret, redirect_uri, environment))
    }

    pub(crate) fn secret(&self) -> &str {
        self.client_secret.expose_secret()
    }
}

fn required_env(name: &str) -> Result<String, LifecycleError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            ConfigurationError::MissingRequired {
                field: name.to_string(),
            }
            .into()
        })
}

impl std::fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("redirect_uri", &self.redirect_uri)
            .field("environment", &self.environment)
            .finish()
    }
}

/// Access/refresh token pair. Always replaced as a unit.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    access_token: String,
    refresh_token: String,
}

impl TokenPair {
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }
}

/// The durable unit of credential state.
///
/// A record is either empty (no prior authorization) or complete; a record
/// holding only one of the two tokens cannot be constructed.
#[derive(Clone)]
pub struct TokenRecord {
    tenant_id: String,
    identity: ClientIdentity,
    tokens: Option<TokenPair>,
}

impl TokenRecord {
    /// Create a complete record.
    pub fn new(
        tenant_id: impl Into<String>,
        identity: ClientIdentity,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            identity,
            tokens: Some(TokenPair {
                access_token: access_token.into(),
                refresh_token: refresh_token.into(),
            }),
        }
    }

    /// Create a record with no authorization yet.
    pub fn empty(tenant_id: impl Into<String>, identity: ClientIdentity) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            identity,
            tokens: None,
        }
    }

    /// Assemble a record from optionally-present stored fields. Empty strings
    /// count as absent.
    pub fn from_parts(
        tenant_id: impl Into<String>,
        identity: ClientIdentity,
        access_token: Option<String>,
        refresh_token: Option<String>,
    ) -> Result<Self, CredentialsError> {
        let access_token = access_token.filter(|t| !t.is_empty());
        let refresh_token = refresh_token.filter(|t| !t.is_empty());

        match (access_token, refresh_token) {
            (Some(access), Some(refresh)) => Ok(Self::new(tenant_id, identity, access, refresh)),
            (None, None) => Ok(Self::empty(tenant_id, identity)),
            (Some(_), None) => Err(CredentialsError::Incomplete {
                message: "access token present without a refresh token".to_string(),
            }),
            (None, Some(_)) => Err(CredentialsError::Incomplete {
                message: "refresh token present without an access token".to_string(),
            }),
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub fn tokens(&self) -> Option<&TokenPair> {
        self.tokens.as_ref()
    }

    pub fn access_token(&self) -> Option<&str> {
        self.tokens.as_ref().map(TokenPair::access_token)
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.tokens.as_ref().map(TokenPair::refresh_token)
    }

    /// Whether both tokens are present and the record is scoped to a tenant.
    pub fn is_complete(&self) -> bool {
        self.tokens.is_some() && !self.tenant_id.is_empty()
    }

    /// Copy of this record carrying a new token pair.
    pub(crate) fn with_tokens(&self, access_token: String, refresh_token: String) -> Self {
        Self {
            tenant_id: self.tenant_id.clone(),
            identity: self.identity.clone(),
            tokens: Some(TokenPair {
                access_token,
                refresh_token,
            }),
        }
    }
}

impl std::fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRecord")
            .field("tenant_id", &self.tenant_id)
            .field("identity", &self.identity)
            .field("tokens", &self.tokens.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}
