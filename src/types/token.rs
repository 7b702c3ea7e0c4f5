//! Token Types
//!
//! Refresh-grant responses and the access token handed out to callers.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashMap;

/// Token response from the provider's token endpoint.
#[derive(Clone, Debug, Deserialize)]
pub struct TokenResponse {
    /// Access token.
    pub access_token: String,
    /// Token type (usually "Bearer").
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Access token lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Refresh token. Rotating providers return a new one on every exchange.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Refresh token lifetime in seconds (Intuit).
    #[serde(default)]
    pub x_refresh_token_expires_in: Option<u64>,
    /// Additional fields.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Result of a successful refresh-grant exchange.
#[derive(Clone)]
pub struct RefreshedTokens {
    pub access_token: String,
    pub refresh_token: String,
    /// Provider-reported access token lifetime in seconds.
    pub expires_in: Option<u64>,
    /// Provider-reported refresh token lifetime in seconds.
    pub refresh_token_expires_in: Option<u64>,
}

impl RefreshedTokens {
    /// Build from a token response, keeping `previous_refresh_token` when the
    /// provider does not rotate refresh tokens.
    pub fn from_response(response: TokenResponse, previous_refresh_token: &str) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response
                .refresh_token
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| previous_refresh_token.to_string()),
            expires_in: response.expires_in,
            refresh_token_expires_in: response.x_refresh_token_expires_in,
        }
    }
}

impl std::fmt::Debug for RefreshedTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshedTokens")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .field("refresh_token_expires_in", &self.refresh_token_expires_in)
            .finish()
    }
}

/// Access token wrapper for safe handling.
#[derive(Clone)]
pub struct AccessToken {
    /// Token value (secret).
    value: SecretString,
    /// Token type.
    pub token_type: String,
    /// When the manager last obtained this token, if it did.
    pub issued_at: Option<DateTime<Utc>>,
    /// Provider-reported expiration, when known.
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    /// Create new bearer access token.
    pub fn new(
        value: String,
        issued_at: Option<DateTime<Utc>>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            value: SecretString::new(value),
            token_type: "Bearer".to_string(),
            issued_at,
            expires_at,
        }
    }

    /// Get token value (for Authorization header).
    pub fn secret(&self) -> &str {
        self.value.expose_secret()
    }

    /// Format as Authorization header value.
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.value.expose_secret())
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
