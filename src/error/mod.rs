//! Credential Lifecycle Error Types
//!
//! Error hierarchy for token persistence, refresh-grant exchanges and wrapped API calls.

use std::time::Duration;
use thiserror::Error;

/// Root error type for the credential lifecycle integration.
///
/// Every variant is `Clone` so that the outcome of a single refresh-grant
/// exchange can be handed to all callers that waited on it.
#[derive(Error, Debug, Clone)]
pub enum LifecycleError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("No credentials: {0}")]
    Credentials(#[from] CredentialsError),

    #[error("Refresh failed: {0}")]
    Refresh(#[from] RefreshError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("API call failed: {0}")]
    Call(#[from] CallError),
}

impl LifecycleError {
    /// Stable error code for log fields.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "LIFECYCLE_CONFIG",
            Self::Credentials(_) => "LIFECYCLE_NO_CREDENTIALS",
            Self::Refresh(RefreshError::Rejected { .. }) => "LIFECYCLE_REFRESH_REJECTED",
            Self::Refresh(RefreshError::Unavailable { .. }) => "LIFECYCLE_REFRESH_UNAVAILABLE",
            Self::Storage(_) => "LIFECYCLE_PERSISTENCE",
            Self::Network(_) => "LIFECYCLE_NETWORK",
            Self::Protocol(_) => "LIFECYCLE_PROTOCOL",
            Self::Provider(_) => "LIFECYCLE_PROVIDER",
            Self::Call(CallError::AuthRejected { .. }) => "LIFECYCLE_AUTH_CALL",
            Self::Call(CallError::Failed { .. }) => "LIFECYCLE_CALL",
        }
    }

    /// Check if error is transient and the operation may be attempted again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(e) => e.is_retryable(),
            Self::Refresh(RefreshError::Unavailable { .. }) => true,
            Self::Storage(e) => e.is_retryable(),
            Self::Provider(e) => e.is_transient(),
            Self::Call(CallError::Failed { source, .. }) => source.is_transient(),
            _ => false,
        }
    }

    /// Check if error requires a fresh interactive authorization.
    pub fn needs_reauth(&self) -> bool {
        matches!(
            self,
            Self::Credentials(_) | Self::Refresh(RefreshError::Rejected { .. })
        )
    }

    /// Whether a refresh-grant exchange failing with this error proves the
    /// refresh token (or client identity) is no longer accepted.
    pub(crate) fn rejects_refresh_token(&self) -> bool {
        match self {
            Self::Provider(e) => !e.is_transient(),
            Self::Refresh(RefreshError::Rejected { .. }) => true,
            _ => false,
        }
    }
}

/// Configuration error.
#[derive(Error, Debug, Clone)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Missing required field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid endpoint URL: {url}")]
    InvalidEndpoint { url: String },
}

/// No usable prior authorization exists.
#[derive(Error, Debug, Clone)]
pub enum CredentialsError {
    #[error("No credential record found in {location}")]
    NotFound { location: String },

    #[error("Credential record is incomplete: {message}")]
    Incomplete { message: String },
}

/// Refresh-grant failure.
#[derive(Error, Debug, Clone)]
pub enum RefreshError {
    /// The provider rejected the refresh token or client identity. Terminal
    /// until a new record is produced by interactive authorization.
    #[error("refresh token rejected by provider: {reason}")]
    Rejected { reason: String },

    /// The exchange could not complete (network, timeout, provider outage).
    #[error("refresh-grant exchange unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Network/transport error.
#[derive(Error, Debug, Clone)]
pub enum NetworkError {
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Request timeout after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("TLS error: {message}")]
    TlsError { message: String },
}

impl NetworkError {
    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::TlsError { .. })
    }
}

/// Protocol/response parsing error.
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Unexpected redirect to: {location}")]
    UnexpectedRedirect { location: String },

    #[error("Response too large: {size} bytes")]
    ResponseTooLarge { size: usize },

    #[error("Invalid JSON: {message}")]
    InvalidJson { message: String },

    #[error("Request signing failed: {message}")]
    SigningFailed { message: String },
}

/// Credential store error.
#[derive(Error, Debug, Clone)]
pub enum StorageError {
    #[error("No record at {location}")]
    NotFound { location: String },

    #[error("Read failed: {message}")]
    ReadFailed { message: String },

    #[error("Write failed: {message}")]
    WriteFailed { message: String },

    #[error("Corrupted data: {message}")]
    CorruptedData { message: String },

    #[error("Permission denied: {location}")]
    PermissionDenied { location: String },

    #[error("Refreshed tokens are held in memory but not yet persisted: {message}")]
    Unpersisted { message: String },

    #[error("AWS credentials unavailable: {message}")]
    AwsCredentialsUnavailable { message: String },
}

impl StorageError {
    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ReadFailed { .. }
                | Self::WriteFailed { .. }
                | Self::Unpersisted { .. }
                | Self::AwsCredentialsUnavailable { .. }
        )
    }
}

/// Provider (OAuth2 server) error.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("Invalid client credentials")]
    InvalidClient { error_description: Option<String> },

    #[error("Invalid grant: {message}")]
    InvalidGrant { message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Unauthorized client for this grant type")]
    UnauthorizedClient { error_description: Option<String> },

    #[error("Unsupported grant type: {grant_type}")]
    UnsupportedGrantType { grant_type: String },

    #[error("Server error: {message}")]
    ServerError { message: String },

    #[error("Server temporarily unavailable")]
    TemporarilyUnavailable { retry_after: Option<Duration> },
}

impl ProviderError {
    /// Outage-style errors that say nothing about the validity of the grant.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ServerError { .. } | Self::TemporarilyUnavailable { .. }
        )
    }
}

/// Failure of a wrapped outbound API operation.
#[derive(Error, Debug, Clone)]
pub enum CallError {
    /// The operation was still rejected as unauthenticated after the one
    /// permitted forced refresh.
    #[error("call rejected as unauthenticated after a successful refresh: {source}")]
    AuthRejected { source: ApiError },

    /// Any other failure, surfaced untouched.
    #[error("{source}")]
    Failed { source: ApiError, retried: bool },
}

impl CallError {
    /// The provider error behind this failure.
    pub fn api_error(&self) -> &ApiError {
        match self {
            Self::AuthRejected { source } | Self::Failed { source, .. } => source,
        }
    }
}

/// Kind of API failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// The API answered with a non-success status.
    Http,
    /// No answer within the call timeout.
    Timeout,
    /// The connection could not be established or was dropped.
    Connection,
    /// The answer could not be decoded.
    Decode,
}

/// Error returned by an operation against a wrapped SaaS API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    /// HTTP status, when the API answered.
    pub status: Option<u16>,
    /// Provider error code (`invalid_token`, Intuit fault code, Graph error code).
    pub provider_code: Option<String>,
    pub message: String,
}

impl ApiError {
    /// Error for a non-success HTTP response.
    pub fn http(status: u16, provider_code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Http,
            status: Some(status),
            provider_code,
            message: message.into(),
        }
    }

    /// Error for a call that exceeded its timeout.
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            kind: ApiErrorKind::Timeout,
            status: None,
            provider_code: None,
            message: format!("API call timed out after {:?}", timeout),
        }
    }

    /// Error for a connection-level failure.
    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Connection,
            status: None,
            provider_code: None,
            message: message.into(),
        }
    }

    /// Error for an undecodable response body.
    pub fn decode(message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Decode,
            status: None,
            provider_code: None,
            message: message.into(),
        }
    }

    /// Network failures and 5xx/429 answers.
    pub fn is_transient(&self) -> bool {
        match self.kind {
            ApiErrorKind::Timeout | ApiErrorKind::Connection => true,
            ApiErrorKind::Http => matches!(self.status, Some(429) | Some(500..=599)),
            ApiErrorKind::Decode => false,
        }
    }
}

impl From<LifecycleError> for ApiError {
    fn from(error: LifecycleError) -> Self {
        match error {
            LifecycleError::Network(NetworkError::Timeout { timeout }) => Self::timeout(timeout),
            LifecycleError::Network(e) => Self::connection(e.to_string()),
            LifecycleError::Protocol(e) => Self::decode(e.to_string()),
            other => Self::connection(other.to_string()),
        }
    }
}

/// Result type for credential lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// OAuth2 error response from provider (RFC 6749 Section 5.2).
#[derive(Debug, Clone, serde::Deserialize)]
pub struct OAuth2ErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
    #[serde(default)]
    pub error_uri: Option<String>,
}

/// Map token endpoint error response to error type.
pub fn map_token_error(response: &OAuth2ErrorResponse) -> ProviderError {
    match response.error.as_str() {
        "invalid_client" => ProviderError::InvalidClient {
            error_description: response.error_description.clone(),
        },
        "invalid_grant" => ProviderError::InvalidGrant {
            message: response
                .error_description
                .clone()
                .unwrap_or_else(|| "Invalid grant".to_string()),
        },
        "unauthorized_client" => ProviderError::UnauthorizedClient {
            error_description: response.error_description.clone(),
        },
        "unsupported_grant_type" => ProviderError::UnsupportedGrantType {
            grant_type: response.error_description.clone().unwrap_or_default(),
        },
        "server_error" => ProviderError::ServerError {
            message: response
                .error_description
                .clone()
                .unwrap_or_else(|| "Server error".to_string()),
        },
        "temporarily_unavailable" => ProviderError::TemporarilyUnavailable { retry_after: None },
        _ => ProviderError::InvalidRequest {
            message: response
                .error_description
                .clone()
                .unwrap_or_else(|| response.error.clone()),
        },
    }
}

/// Parse error response from HTTP body.
pub fn parse_error_response(body: &str) -> Option<OAuth2ErrorResponse> {
    serde_json::from_str(body).ok()
}

/// Create error from a token endpoint HTTP response.
///
/// The status class decides transience: 5xx, 408 and 429 are outages no
/// matter what the body says. Only other 4xx bodies are mapped by OAuth
/// error code.
pub fn create_error_from_response(status: u16, body: &str) -> LifecycleError {
    let parsed = parse_error_response(body);
    let description = parsed
        .as_ref()
        .and_then(|r| r.error_description.clone().or_else(|| Some(r.error.clone())));

    let error = match status {
        408 | 429 => ProviderError::TemporarilyUnavailable {
            retry_after: Some(Duration::from_secs(60)),
        },
        500..=599 => ProviderError::ServerError {
            message: description.unwrap_or_else(|| format!("HTTP {}", status)),
        },
        _ => match &parsed {
            Some(response) => map_token_error(response),
            None => match status {
                401 => ProviderError::InvalidClient {
                    error_description: Some("Unauthorized".to_string()),
                },
                403 => ProviderError::UnauthorizedClient {
                    error_description: Some("Forbidden".to_string()),
                },
                _ => ProviderError::InvalidRequest {
                    message: format!("HTTP {}", status),
                },
            },
        },
    };

    LifecycleError::Provider(error)
}

/// Get a message suitable for operators and end users.
pub fn get_user_message(error: &LifecycleError) -> String {
    match error {
        LifecycleError::Credentials(_) => {
            "No authorization is on file. Run the interactive authorization flow.".to_string()
        }
        LifecycleError::Refresh(RefreshError::Rejected { .. }) => {
            "The stored authorization was revoked or has expired. Re-authorize the integration."
                .to_string()
        }
        LifecycleError::Refresh(RefreshError::Unavailable { .. })
        | LifecycleError::Network(_) => {
            "The authorization service could not be reached. Please try again later.".to_string()
        }
        LifecycleError::Storage(_) => {
            "Renewed credentials could not be saved. Check the credential store.".to_string()
        }
        LifecycleError::Call(CallError::AuthRejected { .. }) => {
            "The API rejected renewed credentials. Re-authorize the integration.".to_string()
        }
        _ => "The request could not be completed. Please try again.".to_string(),
    }
}
