//! Failure Classification
//!
//! Decides whether a failed API call was rejected for authentication. Only a
//! closed set of signals counts: the HTTP status first, then documented
//! provider error codes. Message text is never inspected.

use crate::error::{ApiError, ApiErrorKind};

/// Class of a failed call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureClass {
    /// The credential was rejected; a refresh may fix it.
    Auth,
    /// Anything else.
    Other,
}

/// Recognized authentication-failure signals.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthSignal {
    /// HTTP 401.
    HttpUnauthorized,
    /// RFC 6750 `invalid_token`.
    InvalidToken,
    /// `token_expired`.
    ExpiredToken,
    /// Intuit fault code 3200 (AuthenticationFailed).
    IntuitAuthenticationFailed,
    /// Microsoft Graph `InvalidAuthenticationToken`.
    GraphInvalidAuthenticationToken,
}

impl AuthSignal {
    /// Provider error codes that signal a rejected credential.
    pub fn from_provider_code(code: &str) -> Option<Self> {
        match code {
            "invalid_token" => Some(Self::InvalidToken),
            "token_expired" => Some(Self::ExpiredToken),
            "3200" | "003200" => Some(Self::IntuitAuthenticationFailed),
            "InvalidAuthenticationToken" => Some(Self::GraphInvalidAuthenticationToken),
            _ => None,
        }
    }

    /// Find the signal carried by `error`, if any.
    pub fn detect(error: &ApiError) -> Option<Self> {
        if error.kind != ApiErrorKind::Http {
            return None;
        }
        if error.status == Some(401) {
            return Some(Self::HttpUnauthorized);
        }
        error
            .provider_code
            .as_deref()
            .and_then(Self::from_provider_code)
    }
}

/// Default classifier.
///
/// Timeouts, connection failures and undecodable bodies are always `Other`.
pub fn classify_api_error(error: &ApiError) -> FailureClass {
    match AuthSignal::detect(error) {
        Some(_) => FailureClass::Auth,
        None => FailureClass::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_401_is_auth() {
        let error = ApiError::http(401, None, "Unauthorized");
        assert_eq!(AuthSignal::detect(&error), Some(AuthSignal::HttpUnauthorized));
        assert_eq!(classify_api_error(&error), FailureClass::Auth);
    }

    #[test]
    fn test_provider_codes_are_auth() {
        let intuit = ApiError::http(400, Some("3200".to_string()), "AuthenticationFailed");
        assert_eq!(
            AuthSignal::detect(&intuit),
            Some(AuthSignal::IntuitAuthenticationFailed)
        );

        let graph = ApiError::http(
            403,
            Some("InvalidAuthenticationToken".to_string()),
            "Access token has expired",
        );
        assert_eq!(classify_api_error(&graph), FailureClass::Auth);
    }

    #[test]
    fn test_other_failures() {
        // Message text mentioning tokens does not make a failure auth-related.
        let error = ApiError::http(400, Some("6000".to_string()), "token field 401 expired");
        assert_eq!(classify_api_error(&error), FailureClass::Other);

        assert_eq!(
            classify_api_error(&ApiError::http(403, None, "Forbidden")),
            FailureClass::Other
        );
        assert_eq!(
            classify_api_error(&ApiError::http(500, None, "Internal")),
            FailureClass::Other
        );
        assert_eq!(
            classify_api_error(&ApiError::timeout(Duration::from_secs(30))),
            FailureClass::Other
        );
        assert_eq!(
            classify_api_error(&ApiError::connection("reset")),
            FailureClass::Other
        );
    }
}
