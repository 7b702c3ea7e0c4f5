//! Refresh Token Grant
//!
//! RFC 6749 Section 6 - exchanging a refresh token for a new token pair.

use async_trait::async_trait;
use base64::Engine;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::core::{HttpMethod, HttpRequest, HttpTransport};
use crate::error::{create_error_from_response, LifecycleError, ProtocolError};
use crate::types::{ClientAuthMethod, ClientIdentity, LifecycleConfig, RefreshedTokens, TokenResponse};

/// Performs the provider's refresh-grant exchange.
#[async_trait]
pub trait AuthGateway: Send + Sync {
    /// Trade `refresh_token` for a new token pair on behalf of `identity`.
    async fn refresh(
        &self,
        refresh_token: &str,
        identity: &ClientIdentity,
    ) -> Result<RefreshedTokens, LifecycleError>;
}

/// Refresh-grant exchange over HTTP.
pub struct HttpAuthGateway<T: HttpTransport> {
    token_endpoint: String,
    auth_method: ClientAuthMethod,
    timeout: Duration,
    transport: Arc<T>,
}

impl<T: HttpTransport> HttpAuthGateway<T> {
    /// Create new gateway.
    pub fn new(config: &LifecycleConfig, transport: Arc<T>) -> Self {
        Self {
            token_endpoint: config.token_endpoint.clone(),
            auth_method: config.auth_method,
            timeout: config.http_timeout,
            transport,
        }
    }

    fn build_request_body(&self, refresh_token: &str, identity: &ClientIdentity) -> String {
        let mut form = url::form_urlencoded::Serializer::new(String::new());
        form.append_pair("grant_type", "refresh_token");
        form.append_pair("refresh_token", refresh_token);

        if self.auth_method == ClientAuthMethod::ClientSecretPost {
            form.append_pair("client_id", &identity.client_id);
            form.append_pair("client_secret", identity.secret());
        }

        form.finish()
    }

    fn build_request(&self, refresh_token: &str, identity: &ClientIdentity) -> HttpRequest {
        let mut request = HttpRequest::new(HttpMethod::Post, &self.token_endpoint)
            .header("content-type", "application/x-www-form-urlencoded")
            .header("accept", "application/json")
            .body(self.build_request_body(refresh_token, identity))
            .timeout(self.timeout);

        if self.auth_method == ClientAuthMethod::ClientSecretBasic {
            let credentials = format!("{}:{}", identity.client_id, identity.secret());
            let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
            request = request.header("authorization", format!("Basic {}", encoded));
        }

        request
    }
}

#[async_trait]
impl<T: HttpTransport> AuthGateway for HttpAuthGateway<T> {
    async fn refresh(
        &self,
        refresh_token: &str,
        identity: &ClientIdentity,
    ) -> Result<RefreshedTokens, LifecycleError> {
        let request = self.build_request(refresh_token, identity);
        let response = self.transport.send(request).await?;

        if response.status != 200 {
            return Err(create_error_from_response(response.status, &response.body));
        }

        let token_response: TokenResponse =
            serde_json::from_str(&response.body).map_err(|e| ProtocolError::InvalidJson {
                message: e.to_string(),
            })?;

        if token_response.access_token.is_empty() {
            return Err(ProtocolError::MissingField {
                field: "access_token".to_string(),
            }
            .into());
        }

        Ok(RefreshedTokens::from_response(token_response, refresh_token))
    }
}

/// Mock gateway for testing.
///
/// Queued outcomes are returned in order; once the queue is empty each call
/// mints `access-N`/`refresh-N` for the N-th exchange.
#[derive(Default)]
pub struct MockAuthGateway {
    outcomes: Mutex<VecDeque<Result<RefreshedTokens, LifecycleError>>>,
    refresh_history: Mutex<Vec<String>>,
    calls: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl MockAuthGateway {
    /// Create new mock gateway.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful exchange.
    pub fn queue_tokens(&self, access_token: &str, refresh_token: &str) -> &Self {
        self.outcomes.lock().unwrap().push_back(Ok(RefreshedTokens {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            expires_in: None,
            refresh_token_expires_in: None,
        }));
        self
    }

    /// Queue a successful exchange with a provider-reported lifetime.
    pub fn queue_tokens_expiring(
        &self,
        access_token: &str,
        refresh_token: &str,
        expires_in: u64,
    ) -> &Self {
        self.outcomes.lock().unwrap().push_back(Ok(RefreshedTokens {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            expires_in: Some(expires_in),
            refresh_token_expires_in: None,
        }));
        self
    }

    /// Queue a failed exchange.
    pub fn queue_error(&self, error: LifecycleError) -> &Self {
        self.outcomes.lock().unwrap().push_back(Err(error));
        self
    }

    /// Hold every exchange open for `delay` before answering.
    pub fn set_delay(&self, delay: Duration) -> &Self {
        *self.delay.lock().unwrap() = Some(delay);
        self
    }

    /// Number of exchanges issued.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Refresh tokens presented, in order.
    pub fn get_refresh_history(&self) -> Vec<String> {
        self.refresh_history.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuthGateway for MockAuthGateway {
    async fn refresh(
        &self,
        refresh_token: &str,
        _identity: &ClientIdentity,
    ) -> Result<RefreshedTokens, LifecycleError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.refresh_history
            .lock()
            .unwrap()
            .push(refresh_token.to_string());

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let queued = self.outcomes.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| {
            Ok(RefreshedTokens {
                access_token: format!("access-{}", n),
                refresh_token: format!("refresh-{}", n),
                expires_in: None,
                refresh_token_expires_in: None,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{HttpResponse, MockHttpTransport};
    use crate::error::ProviderError;
    use crate::types::{Environment, DEFAULT_REDIRECT_URI};

    fn identity() -> ClientIdentity {
        ClientIdentity::new("client-id", "client-secret", DEFAULT_REDIRECT_URI, Environment::Sandbox)
    }

    fn gateway(transport: Arc<MockHttpTransport>, method: ClientAuthMethod) -> HttpAuthGateway<MockHttpTransport> {
        let config = LifecycleConfig {
            token_endpoint: "https://oauth.example.com/token".to_string(),
            auth_method: method,
            ..Default::default()
        };
        HttpAuthGateway::new(&config, transport)
    }

    #[tokio::test]
    async fn test_refresh_uses_basic_auth_and_form_body() {
        let transport = Arc::new(MockHttpTransport::new());
        transport.queue_json_response(
            200,
            &serde_json::json!({
                "access_token": "A2",
                "refresh_token": "R2",
                "expires_in": 3600,
                "token_type": "bearer"
            }),
        );

        let gateway = gateway(transport.clone(), ClientAuthMethod::ClientSecretBasic);
        let tokens = gateway.refresh("R1", &identity()).await.unwrap();

        assert_eq!(tokens.access_token, "A2");
        assert_eq!(tokens.refresh_token, "R2");
        assert_eq!(tokens.expires_in, Some(3600));

        let request = transport.get_last_request().unwrap();
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(
            request.body.as_deref(),
            Some("grant_type=refresh_token&refresh_token=R1")
        );
        let expected = base64::engine::general_purpose::STANDARD.encode("client-id:client-secret");
        assert_eq!(
            request.headers.get("authorization"),
            Some(&format!("Basic {}", expected))
        );
        assert_eq!(request.timeout, Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_refresh_client_secret_post() {
        let transport = Arc::new(MockHttpTransport::new());
        transport.queue_json_response(200, &serde_json::json!({"access_token": "A2"}));

        let gateway = gateway(transport.clone(), ClientAuthMethod::ClientSecretPost);
        let tokens = gateway.refresh("R1", &identity()).await.unwrap();
        assert_eq!(tokens.refresh_token, "R1");

        let request = transport.get_last_request().unwrap();
        assert!(request.headers.get("authorization").is_none());
        let body = request.body.unwrap();
        assert!(body.contains("client_id=client-id"));
        assert!(body.contains("client_secret=client-secret"));
    }

    #[tokio::test]
    async fn test_refresh_invalid_grant() {
        let transport = Arc::new(MockHttpTransport::new());
        transport.queue_response(HttpResponse::new(
            400,
            r#"{"error":"invalid_grant","error_description":"Token invalid"}"#,
        ));

        let gateway = gateway(transport, ClientAuthMethod::ClientSecretBasic);
        let result = gateway.refresh("R1", &identity()).await;

        assert!(matches!(
            result,
            Err(LifecycleError::Provider(ProviderError::InvalidGrant { .. }))
        ));
    }

    #[tokio::test]
    async fn test_refresh_malformed_body() {
        let transport = Arc::new(MockHttpTransport::new());
        transport.queue_response(HttpResponse::new(200, "not json"));

        let gateway = gateway(transport, ClientAuthMethod::ClientSecretBasic);
        let result = gateway.refresh("R1", &identity()).await;

        assert!(matches!(
            result,
            Err(LifecycleError::Protocol(ProtocolError::InvalidJson { .. }))
        ));
    }

    #[tokio::test]
    async fn test_mock_gateway_mints_sequential_tokens() {
        let gateway = MockAuthGateway::new();
        gateway.queue_tokens("A2", "R2");

        let first = gateway.refresh("R1", &identity()).await.unwrap();
        let second = gateway.refresh("R2", &identity()).await.unwrap();

        assert_eq!(first.access_token, "A2");
        assert_eq!(second.access_token, "access-2");
        assert_eq!(gateway.call_count(), 2);
        assert_eq!(gateway.get_refresh_history(), vec!["R1", "R2"]);
    }
}
