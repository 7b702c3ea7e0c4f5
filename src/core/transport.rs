//! HTTP Transport
//!
//! HTTP client interface and implementations shared by the refresh-grant
//! gateway, the remote secret store and bearer API clients.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{LifecycleError, NetworkError, ProtocolError};

/// Default cap on response bodies (1MB).
pub const DEFAULT_MAX_RESPONSE_SIZE: usize = 1_048_576;

/// HTTP request definition.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: HttpMethod,
    /// Request URL.
    pub url: String,
    /// Request headers.
    pub headers: HashMap<String, String>,
    /// Request body.
    pub body: Option<String>,
    /// Request timeout.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Create a request without headers or body.
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// Add a header (names are stored lowercase).
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Set the body.
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set the timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// HTTP method.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

/// HTTP response definition.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers (lowercase names).
    pub headers: HashMap<String, String>,
    /// Response body.
    pub body: String,
}

impl HttpResponse {
    /// Build a response with a body and no headers.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP transport interface (for dependency injection).
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send an HTTP request.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LifecycleError>;
}

/// Default reqwest-based HTTP transport.
pub struct ReqwestHttpTransport {
    client: reqwest::Client,
    default_timeout: Duration,
    max_response_size: usize,
}

impl ReqwestHttpTransport {
    /// Create new transport with default settings.
    pub fn new() -> Result<Self, LifecycleError> {
        Self::with_options(Duration::from_secs(30), DEFAULT_MAX_RESPONSE_SIZE)
    }

    /// Create transport with custom options.
    pub fn with_options(
        timeout: Duration,
        max_response_size: usize,
    ) -> Result<Self, LifecycleError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| NetworkError::TlsError {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            default_timeout: timeout,
            max_response_size,
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestHttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LifecycleError> {
        let timeout = request.timeout.unwrap_or(self.default_timeout);

        let mut req_builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
            HttpMethod::Put => self.client.put(&request.url),
            HttpMethod::Delete => self.client.delete(&request.url),
        };

        for (key, value) in &request.headers {
            req_builder = req_builder.header(key, value);
        }

        if let Some(body) = request.body {
            req_builder = req_builder.body(body);
        }

        let response = req_builder.timeout(timeout).send().await.map_err(|e| {
            if e.is_timeout() {
                NetworkError::Timeout { timeout }
            } else {
                NetworkError::ConnectionFailed {
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();

        if (300..400).contains(&status) {
            let location = response
                .headers()
                .get("location")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            return Err(ProtocolError::UnexpectedRedirect { location }.into());
        }

        let mut headers = HashMap::new();
        for (key, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(key.as_str().to_ascii_lowercase(), v.to_string());
            }
        }

        if let Some(len) = response.content_length() {
            if len as usize > self.max_response_size {
                return Err(ProtocolError::ResponseTooLarge { size: len as usize }.into());
            }
        }

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                LifecycleError::from(NetworkError::Timeout { timeout })
            } else {
                ProtocolError::InvalidResponse {
                    message: e.to_string(),
                }
                .into()
            }
        })?;

        if body.len() > self.max_response_size {
            return Err(ProtocolError::ResponseTooLarge { size: body.len() }.into());
        }

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Mock HTTP transport for testing. Responses are returned in the order queued.
#[derive(Default)]
pub struct MockHttpTransport {
    responses: Mutex<VecDeque<Result<HttpResponse, LifecycleError>>>,
    request_history: Mutex<Vec<HttpRequest>>,
    default_response: Mutex<Option<HttpResponse>>,
}

impl MockHttpTransport {
    /// Create new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response to return.
    pub fn queue_response(&self, response: HttpResponse) -> &Self {
        self.responses.lock().unwrap().push_back(Ok(response));
        self
    }

    /// Queue a JSON response.
    pub fn queue_json_response<T: serde::Serialize>(&self, status: u16, body: &T) -> &Self {
        let mut response = HttpResponse::new(status, serde_json::to_string(body).unwrap());
        response
            .headers
            .insert("content-type".to_string(), "application/json".to_string());
        self.queue_response(response)
    }

    /// Queue a transport-level failure.
    pub fn queue_error(&self, error: LifecycleError) -> &Self {
        self.responses.lock().unwrap().push_back(Err(error));
        self
    }

    /// Set default response when queue is empty.
    pub fn set_default_response(&self, response: HttpResponse) -> &Self {
        *self.default_response.lock().unwrap() = Some(response);
        self
    }

    /// Get request history.
    pub fn get_requests(&self) -> Vec<HttpRequest> {
        self.request_history.lock().unwrap().clone()
    }

    /// Get last request.
    pub fn get_last_request(&self) -> Option<HttpRequest> {
        self.request_history.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl HttpTransport for MockHttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LifecycleError> {
        self.request_history.lock().unwrap().push(request);

        let queued = self.responses.lock().unwrap().pop_front();
        match queued {
            Some(result) => result,
            None => self.default_response.lock().unwrap().clone().ok_or_else(|| {
                NetworkError::ConnectionFailed {
                    message: "No mock response available".to_string(),
                }
                .into()
            }),
        }
    }
}
