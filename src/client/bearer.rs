//! Bearer API Client
//!
//! Minimal JSON client for REST APIs authenticated with an OAuth bearer
//! token. Failures are reported as `ApiError` with the provider's error code
//! extracted from the body.

use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::client::ApiClientBuilder;
use crate::core::{HttpMethod, HttpRequest, HttpTransport};
use crate::error::{ApiError, LifecycleResult};
use crate::types::{AccessToken, Environment, DEFAULT_TIMEOUT_SECS};

/// QuickBooks Online production API base.
pub const QUICKBOOKS_PRODUCTION_BASE: &str = "https://quickbooks.api.intuit.com/v3/company";

/// QuickBooks Online sandbox API base.
pub const QUICKBOOKS_SANDBOX_BASE: &str = "https://sandbox-quickbooks.api.intuit.com/v3/company";

/// Builds `BearerApiClient`s scoped to `{base}/{tenant_id}`.
pub struct BearerClientBuilder<T: HttpTransport> {
    transport: Arc<T>,
    base_url: Option<String>,
    timeout: Duration,
}

impl<T: HttpTransport> BearerClientBuilder<T> {
    /// Builder targeting the QuickBooks API of the record's environment.
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            base_url: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Use a fixed API base instead of the per-environment default.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Per-request transport timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn base_for(&self, environment: Environment) -> &str {
        match (&self.base_url, environment) {
            (Some(base), _) => base.as_str(),
            (None, Environment::Production) => QUICKBOOKS_PRODUCTION_BASE,
            (None, Environment::Sandbox) => QUICKBOOKS_SANDBOX_BASE,
        }
    }
}

impl<T: HttpTransport> ApiClientBuilder for BearerClientBuilder<T> {
    type Client = BearerApiClient<T>;

    fn build(
        &self,
        token: &AccessToken,
        tenant_id: &str,
        environment: Environment,
    ) -> LifecycleResult<BearerApiClient<T>> {
        let base = self.base_for(environment).trim_end_matches('/');
        Ok(BearerApiClient {
            base_url: format!("{}/{}", base, tenant_id),
            authorization: SecretString::new(token.authorization_header()),
            transport: self.transport.clone(),
            timeout: self.timeout,
        })
    }
}

/// API client bound to one access token and tenant.
pub struct BearerApiClient<T: HttpTransport> {
    base_url: String,
    authorization: SecretString,
    transport: Arc<T>,
    timeout: Duration,
}

impl<T: HttpTransport> BearerApiClient<T> {
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `{base_url}/{path}` and return the JSON body.
    pub async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, ApiError> {
        let mut url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        if !query.is_empty() {
            let encoded = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(query)
                .finish();
            url.push('?');
            url.push_str(&encoded);
        }

        let request = HttpRequest::new(HttpMethod::Get, url)
            .header("authorization", self.authorization.expose_secret().as_str())
            .header("accept", "application/json")
            .timeout(self.timeout);

        let response = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(parse_api_error(response.status, &response.body));
        }

        serde_json::from_str(&response.body).map_err(|e| ApiError::decode(e.to_string()))
    }

    /// GET and deserialize into `R`.
    pub async fn get<R: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<R, ApiError> {
        let value = self.get_json(path, query).await?;
        serde_json::from_value(value).map_err(|e| ApiError::decode(e.to_string()))
    }

    /// Run a QuickBooks query statement.
    pub async fn query(&self, statement: &str) -> Result<Value, ApiError> {
        self.get_json("query", &[("query", statement)]).await
    }
}

/// Case-insensitive field lookup; Intuit sends both `Fault` and `fault`.
fn field<'a>(value: &'a Value, name: &str) -> Option<&'a Value> {
    value
        .as_object()?
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, v)| v)
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Extract `(code, message)` from the error shapes the supported providers use.
fn provider_error(body: &Value) -> Option<(Option<String>, Option<String>)> {
    // Intuit: {"Fault": {"Error": [{"Message", "Detail", "code"}], "type"}}
    if let Some(fault) = field(body, "Fault") {
        let first = field(fault, "Error")
            .and_then(Value::as_array)
            .and_then(|errors| errors.first());
        let code = first.and_then(|e| field(e, "code")).and_then(as_text);
        let message = first
            .and_then(|e| field(e, "Detail").or_else(|| field(e, "Message")))
            .and_then(as_text);
        return Some((code, message));
    }

    let error = field(body, "error")?;
    match error {
        // OAuth bearer: {"error": "invalid_token", "error_description": ...}
        Value::String(code) => Some((
            Some(code.clone()),
            field(body, "error_description").and_then(as_text),
        )),
        // Microsoft Graph: {"error": {"code", "message"}}
        Value::Object(_) => Some((
            field(error, "code").and_then(as_text),
            field(error, "message").and_then(as_text),
        )),
        _ => None,
    }
}

/// Turn a non-success response into an `ApiError`.
pub fn parse_api_error(status: u16, body: &str) -> ApiError {
    let parsed = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| provider_error(&value));

    match parsed {
        Some((code, message)) => ApiError::http(
            status,
            code,
            message.unwrap_or_else(|| format!("HTTP {}", status)),
        ),
        None => ApiError::http(status, None, format!("HTTP {}", status)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{HttpResponse, MockHttpTransport};
    use crate::error::ApiErrorKind;

    fn client(transport: Arc<MockHttpTransport>, environment: Environment) -> BearerApiClient<MockHttpTransport> {
        let token = AccessToken::new("A1".to_string(), None, None);
        BearerClientBuilder::new(transport)
            .build(&token, "9130", environment)
            .unwrap()
    }

    #[test]
    fn test_base_url_per_environment() {
        let transport = Arc::new(MockHttpTransport::new());
        assert_eq!(
            client(transport.clone(), Environment::Sandbox).base_url(),
            "https://sandbox-quickbooks.api.intuit.com/v3/company/9130"
        );
        assert_eq!(
            client(transport, Environment::Production).base_url(),
            "https://quickbooks.api.intuit.com/v3/company/9130"
        );
    }

    #[tokio::test]
    async fn test_query_sends_bearer_token() {
        let transport = Arc::new(MockHttpTransport::new());
        transport.queue_json_response(200, &serde_json::json!({"QueryResponse": {}}));

        let client = client(transport.clone(), Environment::Sandbox);
        client.query("select * from Invoice").await.unwrap();

        let request = transport.get_last_request().unwrap();
        assert_eq!(
            request.headers.get("authorization").map(String::as_str),
            Some("Bearer A1")
        );
        assert!(request
            .url
            .ends_with("/9130/query?query=select+*+from+Invoice"));
    }

    #[tokio::test]
    async fn test_unauthorized_response() {
        let transport = Arc::new(MockHttpTransport::new());
        transport.queue_response(HttpResponse::new(401, ""));

        let error = client(transport, Environment::Sandbox)
            .get_json("companyinfo/9130", &[])
            .await
            .unwrap_err();

        assert_eq!(error.kind, ApiErrorKind::Http);
        assert_eq!(error.status, Some(401));
        assert_eq!(error.provider_code, None);
    }

    #[test]
    fn test_parse_intuit_fault() {
        let body = r#"{"fault":{"error":[{"message":"message=AuthenticationFailed; errorCode=003200; statusCode=401","detail":"Token expired: A1","code":"3200"}],"type":"AUTHENTICATION"},"time":"2024-01-15T12:00:00.000-08:00"}"#;
        let error = parse_api_error(401, body);

        assert_eq!(error.provider_code.as_deref(), Some("3200"));
        assert_eq!(error.message, "Token expired: A1");
    }

    #[test]
    fn test_parse_graph_error() {
        let body = r#"{"error":{"code":"InvalidAuthenticationToken","message":"Access token has expired or is not yet valid."}}"#;
        let error = parse_api_error(401, body);

        assert_eq!(
            error.provider_code.as_deref(),
            Some("InvalidAuthenticationToken")
        );
    }

    #[test]
    fn test_parse_oauth_error_and_plain_body() {
        let error = parse_api_error(400, r#"{"error":"invalid_token","error_description":"expired"}"#);
        assert_eq!(error.provider_code.as_deref(), Some("invalid_token"));
        assert_eq!(error.message, "expired");

        let error = parse_api_error(502, "<html>Bad Gateway</html>");
        assert_eq!(error.provider_code, None);
        assert_eq!(error.message, "HTTP 502");
    }
}
