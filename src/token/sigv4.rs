//! AWS Signature Version 4
//!
//! Signs JSON-protocol requests to AWS services:
//! canonical request, string to sign, derived signing key, `Authorization` header.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::core::HttpRequest;
use crate::error::{LifecycleError, ProtocolError};

type HmacSha256 = Hmac<Sha256>;

/// Signature algorithm identifier.
pub const AWS_ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Inputs to a signature.
pub struct SigningParams<'a> {
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
    pub session_token: Option<&'a str>,
    pub region: &'a str,
    pub service: &'a str,
}

/// Hex-encoded SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, LifecycleError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| ProtocolError::SigningFailed {
        message: e.to_string(),
    })?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Derive the per-day signing key.
pub fn derive_signing_key(
    secret_key: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>, LifecycleError> {
    let k_date = hmac_sha256(format!("AWS4{}", secret_key).as_bytes(), date_stamp.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding with the unreserved set AWS expects.
fn uri_encode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

fn canonical_query(url: &url::Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (uri_encode(&k), uri_encode(&v)))
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn host_header(url: &url::Url) -> Result<String, LifecycleError> {
    let host = url.host_str().ok_or_else(|| ProtocolError::SigningFailed {
        message: format!("no host in {}", url),
    })?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Add `host`, `x-amz-date`, the optional session token and `authorization`
/// headers to `request`. Every header already on the request is signed.
pub fn sign_request(
    request: HttpRequest,
    params: &SigningParams<'_>,
    now: DateTime<Utc>,
) -> Result<HttpRequest, LifecycleError> {
    let url = url::Url::parse(&request.url).map_err(|e| ProtocolError::SigningFailed {
        message: format!("invalid url {}: {}", request.url, e),
    })?;

    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = now.format("%Y%m%d").to_string();

    let mut request = request
        .header("host", host_header(&url)?)
        .header("x-amz-date", amz_date.clone());
    if let Some(token) = params.session_token {
        request = request.header("x-amz-security-token", token);
    }

    let mut names: Vec<&String> = request.headers.keys().collect();
    names.sort();
    let canonical_headers: String = names
        .iter()
        .map(|name| format!("{}:{}\n", name, request.headers[*name].trim()))
        .collect();
    let signed_headers = names
        .iter()
        .map(|name| name.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let payload_hash = sha256_hex(request.body.as_deref().unwrap_or("").as_bytes());
    let path = if url.path().is_empty() { "/" } else { url.path() };

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        request.method.as_str(),
        path,
        canonical_query(&url),
        canonical_headers,
        signed_headers,
        payload_hash
    );

    let scope = format!(
        "{}/{}/{}/aws4_request",
        date_stamp, params.region, params.service
    );
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        AWS_ALGORITHM,
        amz_date,
        scope,
        sha256_hex(canonical_request.as_bytes())
    );

    let key = derive_signing_key(
        params.secret_access_key,
        &date_stamp,
        params.region,
        params.service,
    )?;
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?);

    let authorization = format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        AWS_ALGORITHM, params.access_key_id, scope, signed_headers, signature
    );

    Ok(request.header("authorization", authorization))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::HttpMethod;
    use chrono::TimeZone;

    fn params() -> SigningParams<'static> {
        SigningParams {
            access_key_id: "AKIDEXAMPLE",
            secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            session_token: None,
            region: "us-east-1",
            service: "secretsmanager",
        }
    }

    #[test]
    fn test_sha256_of_empty_payload() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_signing_key_matches_aws_example() {
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        )
        .unwrap();
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn test_sign_request_adds_headers() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        let request = HttpRequest::new(
            HttpMethod::Post,
            "https://secretsmanager.us-east-1.amazonaws.com/",
        )
        .header("content-type", "application/x-amz-json-1.1")
        .header("x-amz-target", "secretsmanager.GetSecretValue")
        .body(r#"{"SecretId":"qbo-ai/tokens"}"#);

        let signed = sign_request(request, &params(), now).unwrap();

        assert_eq!(
            signed.headers.get("host").map(String::as_str),
            Some("secretsmanager.us-east-1.amazonaws.com")
        );
        assert_eq!(
            signed.headers.get("x-amz-date").map(String::as_str),
            Some("20240115T120000Z")
        );
        let auth = &signed.headers["authorization"];
        assert!(auth.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240115/us-east-1/secretsmanager/aws4_request"
        ));
        assert!(auth.contains("SignedHeaders=content-type;host;x-amz-date;x-amz-target"));
    }

    #[test]
    fn test_session_token_is_signed() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        let mut params = params();
        params.session_token = Some("session");

        let request = HttpRequest::new(HttpMethod::Post, "http://127.0.0.1:9000/");
        let signed = sign_request(request, &params, now).unwrap();

        assert_eq!(
            signed.headers.get("host").map(String::as_str),
            Some("127.0.0.1:9000")
        );
        assert!(signed.headers["authorization"]
            .contains("SignedHeaders=host;x-amz-date;x-amz-security-token"));
    }
}
