//! API client for the application's session endpoints.
//!
//! `ApiClient` joins request paths onto the configured base URL and reads
//! the `Authorization` header from the shared `RequestAuthenticator` on
//! every request, so attaching or detaching a credential takes effect for
//! all clones at once.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method};
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::RequestAuthenticator;

use super::{ApiError, Transport};

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// API client for the session backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    authenticator: RequestAuthenticator,
}

impl ApiClient {
    /// Create a new API client bound to `base_url`
    pub fn new(
        base_url: &str,
        timeout: Duration,
        authenticator: RequestAuthenticator,
    ) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            authenticator,
        })
    }

    /// The header slot this client reads from
    pub fn authenticator(&self) -> &RequestAuthenticator {
        &self.authenticator
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn auth_headers(&self) -> header::HeaderMap {
        let mut headers = header::HeaderMap::new();
        if let Some(value) = self.authenticator.authorization() {
            match header::HeaderValue::from_str(&value) {
                Ok(mut value) => {
                    value.set_sensitive(true);
                    headers.insert(header::AUTHORIZATION, value);
                }
                Err(e) => warn!(error = %e, "Credential is not a valid header value, sending without it"),
            }
        }
        headers
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Parse a success body, treating an empty body as JSON null
    fn parse_body(text: &str) -> Result<Value, ApiError> {
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON body: {}", e)))
    }

    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value, ApiError> {
        let url = self.url(path);
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .header(header::ACCEPT, "application/json")
                .headers(self.auth_headers());
            if let Some(body) = body {
                request = request.json(body);
            }

            debug!(%method, url = %url, "Sending request");
            let response = request.send().await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => {
                    let text = response.text().await?;
                    return Self::parse_body(&text);
                }
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(url = %url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
            }
        }
    }
}

#[async_trait]
impl Transport for ApiClient {
    async fn get(&self, path: &str) -> Result<Value, ApiError> {
        self.send(Method::GET, path, None).await
    }

    async fn post(&self, path: &str, body: Option<Value>) -> Result<Value, ApiError> {
        self.send(Method::POST, path, body.as_ref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> ApiClient {
        ApiClient::new(base, Duration::from_secs(5), RequestAuthenticator::new())
            .expect("client should build")
    }

    #[test]
    fn test_url_joining() {
        let api = client("https://api.example.com/");
        assert_eq!(api.url("/user"), "https://api.example.com/user");
        assert_eq!(api.url("logout"), "https://api.example.com/logout");

        let api = client("https://api.example.com/v1");
        assert_eq!(api.url("/auth/google"), "https://api.example.com/v1/auth/google");
    }

    #[test]
    fn test_parse_body() {
        assert_eq!(ApiClient::parse_body("").unwrap(), Value::Null);
        assert_eq!(ApiClient::parse_body("  \n").unwrap(), Value::Null);
        assert_eq!(ApiClient::parse_body(r#"{"ok":true}"#).unwrap()["ok"], true);
        assert!(matches!(
            ApiClient::parse_body("<html>"),
            Err(ApiError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_auth_headers_follow_authenticator() {
        let api = client("https://api.example.com");
        assert!(api.auth_headers().get(header::AUTHORIZATION).is_none());

        api.authenticator().attach("tok1").unwrap();
        let headers = api.auth_headers();
        assert_eq!(headers.get(header::AUTHORIZATION).unwrap(), "Bearer tok1");

        // A clone shares the same slot
        let other = api.clone();
        api.authenticator().detach();
        assert!(other.auth_headers().get(header::AUTHORIZATION).is_none());
    }
}
