//! # Provider HTTP Client
//!
//! Thin wrapper over `reqwest` shared by every adapter: base URL, default
//! auth headers, per-provider timeout and a small retry loop for network
//! failures and 5xx/429 responses. Anything else is returned to the adapter
//! to interpret.

use crate::profile::HttpMethod;
use pay_core::{PaymentError, PaymentResult, ProviderKey};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// A decoded provider response
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    /// JSON body; `Null` for empty bodies, a JSON string for non-JSON bodies
    pub body: serde_json::Value,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub struct ProviderHttp {
    provider: ProviderKey,
    client: Client,
    base_url: String,
    max_retries: u32,
    retry_delay: Duration,
}

impl ProviderHttp {
    pub fn new(
        provider: ProviderKey,
        base_url: impl Into<String>,
        timeout: Duration,
        max_retries: u32,
        default_headers: HeaderMap,
    ) -> PaymentResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(default_headers)
            .build()
            .map_err(|e| PaymentError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            provider,
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_retries,
            retry_delay: Duration::from_millis(250),
        })
    }

    /// Builder: delay before the first retry, doubled each time
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a request, retrying transport failures and 5xx/429 responses.
    pub async fn send(
        &self,
        method: HttpMethod,
        path: &str,
        query: &[(String, String)],
        body: Option<&serde_json::Value>,
    ) -> PaymentResult<ApiResponse> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0u32;

        loop {
            let mut request = self.client.request(method.as_reqwest(), &url);
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            debug!(provider = %self.provider, %url, attempt, "Calling provider API");

            let failure = match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_server_error() || status.as_u16() == 429 {
                        format!("HTTP {}", status)
                    } else {
                        let text = response.text().await.map_err(|e| self.transient(e.to_string()))?;
                        return Ok(ApiResponse {
                            status: status.as_u16(),
                            body: decode_body(&text),
                        });
                    }
                }
                Err(e) if e.is_timeout() => {
                    if attempt >= self.max_retries {
                        return Err(PaymentError::Timeout(format!(
                            "{} did not answer {}",
                            self.provider, path
                        )));
                    }
                    "timeout".to_string()
                }
                Err(e) => e.to_string(),
            };

            if attempt >= self.max_retries {
                return Err(self.transient(failure));
            }

            let delay = self.retry_delay * 2u32.saturating_pow(attempt);
            warn!(
                provider = %self.provider,
                %url,
                attempt,
                error = %failure,
                "Provider call failed, retrying in {:?}",
                delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    fn transient(&self, message: String) -> PaymentError {
        PaymentError::TransientProvider {
            provider: self.provider.to_string(),
            message,
        }
    }
}

fn decode_body(text: &str) -> serde_json::Value {
    if text.trim().is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| serde_json::Value::String(text.to_string()))
}

/// Build a header map from (name, value) pairs, rejecting invalid values
pub fn header_map<'a>(
    pairs: impl IntoIterator<Item = (&'a str, String)>,
) -> PaymentResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| PaymentError::Configuration(format!("invalid header name {}: {}", name, e)))?;
        let mut value = HeaderValue::from_str(&value)
            .map_err(|e| PaymentError::Configuration(format!("invalid header value for {}: {}", name, e)))?;
        if name == AUTHORIZATION || name.as_str().contains("key") {
            value.set_sensitive(true);
        }
        headers.insert(name, value);
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, retries: u32) -> ProviderHttp {
        ProviderHttp::new(
            ProviderKey::CardGateway,
            server.uri(),
            Duration::from_secs(5),
            retries,
            HeaderMap::new(),
        )
        .unwrap()
        .with_retry_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_client_errors_are_returned_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/deals/D1"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"code": "404"})))
            .expect(1)
            .mount(&server)
            .await;

        let response = client(&server, 2)
            .send(HttpMethod::Get, "/deals/D1", &[], None)
            .await
            .unwrap();
        assert_eq!(response.status, 404);
        assert!(!response.is_success());
        assert_eq!(response.body["code"], "404");
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_then_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/terminal/status"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let err = client(&server, 2)
            .send(HttpMethod::Get, "/terminal/status", &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::TransientProvider { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_decode_body_variants() {
        assert_eq!(decode_body(""), serde_json::Value::Null);
        assert_eq!(decode_body("{\"a\":1}"), json!({"a": 1}));
        assert_eq!(decode_body("OK"), json!("OK"));
    }

    #[test]
    fn test_header_map_marks_secrets_sensitive() {
        let headers = header_map([("X-Api-Key", "secret".to_string())]).unwrap();
        assert!(headers.get("x-api-key").unwrap().is_sensitive());
        assert!(header_map([("bad header", "v".to_string())]).is_err());
    }
}
