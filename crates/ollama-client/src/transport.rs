use std::time::Duration;

use futures::StreamExt as _;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::decoder::ByteStream;
use crate::errors::OllamaError;
use crate::operation::Operation;
use crate::retry::RetryPolicy;

/// Value of the fixed `User-Agent` header.
pub fn user_agent() -> String {
    format!(
        "ollama-client-rust/{} ({} {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::ARCH,
        std::env::consts::OS
    )
}

/// HTTP layer shared by every call of one client.
///
/// Non-success statuses are returned as-is; interpreting them is up to the
/// caller since the server encodes structured error bodies.
pub(crate) struct Transport {
    client: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
    request_timeout: Option<Duration>,
}

impl Transport {
    pub fn new(config: &ClientConfig) -> Result<Self, OllamaError> {
        let base_url = config.validate()?;
        let client = reqwest::Client::builder()
            .default_headers(build_headers(config)?)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| OllamaError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url,
            retry: config.retry.clone(),
            request_timeout: config.request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Sends one call, retrying network failures and 5xx statuses according
    /// to the retry policy. Streaming calls are not bounded by the request
    /// timeout, only by the connect timeout.
    pub async fn send(
        &self,
        op: &Operation,
        body: Option<&serde_json::Value>,
        streaming: bool,
    ) -> Result<reqwest::Response, OllamaError> {
        let url = self.url(op.path);
        let mut retries_done = 0_u32;
        loop {
            let mut request = self.client.request(op.method.as_reqwest(), &url);
            if let Some(body) = body {
                request = request.json(body);
            }
            if !streaming && let Some(timeout) = self.request_timeout {
                request = request.timeout(timeout);
            }

            let attempt = retries_done + 1;
            debug!(operation = %op.kind, method = %op.method, path = op.path, attempt, "sending request");
            match request.send().await {
                Ok(response)
                    if response.status().is_server_error() && self.retry.can_retry(retries_done) =>
                {
                    warn!(
                        operation = %op.kind,
                        status = response.status().as_u16(),
                        attempt,
                        "server error, retrying"
                    );
                }
                Ok(response) => return Ok(response),
                Err(e) if is_retryable(&e) && self.retry.can_retry(retries_done) => {
                    warn!(operation = %op.kind, attempt, error = %e, "request failed, retrying");
                }
                Err(e) => {
                    return Err(OllamaError::network(format!(
                        "{} {} failed: {e}",
                        op.method, op.path
                    )));
                }
            }

            tokio::time::sleep(self.retry.next_delay(retries_done)).await;
            retries_done += 1;
        }
    }
}

fn is_retryable(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout() || err.is_request()
}

fn build_headers(config: &ClientConfig) -> Result<HeaderMap, OllamaError> {
    let mut headers = HeaderMap::new();
    for (name, value) in &config.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| OllamaError::Config(format!("invalid header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| OllamaError::Config(format!("invalid value for header {name}: {e}")))?;
        headers.insert(name, value);
    }
    if let Some(key) = &config.api_key
        && !headers.contains_key(AUTHORIZATION)
    {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", key.trim()))
            .map_err(|e| OllamaError::Config(format!("invalid api key: {e}")))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    let agent = HeaderValue::from_str(&user_agent())
        .map_err(|e| OllamaError::Config(format!("invalid user agent: {e}")))?;
    headers.insert(USER_AGENT, agent);
    Ok(headers)
}

/// Turns a non-success response into a response error.
pub(crate) async fn error_from_response(response: reqwest::Response) -> OllamaError {
    let status = response.status();
    let text = match response.text().await {
        Ok(text) => text,
        Err(e) => {
            warn!(status = status.as_u16(), error = %e, "failed to read error body");
            String::new()
        }
    };
    error_from_body(status, &text)
}

/// Prefers the server's `{"error": "..."}` message and falls back to the raw
/// body text, then to the status reason.
fn error_from_body(status: reqwest::StatusCode, text: &str) -> OllamaError {
    let message = serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(ToOwned::to_owned))
        .unwrap_or_else(|| {
            let raw = text.trim();
            if raw.is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            } else {
                raw.to_string()
            }
        });
    OllamaError::response(message, Some(status.as_u16()))
}

/// Body of a successful streaming response as a byte stream.
pub(crate) fn body_stream(response: reqwest::Response) -> ByteStream {
    Box::pin(
        response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| OllamaError::network(format!("stream read failed: {e}")))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_headers_override_custom_ones() {
        let config = ClientConfig::default()
            .header("X-Trace", "abc")
            .header("User-Agent", "spoofed")
            .api_key("secret");
        let headers = build_headers(&config).expect("headers");
        assert_eq!(headers["x-trace"], "abc");
        assert_eq!(headers[USER_AGENT], user_agent().as_str());
        assert_eq!(headers[AUTHORIZATION], "Bearer secret");
        assert_eq!(headers[CONTENT_TYPE], "application/json");
    }

    #[test]
    fn explicit_authorization_header_wins_over_api_key() {
        let config = ClientConfig::default()
            .header("Authorization", "Basic xyz")
            .api_key("secret");
        let headers = build_headers(&config).expect("headers");
        assert_eq!(headers[AUTHORIZATION], "Basic xyz");
    }

    #[test]
    fn invalid_header_is_config_error() {
        let config = ClientConfig::default().header("bad header", "x");
        assert!(matches!(build_headers(&config), Err(OllamaError::Config(_))));
    }

    #[test]
    fn unreadable_or_empty_error_body_falls_back_to_status_reason() {
        let err = error_from_body(reqwest::StatusCode::BAD_GATEWAY, "");
        assert_eq!(err.message(), "Bad Gateway");
        assert_eq!(err.status_code(), Some(502));

        let err = error_from_body(
            reqwest::StatusCode::NOT_FOUND,
            "{\"error\":\"model 'x' not found\"}",
        );
        assert_eq!(err.message(), "model 'x' not found");

        let err = error_from_body(reqwest::StatusCode::BAD_REQUEST, "  plain failure\n");
        assert_eq!(err.message(), "plain failure");
    }

    #[test]
    fn url_joins_normalized_host_and_path() {
        let transport =
            Transport::new(&ClientConfig::new("localhost:11434/api/")).expect("transport");
        assert_eq!(transport.base_url(), "http://localhost:11434");
        assert_eq!(transport.url("/api/tags"), "http://localhost:11434/api/tags");
    }
}
