use std::collections::BTreeMap;
use std::time::Duration;

use crate::errors::OllamaError;
use crate::retry::RetryPolicy;

/// Host used when none is configured.
pub const DEFAULT_HOST: &str = "http://127.0.0.1:11434";

/// Total timeout applied to single-body calls unless overridden.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Longest stream line accepted before the stream fails.
pub const DEFAULT_MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Configuration for an `OllamaClient`.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Server address. Normalized with [`normalize_host`] at construction.
    pub host: String,
    /// Extra headers sent with every request.
    pub headers: BTreeMap<String, String>,
    /// Optional bearer token, sent as `Authorization: Bearer <token>`.
    pub api_key: Option<String>,
    /// Total timeout for single-body calls, body read included. Streams are
    /// not bounded by it. `None` waits forever.
    pub request_timeout: Option<Duration>,
    /// Timeout for establishing a connection.
    pub connect_timeout: Duration,
    /// Maximum wait between two records of an open stream.
    pub stream_idle_timeout: Option<Duration>,
    /// Retry policy for the initial connection of every call.
    pub retry: RetryPolicy,
    /// Events buffered between a stream's task and its consumer.
    pub stream_buffer_capacity: usize,
    /// Consecutive undecodable lines tolerated before a stream fails.
    ///
    /// `None` skips bad lines without limit.
    pub max_consecutive_decode_failures: Option<u32>,
    /// Bytes a stream may buffer while waiting for a newline.
    pub max_line_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            headers: BTreeMap::new(),
            api_key: None,
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            connect_timeout: Duration::from_secs(10),
            stream_idle_timeout: None,
            retry: RetryPolicy::default(),
            stream_buffer_capacity: 1,
            max_consecutive_decode_failures: Some(32),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

impl ClientConfig {
    /// Creates a config for the given host with defaults for everything else.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Builds a config from `OLLAMA_HOST` and `OLLAMA_API_KEY`.
    ///
    /// Both variables are optional; an unset or blank host falls back to
    /// [`DEFAULT_HOST`].
    pub fn from_env() -> Self {
        let host = std::env::var("OLLAMA_HOST")
            .ok()
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let api_key = std::env::var("OLLAMA_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());
        Self {
            host,
            api_key,
            ..Self::default()
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Adds a custom header sent with every request.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Lets single-body calls wait indefinitely.
    pub fn without_request_timeout(mut self) -> Self {
        self.request_timeout = None;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn stream_idle_timeout(mut self, timeout: Duration) -> Self {
        self.stream_idle_timeout = Some(timeout);
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn stream_buffer_capacity(mut self, capacity: usize) -> Self {
        self.stream_buffer_capacity = capacity;
        self
    }

    pub fn max_consecutive_decode_failures(mut self, limit: Option<u32>) -> Self {
        self.max_consecutive_decode_failures = limit;
        self
    }

    pub fn max_line_bytes(mut self, limit: usize) -> Self {
        self.max_line_bytes = limit;
        self
    }

    pub(crate) fn validate(&self) -> Result<String, OllamaError> {
        if self.stream_buffer_capacity == 0 {
            return Err(OllamaError::Config(
                "stream_buffer_capacity must be greater than 0".into(),
            ));
        }
        if self.max_line_bytes == 0 {
            return Err(OllamaError::Config(
                "max_line_bytes must be greater than 0".into(),
            ));
        }
        if let Some(key) = &self.api_key
            && key.trim().is_empty()
        {
            return Err(OllamaError::Config("api_key must not be blank".into()));
        }
        normalize_host(&self.host)
    }
}

/// Normalizes a configured host into a base URL.
///
/// Adds an `http://` scheme when missing, then works on the path only: strips
/// trailing slashes and an accidental trailing `/api` segment. The result must
/// parse as an http(s) URL with a host.
pub fn normalize_host(raw: &str) -> Result<String, OllamaError> {
    let trimmed = raw.trim();
    let host = if trimmed.is_empty() {
        DEFAULT_HOST
    } else {
        trimmed
    };

    let with_scheme = if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{host}")
    };
    let parsed = url::Url::parse(&with_scheme)
        .map_err(|e| OllamaError::Config(format!("invalid host {raw:?}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(OllamaError::Config(format!(
            "invalid host {raw:?}: unsupported scheme {}",
            parsed.scheme()
        )));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(OllamaError::Config(format!("invalid host {raw:?}: missing host")));
    }

    let authority_start = with_scheme.find("://").map_or(0, |idx| idx + 3);
    let path_start = with_scheme[authority_start..]
        .find('/')
        .map_or(with_scheme.len(), |idx| authority_start + idx);
    let (origin, path) = with_scheme.split_at(path_start);
    let mut path = path.trim_end_matches('/');
    if let Some(stripped) = path.strip_suffix("/api") {
        path = stripped.trim_end_matches('/');
    }
    Ok(format!("{origin}{path}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adds_missing_scheme() {
        assert_eq!(normalize_host("localhost").unwrap(), "http://localhost");
        assert_eq!(
            normalize_host("example.com:11434").unwrap(),
            "http://example.com:11434"
        );
    }

    #[test]
    fn strips_trailing_slash_and_api_suffix() {
        assert_eq!(normalize_host("http://host/api/").unwrap(), "http://host");
        assert_eq!(normalize_host("http://host/api").unwrap(), "http://host");
        assert_eq!(normalize_host("http://host/").unwrap(), "http://host");
        assert_eq!(normalize_host("http://host/proxy/api/").unwrap(), "http://host/proxy");
    }

    #[test]
    fn api_named_host_is_not_mistaken_for_path_suffix() {
        assert_eq!(normalize_host("api").unwrap(), "http://api");
        assert_eq!(normalize_host("api:11434/api").unwrap(), "http://api:11434");
    }

    #[test]
    fn correct_hosts_are_unchanged() {
        for host in [
            "http://127.0.0.1:11434",
            "https://ollama.example.com",
            "http://host/proxy",
            "http://api",
            "http://api:11434",
            "https://api.example.com",
        ] {
            assert_eq!(normalize_host(host).unwrap(), host);
        }
    }

    #[test]
    fn blank_host_uses_default() {
        assert_eq!(normalize_host("  ").unwrap(), DEFAULT_HOST);
    }

    #[test]
    fn malformed_hosts_are_config_errors() {
        for host in ["http://", "ftp://host", "http://exa mple.com"] {
            let err = normalize_host(host).expect_err(host);
            assert!(matches!(err, OllamaError::Config(_)), "{host}: {err:?}");
        }
    }

    #[test]
    fn single_body_calls_have_a_finite_default_timeout() {
        let config = ClientConfig::default();
        assert_eq!(config.request_timeout, Some(DEFAULT_REQUEST_TIMEOUT));
        assert_eq!(config.without_request_timeout().request_timeout, None);
    }

    #[test]
    fn validate_rejects_zero_line_limit() {
        let err = ClientConfig::default()
            .max_line_bytes(0)
            .validate()
            .expect_err("zero line limit");
        assert!(matches!(err, OllamaError::Config(msg) if msg.contains("max_line_bytes")));
    }

    #[test]
    fn validate_rejects_zero_buffer_capacity() {
        let err = ClientConfig::default()
            .stream_buffer_capacity(0)
            .validate()
            .expect_err("zero capacity");
        assert!(matches!(err, OllamaError::Config(msg) if msg.contains("stream_buffer_capacity")));
    }
}
