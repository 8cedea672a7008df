/// Errors returned by the client, its streams, and the image encoder.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OllamaError {
    /// Invalid client construction or use of a closed client.
    #[error("config error: {0}")]
    Config(String),
    /// Caller-supplied request failed a required-field check.
    #[error("validation error: {0}")]
    Validation(String),
    /// Server answered with a failure, either as a non-success status or as an
    /// `error` record inside an otherwise successful stream.
    #[error("{}", format_response_error(message, *status_code))]
    Response {
        message: String,
        status_code: Option<u16>,
    },
    /// Connection, timeout, or body read failure.
    #[error("network error: {0}")]
    Network(String),
    /// Body or stream content that cannot be decoded into the expected shape.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Image encoding failed (missing file, unreadable file, invalid base64).
    #[error("image error: {0}")]
    Image(String),
    /// The stream was stopped on request.
    #[error("stream cancelled")]
    Cancelled,
}

fn format_response_error(message: &str, status_code: Option<u16>) -> String {
    match status_code {
        Some(code) => format!("response error (status {code}): {message}"),
        None => format!("response error: {message}"),
    }
}

impl OllamaError {
    /// Creates a response error.
    pub fn response(message: impl Into<String>, status_code: Option<u16>) -> Self {
        Self::Response {
            message: message.into(),
            status_code,
        }
    }

    pub(crate) fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Returns the human-readable message for this error.
    pub fn message(&self) -> &str {
        match self {
            Self::Config(message)
            | Self::Validation(message)
            | Self::Network(message)
            | Self::Protocol(message)
            | Self::Image(message)
            | Self::Response { message, .. } => message,
            Self::Cancelled => "stream cancelled",
        }
    }

    /// Returns the HTTP status code for response errors raised from a status.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Response { status_code, .. } => *status_code,
            _ => None,
        }
    }

    /// True when the error marks an intentional stop rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
