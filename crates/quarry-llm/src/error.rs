use std::time::Duration;

/// Whether a failed provider call may succeed if repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Fatal,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("{provider} rejected credentials (status {status})")]
    Unauthorized { provider: String, status: u16 },

    #[error("{provider} rejected request (status {status}): {message}")]
    Rejected {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("empty response from {provider}")]
    EmptyResponse { provider: String },

    #[error("embedding not supported by {provider}")]
    EmbedUnsupported { provider: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("batch of {size} texts exceeds provider limit of {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error("expected {expected} embeddings, provider returned {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("embedding dimensionality mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("request cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl LlmError {
    /// Classify the error for retry decisions.
    ///
    /// Rate limits, timeouts, connection failures and 5xx responses are transient.
    /// Everything else (bad credentials, malformed requests, unparseable responses,
    /// local validation) is fatal.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::RateLimited { .. } | Self::Unavailable(_) | Self::Timeout(_) => {
                ErrorClass::Transient
            }
            Self::Http(e) => {
                let server_error = e.status().is_some_and(|s| s.is_server_error());
                if e.is_timeout() || e.is_connect() || e.is_body() || server_error {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Fatal
                }
            }
            _ => ErrorClass::Fatal,
        }
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;
