//! Error types for the service client.

use thiserror::Error;

/// Result type for service calls.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors that can occur talking to the remote service.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Transport failure (DNS, connection refused, TLS, ...).
    #[error("network error: {0}")]
    Network(String),

    /// The request exceeded its deadline.
    #[error("request timed out")]
    Timeout,

    /// The service answered with a non-2xx status.
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body could not be decoded.
    #[error("malformed response: {0}")]
    Parse(String),

    /// Client misconfiguration (bad base URL, TLS backend unavailable).
    #[error("client configuration error: {0}")]
    Config(String),
}

impl ApiError {
    /// Transient failures are worth retrying on the next poll cycle.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Parse(_) | Self::Config(_) => false,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Parse(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}
