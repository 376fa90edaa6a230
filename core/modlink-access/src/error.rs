//! Error types for access decisions.

use modlink_api::ApiError;
use thiserror::Error;

/// Result type for access operations.
pub type AccessResult<T> = Result<T, AccessError>;

/// Errors raised by the gate, its runner and the liveness reporter.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("service call failed: {0}")]
    Api(#[from] ApiError),

    #[error("service call exceeded {0:?}")]
    Timeout(std::time::Duration),

    #[error("background task '{0}' is not running")]
    TaskStopped(&'static str),
}

/// Runs `call` with an upper bound, folding the elapsed case into
/// [`AccessError::Timeout`].
pub(crate) async fn bounded<T, F>(limit: std::time::Duration, call: F) -> AccessResult<T>
where
    F: std::future::Future<Output = Result<T, ApiError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(AccessError::from),
        Err(_) => Err(AccessError::Timeout(limit)),
    }
}
