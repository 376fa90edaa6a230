//! Error types for item operations.

use modlink_api::ApiError;
use thiserror::Error;

/// Result type for item operations.
pub type ItemsResult<T> = Result<T, ItemsError>;

#[derive(Debug, Error)]
pub enum ItemsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The marker could not be moved; files on disk are as before the call.
    #[error("item {id} is locked: {detail}")]
    Locked { id: String, detail: String },

    #[error("invalid item id: {0}")]
    InvalidId(#[from] modlink_types::Error),

    #[error("service error: {0}")]
    Api(#[from] ApiError),

    #[error("service call timed out")]
    Timeout,

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("archive for item {0} has no marker file")]
    MissingMarker(String),

    #[error("item {0} requires a premium account")]
    PremiumRequired(String),

    #[error("a request for item {0} is already in progress")]
    Throttled(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("background job failed: {0}")]
    Join(String),
}

impl ItemsError {
    /// A short sentence suitable for showing to the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Locked { .. } => {
                "The file is in use. Close the game and try again.".to_string()
            }
            Self::PremiumRequired(_) => "This item requires a premium account.".to_string(),
            Self::Throttled(_) => "Already downloading, please wait.".to_string(),
            Self::Api(e) if e.is_transient() => {
                "The service is unreachable. Try again later.".to_string()
            }
            Self::Timeout => "The service is unreachable. Try again later.".to_string(),
            Self::Api(_) | Self::Zip(_) | Self::MissingMarker(_) => {
                "The download could not be installed.".to_string()
            }
            Self::InvalidId(_) => "Unknown item.".to_string(),
            Self::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                "Permission denied. Try running as administrator.".to_string()
            }
            Self::Io(_) | Self::Json(_) | Self::Join(_) => "Something went wrong.".to_string(),
        }
    }

    /// Whether retrying the same request later can succeed.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Locked { .. } | Self::Throttled(_) | Self::Timeout => true,
            Self::Api(e) => e.is_transient(),
            _ => false,
        }
    }
}
