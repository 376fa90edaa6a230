//! Core type definitions for modlink.
//!
//! This crate defines the small, dependency-free types shared by every
//! agent component:
//! - Item identifiers (purely numeric strings, ordered numerically)
//! - Unix timestamps used in liveness reports and the last-update table

mod ids;
mod timestamp;

pub use ids::ItemId;
pub use timestamp::UnixTimestamp;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid item id: {0:?}")]
    InvalidItemId(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}
