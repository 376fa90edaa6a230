//! Error types for the licensing module.

use thiserror::Error;

/// Licensing-specific errors.
#[derive(Debug, Error)]
pub enum LicenseError {
    /// Activation URL is malformed or uses the wrong scheme.
    #[error("invalid activation url: {0}")]
    InvalidActivationUrl(String),

    /// Login or activation response did not describe a usable session.
    #[error("invalid login response: {0}")]
    InvalidLogin(String),

    /// Device identity could not be derived or persisted.
    #[error("device identity error: {0}")]
    DeviceIdentity(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Encryption of the stored secret failed.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for license operations.
pub type LicenseResult<T> = Result<T, LicenseError>;
