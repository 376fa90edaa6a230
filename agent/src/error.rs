//! Error types for the agent composition layer.

use modlink_access::AccessError;
use modlink_api::ApiError;
use modlink_instance::InstanceError;
use modlink_items::ItemsError;
use modlink_license::LicenseError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while assembling or driving the agent.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Configuration file could not be read.
    #[error("cannot read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid TOML for [`crate::AgentConfig`].
    #[error("invalid config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// No usable data directory could be determined.
    #[error("no data directory available")]
    NoDataDir,

    #[error("logging setup failed: {0}")]
    Logging(String),

    #[error("session watcher failed: {0}")]
    Watcher(String),

    #[error(transparent)]
    License(#[from] LicenseError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Items(#[from] ItemsError),

    #[error(transparent)]
    Instance(#[from] InstanceError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;
