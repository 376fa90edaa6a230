use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type InstanceResult<T> = Result<T, InstanceError>;

#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("cannot lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot listen on {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot reach the running instance at {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("relay did not complete within {0:?}")]
    RelayTimeout(Duration),

    #[error("payload of {0} bytes exceeds the relay limit")]
    PayloadTooLarge(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
