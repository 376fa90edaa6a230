//! Lock acquisition and relay.

use crate::error::{InstanceError, InstanceResult};
use crate::listener::{self, ListenerHandle, ListenerSettings};
use crate::transport::{self, Endpoint};
use fs2::FileExt;
use modlink_license::ActivationPayload;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Single-instance settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    /// Base name of the lock file and relay endpoint.
    pub name: String,
    /// Directory for the lock file and socket. Resolved by the caller when unset.
    pub runtime_dir: Option<PathBuf>,
    /// Upper bound on a secondary's relay attempt.
    pub relay_timeout_secs: u64,
    /// Upper bound on reading one relayed payload.
    pub read_timeout_secs: u64,
    /// Largest payload the listener accepts.
    pub max_payload_bytes: usize,
    /// Pause after a listener error before accepting again.
    pub retry_delay_ms: u64,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            name: "modlink".to_string(),
            runtime_dir: None,
            relay_timeout_secs: 5,
            read_timeout_secs: 5,
            max_payload_bytes: 8 * 1024,
            retry_delay_ms: 1000,
        }
    }
}

/// Outcome of [`InstanceArbiter::acquire`].
#[derive(Debug)]
pub enum Acquisition {
    /// This process owns the lock.
    Primary(PrimaryGuard),
    /// Another process owns the lock.
    Secondary,
}

/// Claims or defers to the running instance.
#[derive(Debug, Clone)]
pub struct InstanceArbiter {
    lock_path: PathBuf,
    endpoint: Endpoint,
    relay_timeout: Duration,
    settings: ListenerSettings,
}

impl InstanceArbiter {
    pub fn new(config: &InstanceConfig, runtime_dir: &Path) -> Self {
        Self {
            lock_path: runtime_dir.join(format!("{}.lock", config.name)),
            endpoint: Endpoint::for_instance(runtime_dir, &config.name),
            relay_timeout: Duration::from_secs(config.relay_timeout_secs),
            settings: ListenerSettings {
                read_timeout: Duration::from_secs(config.read_timeout_secs),
                max_payload: config.max_payload_bytes,
                retry_delay: Duration::from_millis(config.retry_delay_ms),
            },
        }
    }

    #[must_use]
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Tries to take the instance lock without blocking.
    pub fn acquire(&self) -> InstanceResult<Acquisition> {
        let lock_err = |source| InstanceError::Lock {
            path: self.lock_path.clone(),
            source,
        };
        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent).map_err(lock_err)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.lock_path)
            .map_err(lock_err)?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if is_contended(&e) => {
                info!(lock = %self.lock_path.display(), "Another instance is running");
                return Ok(Acquisition::Secondary);
            }
            Err(e) => return Err(lock_err(e)),
        }

        // Informational only; the lock itself is what matters.
        if let Err(e) = file.set_len(0).and_then(|()| write!(file, "{}", std::process::id())) {
            debug!(error = %e, "Could not record pid in lock file");
        }
        info!(lock = %self.lock_path.display(), "Acquired instance lock");
        Ok(Acquisition::Primary(PrimaryGuard {
            file,
            lock_path: self.lock_path.clone(),
            endpoint: self.endpoint.clone(),
            settings: self.settings.clone(),
        }))
    }

    /// Forwards `payload` to the primary. Returns false when there was
    /// nothing to send.
    pub async fn relay(&self, payload: &str) -> InstanceResult<bool> {
        let payload = payload.trim();
        if payload.is_empty() {
            debug!("Nothing to relay");
            return Ok(false);
        }
        if payload.len() > self.settings.max_payload {
            return Err(InstanceError::PayloadTooLarge(payload.len()));
        }

        let send = async {
            let mut stream = transport::connect(&self.endpoint).await.map_err(|source| {
                if transport::is_unreachable(&source) {
                    warn!(endpoint = %self.endpoint, "No instance is listening");
                }
                InstanceError::Connect {
                    endpoint: self.endpoint.to_string(),
                    source,
                }
            })?;
            stream.write_all(payload.as_bytes()).await?;
            stream.shutdown().await?;
            Ok::<_, InstanceError>(())
        };
        tokio::time::timeout(self.relay_timeout, send)
            .await
            .map_err(|_| InstanceError::RelayTimeout(self.relay_timeout))??;
        info!(endpoint = %self.endpoint, "Relayed activation to running instance");
        Ok(true)
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Proof of ownership of the instance lock. Dropping it releases the lock.
#[derive(Debug)]
pub struct PrimaryGuard {
    file: File,
    lock_path: PathBuf,
    endpoint: Endpoint,
    settings: ListenerSettings,
}

impl PrimaryGuard {
    /// Binds the relay endpoint and starts the accept loop. A bind failure
    /// here is fatal; later failures are retried inside the loop.
    pub fn start_listening<H>(&self, handler: H) -> InstanceResult<ListenerHandle>
    where
        H: Fn(ActivationPayload) + Send + Sync + 'static,
    {
        listener::start(self.endpoint.clone(), self.settings.clone(), handler)
    }

    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Unlocks explicitly. The OS does the same if the process dies.
    pub fn release(self) {
        match FileExt::unlock(&self.file) {
            Ok(()) => info!(lock = %self.lock_path.display(), "Released instance lock"),
            Err(e) => warn!(error = %e, "Could not unlock instance lock"),
        }
    }
}
