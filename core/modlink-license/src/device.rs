//! Device identity for session binding.
//!
//! Derives a stable identifier from the processor descriptor and the serial
//! of the system storage volume, then pins it to a local file. Once the file
//! exists the identity is only ever read back; it is regenerated only if the
//! file is deleted externally.

use crate::error::{LicenseError, LicenseResult};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Number of hash bytes kept in the rendered identity (16 hex chars).
const ID_BYTES: usize = 8;

/// Raw hardware descriptors fed into the identity hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareComponents {
    /// Processor model / identifier string.
    pub processor: String,
    /// Serial or UUID of the system storage volume.
    pub volume_serial: String,
}

impl HardwareComponents {
    /// Collects descriptors for the current machine.
    #[must_use]
    pub fn collect() -> Self {
        Self {
            processor: get_processor_descriptor(),
            volume_serial: get_volume_serial(),
        }
    }

    /// Hashes the descriptors into an upper-case hex identity.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.processor.trim().as_bytes());
        hasher.update(b"|");
        hasher.update(self.volume_serial.trim().as_bytes());
        let hash = hasher.finalize();
        hex::encode_upper(&hash[..ID_BYTES])
    }
}

/// The persisted, stable identity of this device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    id: String,
    path: PathBuf,
}

impl DeviceIdentity {
    /// Reads the identity file, computing and persisting it on first use.
    pub fn load_or_create(path: impl Into<PathBuf>) -> LicenseResult<Self> {
        Self::load_or_create_with(path, || HardwareComponents::collect().fingerprint())
    }

    /// Like [`load_or_create`](Self::load_or_create) with an injectable
    /// derivation, invoked only when no identity has been persisted yet.
    pub fn load_or_create_with(
        path: impl Into<PathBuf>,
        derive: impl FnOnce() -> String,
    ) -> LicenseResult<Self> {
        let path = path.into();

        match fs::read_to_string(&path) {
            Ok(content) if !content.trim().is_empty() => {
                debug!(path = %path.display(), "Loaded device identity");
                return Ok(Self {
                    id: content.trim().to_string(),
                    path,
                });
            }
            Ok(_) => warn!(path = %path.display(), "Device identity file is empty, regenerating"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(LicenseError::DeviceIdentity(format!(
                    "failed to read {}: {e}",
                    path.display()
                )));
            }
        }

        let id = derive();
        if id.trim().is_empty() {
            return Err(LicenseError::DeviceIdentity("derived identity is empty".into()));
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| LicenseError::Storage(format!("create {}: {e}", parent.display())))?;
        }
        fs::write(&path, &id)
            .map_err(|e| LicenseError::Storage(format!("write {}: {e}", path.display())))?;
        info!(path = %path.display(), "Persisted new device identity");

        Ok(Self { id, path })
    }

    /// Returns the identity string.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn get_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

fn get_processor_descriptor() -> String {
    #[cfg(target_os = "linux")]
    {
        fs::read_to_string("/proc/cpuinfo")
            .ok()
            .and_then(|content| {
                content
                    .lines()
                    .find(|l| l.starts_with("model name") || l.starts_with("Hardware"))
                    .and_then(|l| l.split_once(':'))
                    .map(|(_, v)| v.trim().to_string())
            })
            .unwrap_or_else(|| std::env::consts::ARCH.to_string())
    }

    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("sysctl")
            .args(["-n", "machdep.cpu.brand_string"])
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| std::env::consts::ARCH.to_string())
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("PROCESSOR_IDENTIFIER")
            .unwrap_or_else(|_| std::env::consts::ARCH.to_string())
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
    {
        std::env::consts::ARCH.to_string()
    }
}

/// Falls back to the hostname when no volume serial can be read.
fn get_volume_serial() -> String {
    read_volume_serial().unwrap_or_else(get_hostname)
}

fn read_volume_serial() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        // UUID of the block device mounted at `/`, then the machine id.
        let root_device = fs::read_to_string("/proc/mounts").ok().and_then(|mounts| {
            mounts
                .lines()
                .map(|l| l.split_whitespace().collect::<Vec<_>>())
                .find(|fields| fields.get(1) == Some(&"/"))
                .and_then(|fields| fields.first().map(|d| PathBuf::from(*d)))
        });

        let by_uuid = root_device.and_then(|device| {
            let device = fs::canonicalize(device).ok()?;
            fs::read_dir("/dev/disk/by-uuid").ok()?.flatten().find_map(|entry| {
                let target = fs::canonicalize(entry.path()).ok()?;
                (target == device).then(|| entry.file_name().to_string_lossy().into_owned())
            })
        });

        by_uuid.or_else(|| {
            fs::read_to_string("/etc/machine-id")
                .or_else(|_| fs::read_to_string("/var/lib/dbus/machine-id"))
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
    }

    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("diskutil")
            .args(["info", "/"])
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .and_then(|output| {
                output
                    .lines()
                    .find(|l| l.trim_start().starts_with("Volume UUID:"))
                    .and_then(|l| l.split_once(':'))
                    .map(|(_, v)| v.trim().to_string())
            })
    }

    #[cfg(target_os = "windows")]
    {
        // `vol C:` ends with "Volume Serial Number is XXXX-XXXX".
        std::process::Command::new("cmd")
            .args(["/C", "vol", "C:"])
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .and_then(|output| {
                output
                    .lines()
                    .rev()
                    .find_map(|l| l.split_whitespace().last().map(String::from))
            })
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
    {
        None
    }
}
