//! Persisted session record.
//!
//! The session file is the source of truth for who is using this device. It
//! is overwritten wholesale on every successful login or activation and read
//! back by the access gate and the liveness reporter on every cycle.

use crate::error::{LicenseError, LicenseResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Prefix of the synthesized unique id of a guest session.
pub const GUEST_PREFIX: &str = "guest_";

/// Premium status used when the server omits the premium expiry.
const STANDARD_STATUS: &str = "Standard";

/// Login or activation response as returned by the remote service.
///
/// Every field is optional on the wire; [`Session::from_login`] applies the
/// defaulting rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub unique_id: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub premium_expires_in_days: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
}

impl LoginResponse {
    /// Premium label derived from `premium_expires_in_days`.
    #[must_use]
    pub fn premium_status(&self) -> String {
        match self.premium_expires_in_days {
            None => STANDARD_STATUS.to_string(),
            Some(days) if days <= 0 => "Expired".to_string(),
            Some(1) => "Premium (1 day)".to_string(),
            Some(days) => format!("Premium ({days} days)"),
        }
    }
}

/// The authenticated (or guest) user of this device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub username: String,
    pub device_id: String,
    pub unique_id: String,
    pub premium_status: String,
    /// The full server response that created this session.
    #[serde(default)]
    pub raw_verdict: serde_json::Value,
}

impl Session {
    /// Builds a session from a successful login/activation response.
    ///
    /// `fallback_username` is used when the server omits the username (the
    /// activation URL already carries it).
    pub fn from_login(
        response: &LoginResponse,
        raw: serde_json::Value,
        device_id: &str,
        fallback_username: &str,
    ) -> LicenseResult<Self> {
        if !response.success {
            let reason = response
                .message
                .clone()
                .unwrap_or_else(|| "server rejected credentials".to_string());
            return Err(LicenseError::InvalidLogin(reason));
        }

        let username = response
            .username
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| fallback_username.to_string());
        let unique_id = response
            .unique_id
            .clone()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| LicenseError::InvalidLogin("missing unique_id".into()))?;

        Ok(Self {
            username,
            device_id: device_id.to_string(),
            unique_id,
            premium_status: response.premium_status(),
            raw_verdict: raw,
        })
    }

    /// A local session with no backing server account.
    #[must_use]
    pub fn guest(device_id: &str) -> Self {
        Self {
            username: "Guest".to_string(),
            device_id: device_id.to_string(),
            unique_id: format!("{GUEST_PREFIX}{device_id}"),
            premium_status: STANDARD_STATUS.to_string(),
            raw_verdict: serde_json::Value::Null,
        }
    }

    /// Server-side account id, when the creating response carried one.
    #[must_use]
    pub fn account_id(&self) -> Option<String> {
        LoginResponse::deserialize(&self.raw_verdict)
            .ok()
            .and_then(|r| r.account_id)
            .filter(|id| !id.is_empty())
    }

    /// Returns true for locally synthesized guest sessions.
    #[must_use]
    pub fn is_guest(&self) -> bool {
        self.unique_id.starts_with(GUEST_PREFIX)
    }
}

/// Owner of the session file.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    /// Creates a store backed by `path`. Nothing is read until [`load`](Self::load).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the session file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the current session. A missing file means no session.
    pub fn load(&self) -> LicenseResult<Option<Session>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(LicenseError::Storage(format!(
                    "read {}: {e}",
                    self.path.display()
                )));
            }
        };
        if content.trim().is_empty() {
            return Ok(None);
        }
        let session = serde_json::from_str(&content)?;
        debug!(path = %self.path.display(), "Session loaded");
        Ok(Some(session))
    }

    /// Replaces the session file atomically (write to a sibling temp file,
    /// then rename over the original).
    pub fn save(&self, session: &Session) -> LicenseResult<()> {
        let json = serde_json::to_vec_pretty(session)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| LicenseError::Storage(format!("create {}: {e}", parent.display())))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .map_err(|e| LicenseError::Storage(format!("write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| LicenseError::Storage(format!("replace {}: {e}", self.path.display())))?;
        info!(username = %session.username, guest = session.is_guest(), "Session saved");
        Ok(())
    }

    /// Deletes the session file (logout).
    pub fn clear(&self) -> LicenseResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LicenseError::Storage(format!(
                "remove {}: {e}",
                self.path.display()
            ))),
        }
    }

    /// Loads the session, falling back to a guest session for `device_id`.
    pub fn load_or_guest(&self, device_id: &str) -> LicenseResult<Session> {
        Ok(self.load()?.unwrap_or_else(|| Session::guest(device_id)))
    }
}
