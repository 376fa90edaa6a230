//! Agent configuration.
//!
//! Every field has a default, so an absent or partial `config.toml` is
//! valid. Directories left unset resolve under the data directory.

use crate::error::{AgentError, AgentResult};
use modlink_access::{GateConfig, LivenessConfig};
use modlink_api::ServiceConfig;
use modlink_instance::InstanceConfig;
use modlink_items::ItemsConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory name under the platform's local data dir.
const APP_DIR: &str = "modlink";

/// File name looked up in the data dir when no `--config` is given.
pub const CONFIG_FILE: &str = "config.toml";

/// Top-level agent settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Root of every file the agent owns. Defaults to the platform data dir.
    pub data_dir: Option<PathBuf>,
    /// Reported in heartbeats and compared against the published version.
    pub app_version: String,
    /// Query version and patch notes once at startup.
    pub check_updates: bool,
    /// Debounce window for session file changes.
    pub session_debounce_ms: u64,
    pub service: ServiceConfig,
    pub gate: GateConfig,
    pub liveness: LivenessConfig,
    pub items: ItemsConfig,
    pub instance: InstanceConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            check_updates: true,
            session_debounce_ms: 500,
            service: ServiceConfig::default(),
            gate: GateConfig::default(),
            liveness: LivenessConfig::default(),
            items: ItemsConfig::default(),
            instance: InstanceConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Loads from `path` when given, otherwise from `<data_dir>/config.toml`
    /// if it exists, otherwise defaults.
    pub fn load(path: Option<&Path>) -> AgentResult<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        let fallback = default_data_dir()?.join(CONFIG_FILE);
        if fallback.exists() {
            return Self::from_file(&fallback);
        }
        debug!("No config file; using defaults");
        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> AgentResult<Self> {
        let text = fs::read_to_string(path).map_err(|source| AgentError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> AgentResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Resolves every on-disk location.
    pub fn paths(&self) -> AgentResult<AgentPaths> {
        let data_dir = match &self.data_dir {
            Some(dir) => dir.clone(),
            None => default_data_dir()?,
        };
        let cache_dir = self
            .items
            .cache_dir
            .clone()
            .unwrap_or_else(|| data_dir.join("cache"));
        Ok(AgentPaths {
            device_id: data_dir.join("device.id"),
            session: data_dir.join("session.json"),
            activation: data_dir.join("activation.bin"),
            log_file: data_dir.join("agent.log"),
            marker_dir: self
                .items
                .marker_dir
                .clone()
                .unwrap_or_else(|| data_dir.join("items")),
            updates: cache_dir.join("last_updates.json"),
            runtime_dir: self
                .instance
                .runtime_dir
                .clone()
                .unwrap_or_else(|| data_dir.clone()),
            cache_dir,
            data_dir,
        })
    }
}

/// Concrete file locations derived from an [`AgentConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentPaths {
    pub data_dir: PathBuf,
    pub device_id: PathBuf,
    pub session: PathBuf,
    pub activation: PathBuf,
    pub log_file: PathBuf,
    pub marker_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub updates: PathBuf,
    pub runtime_dir: PathBuf,
}

fn default_data_dir() -> AgentResult<PathBuf> {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR))
        .ok_or(AgentError::NoDataDir)
}
