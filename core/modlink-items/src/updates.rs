//! Last-update side-table.
//!
//! A small JSON map of item id to RFC 3339 timestamp, kept next to the item
//! cache. Only the toggler writes it.

use crate::error::ItemsResult;
use modlink_types::{ItemId, UnixTimestamp};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct UpdateTable {
    path: PathBuf,
}

impl UpdateTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the table. Missing or unreadable files yield an empty map.
    #[must_use]
    pub fn load(&self) -> BTreeMap<String, String> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Update table unreadable");
                return BTreeMap::new();
            }
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "Update table malformed; ignoring");
            BTreeMap::new()
        })
    }

    #[must_use]
    pub fn get(&self, id: &ItemId) -> Option<String> {
        self.load().remove(id.as_str())
    }

    pub fn record(&self, id: &ItemId, at: UnixTimestamp) -> ItemsResult<()> {
        let mut table = self.load();
        table.insert(id.to_string(), at.to_rfc3339());
        self.store(&table)
    }

    pub fn forget(&self, id: &ItemId) -> ItemsResult<()> {
        let mut table = self.load();
        if table.remove(id.as_str()).is_some() {
            self.store(&table)?;
        }
        Ok(())
    }

    fn store(&self, table: &BTreeMap<String, String>) -> ItemsResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(table)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
