//! Downloads and installs items.

use crate::error::{ItemsError, ItemsResult};
use crate::toggler::{write_atomic, GameFileEntry, PluginFileToggler};
use modlink_api::ItemSource;
use modlink_license::Session;
use modlink_types::{ItemId, UnixTimestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use zip::ZipArchive;

/// Item settings. Unset directories are resolved by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemsConfig {
    pub marker_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub enabled_ext: String,
    pub disabled_ext: String,
    /// Duplicate requests for one id within this window are dropped.
    pub throttle_secs: u64,
    pub metadata_timeout_secs: u64,
    pub download_timeout_secs: u64,
}

impl Default for ItemsConfig {
    fn default() -> Self {
        Self {
            marker_dir: None,
            cache_dir: None,
            enabled_ext: "dll".to_string(),
            disabled_ext: "disabled".to_string(),
            throttle_secs: 3,
            metadata_timeout_secs: 5,
            download_timeout_secs: 60,
        }
    }
}

/// Per-id "last request" timestamps.
#[derive(Debug)]
pub struct RequestThrottle {
    window: Duration,
    last: Mutex<HashMap<ItemId, Instant>>,
}

impl RequestThrottle {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: Mutex::new(HashMap::new()),
        }
    }

    /// Records a request for `id`. Returns false if one was recorded within
    /// the window.
    pub fn try_acquire(&self, id: &ItemId) -> bool {
        let now = Instant::now();
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        last.retain(|_, at| now.duration_since(*at) < self.window);
        if last.contains_key(id) {
            return false;
        }
        last.insert(id.clone(), now);
        true
    }
}

pub struct ItemInstaller {
    source: Arc<dyn ItemSource>,
    toggler: Arc<PluginFileToggler>,
    cache_dir: PathBuf,
    throttle: RequestThrottle,
    metadata_timeout: Duration,
    download_timeout: Duration,
}

impl ItemInstaller {
    pub fn new(
        source: Arc<dyn ItemSource>,
        toggler: Arc<PluginFileToggler>,
        cache_dir: impl Into<PathBuf>,
        config: &ItemsConfig,
    ) -> Self {
        Self {
            source,
            toggler,
            cache_dir: cache_dir.into(),
            throttle: RequestThrottle::new(Duration::from_secs(config.throttle_secs)),
            metadata_timeout: Duration::from_secs(config.metadata_timeout_secs),
            download_timeout: Duration::from_secs(config.download_timeout_secs),
        }
    }

    /// Downloads `id` and installs it, preserving its current enabled state
    /// (new items land enabled). Returns a fresh scan.
    pub async fn install(&self, id: &ItemId, session: &Session) -> ItemsResult<Vec<GameFileEntry>> {
        if !self.throttle.try_acquire(id) {
            debug!(%id, "Duplicate install request dropped");
            return Err(ItemsError::Throttled(id.to_string()));
        }

        let metadata = tokio::time::timeout(self.metadata_timeout, self.source.item_metadata(id))
            .await
            .map_err(|_| ItemsError::Timeout)??;
        if metadata.premium && session.is_guest() {
            info!(%id, "Premium item refused for guest session");
            return Err(ItemsError::PremiumRequired(id.to_string()));
        }

        let archive = tokio::time::timeout(self.download_timeout, self.source.download_item(id))
            .await
            .map_err(|_| ItemsError::Timeout)??;
        info!(%id, bytes = archive.len(), "Item downloaded");

        let installed_at = metadata
            .updated_at
            .as_deref()
            .and_then(|s| UnixTimestamp::parse_rfc3339(s).ok())
            .unwrap_or_else(UnixTimestamp::now);

        let toggler = Arc::clone(&self.toggler);
        let cache_dir = self.cache_dir.clone();
        let id = id.clone();
        tokio::task::spawn_blocking(move || {
            extract(&toggler, &id, &archive, &cache_dir)?;
            toggler.record_update(&id, installed_at)?;
            toggler.scan()
        })
        .await
        .map_err(|e| ItemsError::Join(e.to_string()))?
    }
}

/// Hands the archive's marker to the toggler and writes everything else into
/// `<cache_dir>/<id>/`.
fn extract(
    toggler: &PluginFileToggler,
    id: &ItemId,
    bytes: &[u8],
    cache_dir: &Path,
) -> ItemsResult<()> {
    let layout = toggler.layout();
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let aux_root = cache_dir.join(id.as_str());
    let mut marker_written = false;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.is_dir() {
            continue;
        }
        let Some(relative) = file.enclosed_name() else {
            warn!(%id, name = file.name(), "Skipping archive entry outside the item root");
            continue;
        };

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        if !marker_written && is_marker_entry(&relative, id, &layout.enabled_ext, &layout.disabled_ext) {
            toggler.install_marker(id, &data)?;
            marker_written = true;
        } else {
            let dest = aux_root.join(&relative);
            write_atomic(&dest, &data)?;
            debug!(%id, path = %dest.display(), "Auxiliary file installed");
        }
    }

    if !marker_written {
        return Err(ItemsError::MissingMarker(id.to_string()));
    }
    Ok(())
}

fn is_marker_entry(path: &Path, id: &ItemId, enabled_ext: &str, disabled_ext: &str) -> bool {
    let stem_matches = path.file_stem().and_then(|s| s.to_str()) == Some(id.as_str());
    let ext_matches = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(enabled_ext) || e.eq_ignore_ascii_case(disabled_ext));
    stem_matches && ext_matches
}
