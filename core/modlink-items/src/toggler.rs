//! Enable/disable marker files.
//!
//! Directory contents are the source of truth. Every mutation is followed by
//! a fresh [`PluginFileToggler::scan`] so callers never display an assumed
//! state.

use crate::error::{ItemsError, ItemsResult};
use crate::updates::UpdateTable;
use modlink_types::{ItemId, UnixTimestamp};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Which marker file represents an item on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Enabled,
    Disabled,
    None,
}

/// One installed item as found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameFileEntry {
    pub id: ItemId,
    pub enabled: bool,
    pub file_kind: FileKind,
    /// RFC 3339 time of the last install, if recorded.
    pub last_update: Option<String>,
}

/// Outcome of [`PluginFileToggler::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoveOutcome {
    Removed,
    NotFound,
    /// Deletion was handed to an elevated helper that has not finished yet.
    PendingElevation,
}

/// Mutating filesystem operations, injectable for tests.
pub trait FileOps: Send + Sync {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn copy(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;
    fn create_empty(&self, path: &Path) -> io::Result<()>;
}

/// [`FileOps`] backed by `std::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFileOps;

impl FileOps for StdFileOps {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn copy(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::copy(from, to).map(|_| ())
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn create_empty(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map(|_| ())
    }
}

/// Deletes files with elevated privileges when the agent lacks them.
pub trait Elevator: Send + Sync {
    /// Starts the helper and returns without waiting for it.
    fn remove_elevated(&self, paths: &[PathBuf]) -> io::Result<()>;
}

/// Platform helper: `pkexec rm` on Unix, an elevated PowerShell on Windows.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemElevator;

impl Elevator for SystemElevator {
    #[cfg(unix)]
    fn remove_elevated(&self, paths: &[PathBuf]) -> io::Result<()> {
        std::process::Command::new("pkexec")
            .arg("rm")
            .arg("-f")
            .arg("--")
            .args(paths)
            .spawn()
            .map(|_| ())
    }

    #[cfg(windows)]
    fn remove_elevated(&self, paths: &[PathBuf]) -> io::Result<()> {
        let quoted: Vec<String> = paths
            .iter()
            .map(|p| format!("'{}'", p.display().to_string().replace('\'', "''")))
            .collect();
        let inner = format!("Remove-Item -Force -LiteralPath {}", quoted.join(","));
        let command = format!(
            "Start-Process powershell -Verb RunAs -WindowStyle Hidden -ArgumentList '-NoProfile','-Command',\"{}\"",
            inner.replace('"', "`\"")
        );
        std::process::Command::new("powershell")
            .args(["-NoProfile", "-Command", &command])
            .spawn()
            .map(|_| ())
    }
}

/// Where markers live and which extensions tag their state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerLayout {
    pub dir: PathBuf,
    pub enabled_ext: String,
    pub disabled_ext: String,
}

impl MarkerLayout {
    /// Path of the marker that puts `id` into the given state.
    #[must_use]
    pub fn path(&self, id: &ItemId, enabled: bool) -> PathBuf {
        let ext = if enabled {
            &self.enabled_ext
        } else {
            &self.disabled_ext
        };
        self.dir.join(format!("{id}.{ext}"))
    }

    #[must_use]
    pub fn marker_path(&self, id: &ItemId, kind: FileKind) -> Option<PathBuf> {
        match kind {
            FileKind::Enabled => Some(self.path(id, true)),
            FileKind::Disabled => Some(self.path(id, false)),
            FileKind::None => None,
        }
    }

    /// Classifies a directory entry name. Non-marker names yield `None`.
    fn classify(&self, file_name: &str) -> Option<(ItemId, FileKind)> {
        let (stem, ext) = file_name.rsplit_once('.')?;
        let id = ItemId::parse(stem).ok()?;
        if ext.eq_ignore_ascii_case(&self.enabled_ext) {
            Some((id, FileKind::Enabled))
        } else if ext.eq_ignore_ascii_case(&self.disabled_ext) {
            Some((id, FileKind::Disabled))
        } else {
            None
        }
    }
}

/// Owner of the marker directory and the last-update table.
pub struct PluginFileToggler {
    layout: MarkerLayout,
    updates: UpdateTable,
    ops: Arc<dyn FileOps>,
    elevator: Arc<dyn Elevator>,
    // Serializes mutations; scans do not take it.
    write_lock: Mutex<()>,
}

impl PluginFileToggler {
    pub fn new(layout: MarkerLayout, updates: UpdateTable) -> Self {
        Self {
            layout,
            updates,
            ops: Arc::new(StdFileOps),
            elevator: Arc::new(SystemElevator),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_file_ops(mut self, ops: Arc<dyn FileOps>) -> Self {
        self.ops = ops;
        self
    }

    #[must_use]
    pub fn with_elevator(mut self, elevator: Arc<dyn Elevator>) -> Self {
        self.elevator = elevator;
        self
    }

    #[must_use]
    pub fn layout(&self) -> &MarkerLayout {
        &self.layout
    }

    /// Lists installed items sorted by numeric id. Reads only.
    pub fn scan(&self) -> ItemsResult<Vec<GameFileEntry>> {
        let mut kinds: BTreeMap<ItemId, FileKind> = BTreeMap::new();
        let entries = match fs::read_dir(&self.layout.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name();
            let Some((id, kind)) = name.to_str().and_then(|n| self.layout.classify(n)) else {
                continue;
            };
            kinds
                .entry(id)
                .and_modify(|k| {
                    if kind == FileKind::Enabled {
                        *k = FileKind::Enabled;
                    }
                })
                .or_insert(kind);
        }

        let updates = self.updates.load();
        Ok(kinds
            .into_iter()
            .map(|(id, file_kind)| GameFileEntry {
                last_update: updates.get(id.as_str()).cloned(),
                enabled: file_kind == FileKind::Enabled,
                file_kind,
                id,
            })
            .collect())
    }

    /// Current marker kind for one item, read from the directory the same
    /// way [`scan`](Self::scan) reads it.
    pub fn status(&self, id: &ItemId) -> ItemsResult<FileKind> {
        Ok(self.markers(id)?.kind())
    }

    /// Puts `id` into the requested state and returns a fresh scan.
    ///
    /// When both markers exist the enabled one is the item: enabling keeps it
    /// and drops the disabled one, disabling moves it over the disabled one.
    /// On [`ItemsError::Locked`] the surviving marker is untouched.
    pub fn toggle(&self, id: &ItemId, enable: bool) -> ItemsResult<Vec<GameFileEntry>> {
        {
            let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
            let mut markers = self.markers(id)?;
            let requested = if enable {
                FileKind::Enabled
            } else {
                FileKind::Disabled
            };
            let current = markers.kind();

            match markers.take(current) {
                None => {
                    self.ops.create_empty(&self.layout.path(id, enable))?;
                    info!(%id, enable, "Created marker");
                }
                Some(_) if current == requested => {
                    self.remove_strays(id, markers.all())?;
                    debug!(%id, enable, "Marker already in requested state");
                }
                Some(source) => {
                    let target = self.layout.path(id, enable);
                    self.remove_strays(id, markers.of(requested).iter())?;
                    self.move_marker(id, &source, &target)?;
                    self.remove_strays(id, markers.of(current).iter())?;
                    info!(%id, enable, "Toggled marker");
                }
            }
        }
        self.scan()
    }

    /// Writes the primary file of a freshly downloaded item under the state
    /// the item currently has (new items land enabled). Any other marker of
    /// `id` is removed so exactly one remains.
    pub fn install_marker(&self, id: &ItemId, data: &[u8]) -> ItemsResult<PathBuf> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut markers = self.markers(id)?;
        let current = markers.kind();
        // Overwrite the marker in place under the name it already has.
        let target = markers
            .take(current)
            .unwrap_or_else(|| self.layout.path(id, true));

        write_atomic(&target, data)?;
        self.remove_strays(id, markers.all())?;
        debug!(%id, path = %target.display(), "Marker installed");
        Ok(target)
    }

    /// Deletes every marker of `id` and its update record.
    pub fn remove(&self, id: &ItemId) -> ItemsResult<RemoveOutcome> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let present: Vec<PathBuf> = self.markers(id)?.all().cloned().collect();
        if present.is_empty() {
            return Ok(RemoveOutcome::NotFound);
        }

        for (i, path) in present.iter().enumerate() {
            match self.ops.remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                    warn!(%id, path = %path.display(), "Access denied; requesting elevation");
                    self.elevator.remove_elevated(&present[i..])?;
                    return Ok(RemoveOutcome::PendingElevation);
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.updates.forget(id)?;
        info!(%id, "Removed item");
        Ok(RemoveOutcome::Removed)
    }

    /// Records the time `id` was last installed.
    pub fn record_update(&self, id: &ItemId, at: UnixTimestamp) -> ItemsResult<()> {
        self.updates.record(id, at)
    }

    /// Every on-disk marker of `id`, whatever the case of its extension.
    fn markers(&self, id: &ItemId) -> ItemsResult<Markers> {
        let mut markers = Markers::default();
        let entries = match fs::read_dir(&self.layout.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(markers),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name();
            match name.to_str().and_then(|n| self.layout.classify(n)) {
                Some((found, FileKind::Enabled)) if &found == id => {
                    markers.enabled.push(entry.path());
                }
                Some((found, FileKind::Disabled)) if &found == id => {
                    markers.disabled.push(entry.path());
                }
                _ => {}
            }
        }
        // Canonical spellings first so they are the ones kept.
        let canonical_enabled = self.layout.path(id, true);
        let canonical_disabled = self.layout.path(id, false);
        markers.enabled.sort_by_key(|p| *p != canonical_enabled);
        markers.disabled.sort_by_key(|p| *p != canonical_disabled);
        Ok(markers)
    }

    fn remove_strays<'a>(
        &self,
        id: &ItemId,
        paths: impl Iterator<Item = &'a PathBuf>,
    ) -> ItemsResult<()> {
        for path in paths {
            match self.ops.remove_file(path) {
                Ok(()) => debug!(%id, path = %path.display(), "Removed stray marker"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(locked(id, format!("remove stray marker: {e}"))),
            }
        }
        Ok(())
    }

    /// Rename, falling back to copy-then-delete. Never leaves both files
    /// missing.
    fn move_marker(&self, id: &ItemId, source: &Path, target: &Path) -> ItemsResult<()> {
        let rename_err = match self.ops.rename(source, target) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        warn!(%id, error = %rename_err, "Rename failed; falling back to copy");

        self.ops
            .copy(source, target)
            .map_err(|e| locked(id, format!("rename: {rename_err}; copy: {e}")))?;

        if let Err(e) = self.ops.remove_file(source) {
            if let Err(undo) = self.ops.remove_file(target) {
                warn!(%id, error = %undo, "Could not undo copied marker");
            }
            return Err(locked(id, format!("rename: {rename_err}; delete source: {e}")));
        }
        Ok(())
    }
}

fn locked(id: &ItemId, detail: String) -> ItemsError {
    ItemsError::Locked {
        id: id.to_string(),
        detail,
    }
}

/// The markers of one item as found on disk, canonical spelling first.
#[derive(Debug, Default)]
struct Markers {
    enabled: Vec<PathBuf>,
    disabled: Vec<PathBuf>,
}

impl Markers {
    /// Enabled wins when both kinds are present.
    fn kind(&self) -> FileKind {
        if !self.enabled.is_empty() {
            FileKind::Enabled
        } else if !self.disabled.is_empty() {
            FileKind::Disabled
        } else {
            FileKind::None
        }
    }

    fn of(&self, kind: FileKind) -> &[PathBuf] {
        match kind {
            FileKind::Enabled => &self.enabled,
            FileKind::Disabled => &self.disabled,
            FileKind::None => &[],
        }
    }

    fn take(&mut self, kind: FileKind) -> Option<PathBuf> {
        let list = match kind {
            FileKind::Enabled => &mut self.enabled,
            FileKind::Disabled => &mut self.disabled,
            FileKind::None => return None,
        };
        if list.is_empty() {
            None
        } else {
            Some(list.remove(0))
        }
    }

    fn all(&self) -> impl Iterator<Item = &PathBuf> {
        self.enabled.iter().chain(self.disabled.iter())
    }
}

/// Writes via a sibling temp file and renames over `dest`.
pub(crate) fn write_atomic(dest: &Path, data: &[u8]) -> ItemsResult<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name = dest.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".partial");
    let tmp = dest.with_file_name(tmp_name);
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, dest)?;
    Ok(())
}
