//! Watches the session file for changes made behind the agent's back.
//!
//! Another tool (or a second login flow) may rewrite `session.json`. When
//! that happens the liveness reporter and the gate must pick up the new
//! identity; this module only raises the signal.

use crate::error::{AgentError, AgentResult};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_mini::{DebounceEventResult, Debouncer, new_debouncer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Keeps the OS watch alive. Dropping it stops watching.
pub struct SessionWatcher {
    path: PathBuf,
    _debouncer: Debouncer<RecommendedWatcher>,
}

impl std::fmt::Debug for SessionWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionWatcher")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SessionWatcher {
    /// Watches `session_path` and sends one `()` per debounced burst of
    /// changes. Signals are coalesced while the receiver is behind.
    pub fn spawn(
        session_path: &Path,
        debounce: Duration,
        changed: mpsc::Sender<()>,
    ) -> AgentResult<Self> {
        let dir = session_path
            .parent()
            .ok_or_else(|| AgentError::Watcher("session path has no parent".into()))?;
        std::fs::create_dir_all(dir)?;
        let file_name = session_path.file_name().map(ToOwned::to_owned);

        let mut debouncer = new_debouncer(debounce, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    let touched = events
                        .iter()
                        .any(|e| e.path.file_name() == file_name.as_deref());
                    if touched {
                        debug!("Session file changed");
                        // Full means a signal is already pending.
                        let _ = changed.try_send(());
                    }
                }
                Err(e) => warn!(error = %e, "Session watch error"),
            }
        })
        .map_err(|e| AgentError::Watcher(e.to_string()))?;

        debouncer
            .watcher()
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| AgentError::Watcher(e.to_string()))?;
        info!(path = %session_path.display(), "Watching session file");

        Ok(Self {
            path: session_path.to_path_buf(),
            _debouncer: debouncer,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
