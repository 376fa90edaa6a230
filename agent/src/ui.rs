//! Messages between the agent and its UI surface.
//!
//! The UI is a single consumer: background tasks only ever post to the
//! [`UiQueue`], and the owner of the [`UiReceiver`] renders what arrives.
//! Commands flow the other way as [`UiCommand`]s.

use modlink_access::{AccessState, ShutdownSignal, TaskHandle};
use modlink_api::PatchNote;
use modlink_items::{GameFileEntry, RemoveOutcome};
use modlink_types::ItemId;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

/// Something for the UI to render.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiMessage {
    /// The gate changed state. `Restricted` and `Maintenance` carry the page
    /// to redirect to.
    Access { access: AccessState },
    /// Who is using the device.
    Session {
        username: String,
        premium_status: String,
        guest: bool,
    },
    /// Fresh listing of installed items.
    Items { entries: Vec<GameFileEntry> },
    /// Outcome of a toggle request.
    Toggled {
        id: ItemId,
        enabled: bool,
        ok: bool,
        message: Option<String>,
    },
    /// Outcome of a remove request.
    Removed {
        id: ItemId,
        outcome: Option<RemoveOutcome>,
        message: Option<String>,
    },
    /// Short progress or result line.
    Status { text: String },
    Activation { ok: bool, message: String },
    UpdateAvailable {
        current: String,
        latest: String,
        mandatory: bool,
        download_url: Option<String>,
    },
    PatchNotes { notes: Vec<PatchNote> },
    /// Startup failed; the process is about to exit.
    Fatal { message: String },
}

/// A request from the UI.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiCommand {
    Scan,
    Toggle { id: ItemId, enable: bool },
    Remove { id: ItemId },
    Install { id: ItemId },
    /// A `modlink://activate` URL pasted or clicked inside the UI.
    Activate { url: String },
    Logout,
    Recheck,
    /// The window was resized or restored; re-send everything it shows.
    Rebuild,
    /// The window was closed.
    Shutdown,
}

/// Producer side of the UI queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct UiQueue {
    tx: mpsc::UnboundedSender<UiMessage>,
}

/// Consumer side of the UI queue.
#[derive(Debug)]
pub struct UiReceiver {
    rx: mpsc::UnboundedReceiver<UiMessage>,
}

/// Creates a connected queue.
#[must_use]
pub fn channel() -> (UiQueue, UiReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (UiQueue { tx }, UiReceiver { rx })
}

impl UiQueue {
    /// Posts `message`. Returns false once the UI has gone away.
    pub fn post(&self, message: UiMessage) -> bool {
        match self.tx.send(message) {
            Ok(()) => true,
            Err(e) => {
                debug!(message = ?e.0, "UI queue closed; message dropped");
                false
            }
        }
    }

    /// Posts an [`UiMessage::Status`] line.
    pub fn status(&self, text: impl Into<String>) -> bool {
        self.post(UiMessage::Status { text: text.into() })
    }
}

impl UiReceiver {
    pub async fn recv(&mut self) -> Option<UiMessage> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<UiMessage> {
        self.rx.try_recv().ok()
    }
}

/// Runs at most one UI rebuild at a time.
///
/// Each rebuild gets its own cancellation signal; starting another one
/// cancels the rebuild still in flight.
#[derive(Debug, Default)]
pub struct RebuildGate {
    current: Mutex<Option<TaskHandle>>,
}

impl RebuildGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts `body`, cancelling the previous rebuild.
    pub fn start<F, Fut>(&self, body: F)
    where
        F: FnOnce(ShutdownSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let next = TaskHandle::spawn("ui-rebuild", body);
        let previous = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(next);
        if previous.as_ref().is_some_and(|p| !p.is_finished()) {
            debug!("Cancelled in-flight UI rebuild");
        }
    }

    /// Cancels the running rebuild, if any.
    pub fn cancel(&self) {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}
