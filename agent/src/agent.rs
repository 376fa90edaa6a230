//! The running agent: every component wired together.
//!
//! [`Agent`] owns the gate loop, the liveness reporter, the session watcher
//! and the item services. UI commands come in through
//! [`Agent::handle_command`]; everything the UI should show goes out through
//! the [`UiQueue`].

use crate::config::{AgentConfig, AgentPaths};
use crate::error::{AgentError, AgentResult};
use crate::ui::{RebuildGate, UiCommand, UiMessage, UiQueue};
use crate::watcher::SessionWatcher;
use modlink_access::{
    AccessGate, AccessState, BlockList, GateHandle, GateRunner, LivenessReporter, TaskHandle,
};
use modlink_api::{ActivationRequest, ApiError, ServiceClient};
use modlink_items::{
    ItemInstaller, ItemsError, ItemsResult, MarkerLayout, PluginFileToggler, UpdateTable,
};
use modlink_license::{
    ActivationPayload, DeviceIdentity, LicenseError, SecretStore, Session, SessionStore,
};
use modlink_types::ItemId;
use std::fs;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Quiet period after a resize before the UI is re-sent its content.
const REBUILD_SETTLE: Duration = Duration::from_millis(150);

pub struct Agent {
    config: AgentConfig,
    paths: AgentPaths,
    device: DeviceIdentity,
    sessions: SessionStore,
    secrets: SecretStore,
    client: Arc<ServiceClient>,
    toggler: Arc<PluginFileToggler>,
    installer: ItemInstaller,
    ui: UiQueue,
    gate: Mutex<Option<GateHandle>>,
    liveness: tokio::sync::Mutex<LivenessReporter>,
    /// Session the liveness reporter was last started for.
    applied: Mutex<Option<Session>>,
    watcher: Mutex<Option<SessionWatcher>>,
    tasks: Mutex<Vec<TaskHandle>>,
    rebuild: RebuildGate,
    shutdown: watch::Sender<bool>,
}

impl Agent {
    /// Resolves paths, pins the device identity and builds every component.
    /// Nothing runs until [`start`](Self::start).
    pub fn new(config: AgentConfig, ui: UiQueue) -> AgentResult<Arc<Self>> {
        let paths = config.paths()?;
        fs::create_dir_all(&paths.data_dir)?;

        let device = DeviceIdentity::load_or_create(paths.device_id.clone())?;
        let sessions = SessionStore::new(paths.session.clone());
        let secrets = SecretStore::new(paths.activation.clone(), device.id());
        let client = Arc::new(ServiceClient::new(
            config.service.clone(),
            &format!("modlink/{}", config.app_version),
        )?);

        let layout = MarkerLayout {
            dir: paths.marker_dir.clone(),
            enabled_ext: config.items.enabled_ext.clone(),
            disabled_ext: config.items.disabled_ext.clone(),
        };
        let toggler = Arc::new(PluginFileToggler::new(
            layout,
            UpdateTable::new(paths.updates.clone()),
        ));
        let installer = ItemInstaller::new(
            client.clone(),
            Arc::clone(&toggler),
            paths.cache_dir.clone(),
            &config.items,
        );
        let liveness = LivenessReporter::new(
            client.clone(),
            config.liveness.clone(),
            config.app_version.clone(),
        );

        info!(
            device_id = %device.id(),
            data_dir = %paths.data_dir.display(),
            version = %config.app_version,
            "Agent initialised"
        );
        Ok(Arc::new(Self {
            config,
            paths,
            device,
            sessions,
            secrets,
            client,
            toggler,
            installer,
            ui,
            gate: Mutex::new(None),
            liveness: tokio::sync::Mutex::new(liveness),
            applied: Mutex::new(None),
            watcher: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            rebuild: RebuildGate::new(),
            shutdown: watch::channel(false).0,
        }))
    }

    #[must_use]
    pub fn device_id(&self) -> &str {
        self.device.id()
    }

    #[must_use]
    pub fn paths(&self) -> &AgentPaths {
        &self.paths
    }

    /// Starts the gate loop, liveness reporting, the session watcher and the
    /// optional update check, then posts the initial UI content.
    pub async fn start(self: &Arc<Self>) -> AgentResult<()> {
        let gate = AccessGate::new(
            self.client.clone(),
            self.sessions.clone(),
            self.device.id(),
            BlockList::new(self.config.gate.blocked_accounts.iter().cloned()),
            self.config.gate.call_timeout(),
        );
        let handle = GateRunner::start(gate, self.config.gate.clone());
        let states = handle.subscribe();
        *lock(&self.gate) = Some(handle);
        self.push_task(forward_access(states, self.ui.clone()));

        // The gate runs its own startup check.
        if !self.restore_activation().await {
            let session = self.current_session();
            self.apply_session(session, false).await;
        }
        self.refresh_items().await;

        let (changed_tx, changed_rx) = mpsc::channel(1);
        let watcher = SessionWatcher::spawn(
            &self.paths.session,
            Duration::from_millis(self.config.session_debounce_ms),
            changed_tx,
        )?;
        *lock(&self.watcher) = Some(watcher);
        self.push_task(follow_session(Arc::downgrade(self), changed_rx));

        if self.config.check_updates {
            let weak = Arc::downgrade(self);
            self.push_task(TaskHandle::spawn("update-check", move |_| async move {
                if let Some(agent) = weak.upgrade() {
                    agent.check_updates().await;
                }
            }));
        }
        info!("Agent started");
        Ok(())
    }

    /// Dispatches a UI command without waiting for it to finish.
    pub fn handle_command(self: &Arc<Self>, command: UiCommand) {
        let agent = Arc::clone(self);
        tokio::spawn(async move { agent.run_command(command).await });
    }

    /// Runs a UI command to completion, posting its outcome.
    pub async fn run_command(self: &Arc<Self>, command: UiCommand) {
        debug!(command = ?command, "UI command");
        match command {
            UiCommand::Scan => self.refresh_items().await,
            UiCommand::Toggle { id, enable } => self.toggle(id, enable).await,
            UiCommand::Remove { id } => self.remove(id).await,
            UiCommand::Install { id } => self.install(id).await,
            UiCommand::Activate { url } => match ActivationPayload::parse(&url) {
                Ok(payload) => self.activate_and_report(payload).await,
                Err(e) => {
                    warn!(error = %e, "Rejected activation link");
                    self.ui.post(UiMessage::Activation {
                        ok: false,
                        message: "The activation link is not valid.".to_string(),
                    });
                }
            },
            UiCommand::Logout => self.logout().await,
            UiCommand::Recheck => self.recheck(),
            UiCommand::Rebuild => self.rebuild(),
            UiCommand::Shutdown => self.request_shutdown(),
        }
    }

    /// Hands an activation relayed by another process to a background task.
    pub fn submit_activation(self: &Arc<Self>, payload: ActivationPayload) {
        let agent = Arc::clone(self);
        tokio::spawn(async move { agent.activate_and_report(payload).await });
    }

    /// Redeems an activation code and switches to the resulting session.
    pub async fn activate(&self, payload: &ActivationPayload) -> AgentResult<Session> {
        let request = ActivationRequest {
            code: payload.code.clone(),
            username: payload.username.clone(),
            hwid: self.device.id().to_string(),
        };
        let (login, raw) = self.client.activate(&request).await?;
        let session = Session::from_login(&login, raw, self.device.id(), &payload.username)?;
        self.sessions.save(&session)?;
        if let Err(e) = self.secrets.save(&payload.code) {
            warn!(error = %e, "Could not store activation code");
        }
        info!(username = %session.username, premium = %session.premium_status, "Activated");
        self.apply_session(session.clone(), true).await;
        Ok(session)
    }

    async fn activate_and_report(&self, payload: ActivationPayload) {
        let message = match self.activate(&payload).await {
            Ok(session) => UiMessage::Activation {
                ok: true,
                message: format!("Activated as {}", session.username),
            },
            Err(e) => {
                warn!(error = %e, username = %payload.username, "Activation failed");
                UiMessage::Activation {
                    ok: false,
                    message: activation_failure_message(&e),
                }
            }
        };
        self.ui.post(message);
    }

    /// Redeems the stored activation code again when the session file is
    /// gone. Returns whether a session was applied.
    async fn restore_activation(&self) -> bool {
        if !matches!(self.sessions.load(), Ok(None)) {
            return false;
        }
        let code = match self.secrets.load() {
            Ok(Some(code)) => code,
            Ok(None) => return false,
            Err(e) => {
                warn!(error = %e, "Stored activation code unreadable");
                return false;
            }
        };

        info!("No session on disk; redeeming stored activation code");
        let payload = ActivationPayload {
            code,
            username: String::new(),
        };
        match self.activate(&payload).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Stored activation code not redeemed");
                if matches!(e, AgentError::License(LicenseError::InvalidLogin(_))) {
                    if let Err(e) = self.secrets.clear() {
                        warn!(error = %e, "Could not remove stored activation code");
                    }
                }
                false
            }
        }
    }

    /// Drops the account session and falls back to a guest session.
    pub async fn logout(&self) {
        if let Err(e) = self.sessions.clear() {
            warn!(error = %e, "Could not remove session file");
        }
        if let Err(e) = self.secrets.clear() {
            warn!(error = %e, "Could not remove stored activation code");
        }
        info!("Logged out");
        self.apply_session(Session::guest(self.device.id()), true).await;
    }

    /// Forces a full gate check.
    pub fn recheck(&self) {
        if let Some(gate) = lock(&self.gate).as_ref() {
            if let Err(e) = gate.recheck() {
                warn!(error = %e, "Recheck not delivered");
            }
        }
    }

    /// The latest published gate state.
    #[must_use]
    pub fn access_state(&self) -> AccessState {
        lock(&self.gate)
            .as_ref()
            .map_or(AccessState::Unchecked, GateHandle::current)
    }

    /// The session on disk, or a guest session when there is none or it is
    /// unreadable.
    #[must_use]
    pub fn current_session(&self) -> Session {
        match self.sessions.load_or_guest(self.device.id()) {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Session unreadable; continuing as guest");
                Session::guest(self.device.id())
            }
        }
    }

    /// Re-sends everything the UI shows once resizing settles. A newer
    /// rebuild cancels this one.
    pub fn rebuild(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.rebuild.start(move |mut signal| async move {
            tokio::select! {
                () = signal.cancelled() => return,
                () = tokio::time::sleep(REBUILD_SETTLE) => {}
            }
            let Some(agent) = weak.upgrade() else { return };
            agent.ui.post(UiMessage::Access {
                access: agent.access_state(),
            });
            agent.post_session(&agent.current_session());
            agent.refresh_items().await;
        });
    }

    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Resolves once [`request_shutdown`](Self::request_shutdown) has been
    /// called.
    pub async fn shutdown_requested(&self) {
        let mut rx = self.shutdown.subscribe();
        let _ = rx.wait_for(|requested| *requested).await;
    }

    /// Stops every background task. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.request_shutdown();
        self.rebuild.cancel();
        lock(&self.watcher).take();

        let tasks = std::mem::take(&mut *lock(&self.tasks));
        for task in tasks {
            task.stop().await;
        }
        let gate = lock(&self.gate).take();
        if let Some(gate) = gate {
            gate.stop().await;
        }
        self.liveness.lock().await.stop().await;
        info!("Agent stopped");
    }

    // ── Sessions ────────────────────────────────────────────────

    /// Makes `session` current: restarts liveness, tells the UI and
    /// optionally forces a gate check.
    async fn apply_session(&self, session: Session, recheck: bool) {
        let reporting = self.liveness.lock().await.start(&session).await;
        debug!(username = %session.username, reporting, "Session applied");
        self.post_session(&session);
        *lock(&self.applied) = Some(session);
        if recheck {
            self.recheck();
        }
    }

    async fn on_session_changed(&self) {
        let session = self.current_session();
        if lock(&self.applied).as_ref() == Some(&session) {
            debug!("Session file rewritten without changes");
            return;
        }
        info!(username = %session.username, "Session changed on disk");
        self.apply_session(session, true).await;
    }

    fn post_session(&self, session: &Session) {
        self.ui.post(UiMessage::Session {
            username: session.username.clone(),
            premium_status: session.premium_status.clone(),
            guest: session.is_guest(),
        });
    }

    // ── Items ───────────────────────────────────────────────────

    async fn refresh_items(&self) {
        match self.with_toggler(|t| t.scan()).await {
            Ok(entries) => {
                self.ui.post(UiMessage::Items { entries });
            }
            Err(e) => {
                warn!(error = %e, "Item scan failed");
                self.ui.status(e.user_message());
            }
        }
    }

    async fn toggle(&self, id: ItemId, enable: bool) {
        let target = id.clone();
        match self.with_toggler(move |t| t.toggle(&target, enable)).await {
            Ok(entries) => {
                self.ui.post(UiMessage::Toggled {
                    id,
                    enabled: enable,
                    ok: true,
                    message: None,
                });
                self.ui.post(UiMessage::Items { entries });
            }
            Err(e) => {
                warn!(item = %id, enable, error = %e, "Toggle failed");
                self.ui.post(UiMessage::Toggled {
                    id,
                    enabled: enable,
                    ok: false,
                    message: Some(e.user_message()),
                });
            }
        }
    }

    async fn remove(&self, id: ItemId) {
        let target = id.clone();
        match self.with_toggler(move |t| t.remove(&target)).await {
            Ok(outcome) => {
                self.ui.post(UiMessage::Removed {
                    id,
                    outcome: Some(outcome),
                    message: None,
                });
                self.refresh_items().await;
            }
            Err(e) => {
                warn!(item = %id, error = %e, "Remove failed");
                self.ui.post(UiMessage::Removed {
                    id,
                    outcome: None,
                    message: Some(e.user_message()),
                });
            }
        }
    }

    async fn install(&self, id: ItemId) {
        let session = self.current_session();
        self.ui.status(format!("Installing item {id}"));
        match self.installer.install(&id, &session).await {
            Ok(entries) => {
                self.ui.status(format!("Installed item {id}"));
                self.ui.post(UiMessage::Items { entries });
            }
            Err(e) => {
                warn!(item = %id, error = %e, "Install failed");
                self.ui.status(e.user_message());
            }
        }
    }

    /// Runs blocking marker-directory work off the async workers.
    async fn with_toggler<T, F>(&self, job: F) -> ItemsResult<T>
    where
        F: FnOnce(&PluginFileToggler) -> ItemsResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let toggler = Arc::clone(&self.toggler);
        tokio::task::spawn_blocking(move || job(&toggler))
            .await
            .unwrap_or_else(|e| Err(ItemsError::Join(e.to_string())))
    }

    // ── Updates ─────────────────────────────────────────────────

    async fn check_updates(&self) {
        match self.client.version().await {
            Ok(info) if is_newer(&info.latest_version, &self.config.app_version) => {
                info!(current = %self.config.app_version, latest = %info.latest_version, "Update available");
                self.ui.post(UiMessage::UpdateAvailable {
                    current: self.config.app_version.clone(),
                    latest: info.latest_version,
                    mandatory: info.mandatory,
                    download_url: info.download_url,
                });
            }
            Ok(_) => debug!("Agent is up to date"),
            Err(e) => warn!(error = %e, "Version check failed"),
        }
        match self.client.patch_notes().await {
            Ok(notes) if !notes.notes.is_empty() => {
                self.ui.post(UiMessage::PatchNotes { notes: notes.notes });
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Patch notes unavailable"),
        }
    }

    fn push_task(&self, task: TaskHandle) {
        lock(&self.tasks).push(task);
    }
}

/// Posts every gate transition to the UI.
fn forward_access(mut states: watch::Receiver<AccessState>, ui: UiQueue) -> TaskHandle {
    TaskHandle::spawn("ui-access", move |mut signal| async move {
        loop {
            tokio::select! {
                () = signal.cancelled() => break,
                changed = states.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let access = states.borrow_and_update().clone();
                    if access == AccessState::Unchecked {
                        continue;
                    }
                    info!(state = access.label(), "Access state changed");
                    ui.post(UiMessage::Access { access });
                }
            }
        }
    })
}

/// Applies session file changes reported by the watcher.
fn follow_session(weak: Weak<Agent>, mut changed: mpsc::Receiver<()>) -> TaskHandle {
    TaskHandle::spawn("session-watch", move |mut signal| async move {
        loop {
            tokio::select! {
                () = signal.cancelled() => break,
                next = changed.recv() => {
                    let (Some(()), Some(agent)) = (next, weak.upgrade()) else {
                        break;
                    };
                    agent.on_session_changed().await;
                }
            }
        }
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Short explanation of a failed activation for the UI.
fn activation_failure_message(error: &AgentError) -> String {
    match error {
        AgentError::License(LicenseError::InvalidLogin(reason)) => reason.clone(),
        AgentError::Api(e) if e.is_transient() => {
            "The licensing service is unreachable. Try again later.".to_string()
        }
        AgentError::Api(ApiError::Status { status, .. }) if *status < 500 => {
            "The activation code was not accepted.".to_string()
        }
        _ => "Activation failed.".to_string(),
    }
}

/// Whether `latest` is a higher dotted version than `current`. Pre-release
/// and build suffixes are ignored.
fn is_newer(latest: &str, current: &str) -> bool {
    fn parts(version: &str) -> Vec<u64> {
        let core = version
            .trim()
            .trim_start_matches('v')
            .split(['-', '+'])
            .next()
            .unwrap_or_default();
        core.split('.').map(|p| p.parse().unwrap_or(0)).collect()
    }
    let (latest, current) = (parts(latest), parts(current));
    let len = latest.len().max(current.len());
    for i in 0..len {
        let a = latest.get(i).copied().unwrap_or(0);
        let b = current.get(i).copied().unwrap_or(0);
        if a != b {
            return a > b;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_comparison() {
        assert!(is_newer("1.2.0", "1.1.9"));
        assert!(is_newer("v2.0", "1.99.99"));
        assert!(is_newer("0.9.10", "0.9.2"));
        assert!(!is_newer("0.9.2", "0.9.2"));
        assert!(!is_newer("0.9.2-beta", "0.9.2"));
        assert!(!is_newer("0.9", "0.9.0"));
        assert!(!is_newer("0.8.7", "0.9.2"));
    }
}
