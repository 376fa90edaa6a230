//! The gate's polling state machine.

use crate::error::{AccessError, AccessResult};
use crate::gate::{AccessGate, CheckPhase};
use crate::task::{ShutdownSignal, TaskHandle};
use crate::verdict::AccessState;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

const TASK_NAME: &str = "access-gate";

/// Poll intervals and limits for the gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Full-check interval until `Active` is confirmed.
    pub restriction_poll_secs: u64,
    /// Full-check interval once `Active` is confirmed.
    pub active_recheck_secs: u64,
    /// Maintenance-only poll interval while in maintenance.
    pub maintenance_poll_secs: u64,
    /// Upper bound on one remote call.
    pub call_timeout_secs: u64,
    /// Unique ids restricted regardless of the remote verdict.
    pub blocked_accounts: Vec<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            restriction_poll_secs: 15,
            active_recheck_secs: 300,
            maintenance_poll_secs: 30,
            call_timeout_secs: 5,
            blocked_accounts: Vec::new(),
        }
    }
}

impl GateConfig {
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// How long to wait before the next check, or `None` to wait for an
    /// explicit recheck.
    fn wait_for(&self, state: &AccessState, confirmed: bool) -> Option<Duration> {
        match state {
            AccessState::Restricted(_) => None,
            AccessState::Maintenance(_) => Some(Duration::from_secs(self.maintenance_poll_secs)),
            AccessState::Active if confirmed => Some(Duration::from_secs(self.active_recheck_secs)),
            AccessState::Active | AccessState::Unchecked => {
                Some(Duration::from_secs(self.restriction_poll_secs))
            }
        }
    }
}

/// Spawns the gate loop.
pub struct GateRunner;

impl GateRunner {
    /// Starts the loop. The startup check runs immediately on the spawned
    /// task; observe [`GateHandle::subscribe`] for its result.
    #[must_use]
    pub fn start(gate: AccessGate, config: GateConfig) -> GateHandle {
        let (state_tx, state_rx) = watch::channel(AccessState::Unchecked);
        let (recheck_tx, recheck_rx) = mpsc::channel(1);
        let gate = Arc::new(gate);
        let task = TaskHandle::spawn(TASK_NAME, move |signal| {
            run(gate, config, state_tx, recheck_rx, signal)
        });
        GateHandle {
            state: state_rx,
            recheck: recheck_tx,
            task,
        }
    }
}

/// Owner's handle on the running gate loop.
#[derive(Debug)]
pub struct GateHandle {
    state: watch::Receiver<AccessState>,
    recheck: mpsc::Sender<()>,
    task: TaskHandle,
}

impl GateHandle {
    /// The latest published state.
    #[must_use]
    pub fn current(&self) -> AccessState {
        self.state.borrow().clone()
    }

    /// A receiver notified on every transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AccessState> {
        self.state.clone()
    }

    /// Forces a full check now. Coalesces with a recheck already pending.
    pub fn recheck(&self) -> AccessResult<()> {
        match self.recheck.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(())) => Err(AccessError::TaskStopped(TASK_NAME)),
        }
    }

    pub async fn stop(self) {
        self.task.stop().await;
    }
}

async fn run(
    gate: Arc<AccessGate>,
    config: GateConfig,
    state_tx: watch::Sender<AccessState>,
    mut recheck_rx: mpsc::Receiver<()>,
    mut signal: ShutdownSignal,
) {
    let (mut state, mut confirmed) = tokio::select! {
        _ = signal.cancelled() => return,
        r = gate.evaluate(CheckPhase::Startup, &AccessState::Unchecked) => r,
    };
    info!(state = state.label(), confirmed, "Initial access decision");
    state_tx.send_replace(state.clone());

    loop {
        let wait = config.wait_for(&state, confirmed);
        let forced = tokio::select! {
            _ = signal.cancelled() => break,
            Some(()) = recheck_rx.recv() => true,
            _ = sleep_or_forever(wait) => false,
        };

        if !forced && matches!(state, AccessState::Maintenance(_)) {
            match gate.check_maintenance().await {
                Some(m) if m.active => {
                    let next = AccessState::Maintenance(m);
                    if next != state {
                        state = next;
                        state_tx.send_replace(state.clone());
                    }
                    continue;
                }
                Some(_) => info!("Maintenance ended; re-running full check"),
                None => continue,
            }
        }

        let (next, next_confirmed) = tokio::select! {
            _ = signal.cancelled() => break,
            r = gate.evaluate(CheckPhase::Periodic, &state) => r,
        };
        confirmed = next_confirmed || (confirmed && next == state);
        if next != state {
            info!(from = state.label(), to = next.label(), "Access state changed");
            state = next;
            state_tx.send_replace(state.clone());
        } else {
            debug!(state = state.label(), confirmed, "Access state unchanged");
        }
    }
    debug!("Gate loop stopped");
}

async fn sleep_or_forever(wait: Option<Duration>) {
    match wait {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}
