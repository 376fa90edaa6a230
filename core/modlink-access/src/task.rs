//! Owned background tasks.
//!
//! Each loop is spawned with a [`ShutdownSignal`] and controlled through the
//! [`TaskHandle`] its owner keeps. Dropping the handle aborts the task.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

/// How long [`TaskHandle::stop`] waits before aborting the task.
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Cooperative cancellation token handed to a spawned task.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Completes once shutdown has been requested (or the handle dropped).
    pub async fn cancelled(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Handle to a running background task.
#[derive(Debug)]
pub struct TaskHandle {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
}

impl TaskHandle {
    /// Spawns `body` on the current runtime.
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(ShutdownSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown, rx) = watch::channel(false);
        let join = tokio::spawn(body(ShutdownSignal { rx }));
        debug!(task = name, "Task started");
        Self {
            name,
            shutdown,
            join: Some(join),
        }
    }

    /// Spawns a loop that runs `tick` every `period`, starting immediately.
    ///
    /// A tick that overruns its period causes the missed ticks to be skipped
    /// rather than queued, and a tick never overlaps the previous one. A
    /// panicking tick is logged and the loop continues.
    pub fn every<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::spawn(name, move |mut signal| async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = signal.cancelled() => break,
                    _ = interval.tick() => {}
                }
                tokio::select! {
                    _ = signal.cancelled() => break,
                    outcome = AssertUnwindSafe(tick()).catch_unwind() => {
                        if outcome.is_err() {
                            error!(task = name, "Tick panicked; continuing");
                        }
                    }
                }
            }
            debug!(task = name, "Task loop exited");
        })
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Requests shutdown and waits for the task to exit, aborting it after a
    /// short grace period.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        let Some(mut join) = self.join.take() else {
            return;
        };
        match tokio::time::timeout(STOP_GRACE, &mut join).await {
            Ok(Ok(())) => debug!(task = self.name, "Task stopped"),
            Ok(Err(e)) if e.is_cancelled() => {}
            Ok(Err(e)) => warn!(task = self.name, error = %e, "Task ended abnormally"),
            Err(_) => {
                warn!(task = self.name, "Task did not stop in time; aborting");
                join.abort();
            }
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = self.shutdown.send(true);
            join.abort();
        }
    }
}
