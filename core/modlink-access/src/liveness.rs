//! Periodic liveness reports for the current session.

use crate::error::bounded;
use crate::task::TaskHandle;
use modlink_api::{HeartbeatRequest, LivenessSink};
use modlink_license::Session;
use modlink_types::UnixTimestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Liveness settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// Master switch.
    pub enabled: bool,
    /// Whether guest sessions report at all.
    pub report_guests: bool,
    pub interval_secs: u64,
    /// Merged into every report.
    pub extra_params: BTreeMap<String, String>,
    /// Upper bound on one report.
    pub call_timeout_secs: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            report_guests: false,
            interval_secs: 60,
            extra_params: BTreeMap::new(),
            call_timeout_secs: 5,
        }
    }
}

/// Owns the heartbeat timer. At most one timer runs at a time.
pub struct LivenessReporter {
    sink: Arc<dyn LivenessSink>,
    config: LivenessConfig,
    app_version: String,
    task: Option<TaskHandle>,
}

impl LivenessReporter {
    pub fn new(
        sink: Arc<dyn LivenessSink>,
        config: LivenessConfig,
        app_version: impl Into<String>,
    ) -> Self {
        Self {
            sink,
            config,
            app_version: app_version.into(),
            task: None,
        }
    }

    /// Starts reporting for `session`, replacing any running timer.
    ///
    /// Returns false when reporting is disabled for this session.
    pub async fn start(&mut self, session: &Session) -> bool {
        self.stop().await;

        if !self.config.enabled {
            debug!("Liveness reporting disabled");
            return false;
        }
        if session.is_guest() && !self.config.report_guests {
            debug!("Liveness reporting disabled for guest session");
            return false;
        }

        let template = build_report(session, &self.app_version, &self.config.extra_params);
        let sink = Arc::clone(&self.sink);
        let timeout = Duration::from_secs(self.config.call_timeout_secs);
        let period = Duration::from_secs(self.config.interval_secs.max(1));

        info!(
            username = %session.username,
            interval_secs = period.as_secs(),
            "Liveness reporting started"
        );
        self.task = Some(TaskHandle::every("liveness", period, move || {
            let sink = Arc::clone(&sink);
            let mut report = template.clone();
            async move {
                report.timestamp = UnixTimestamp::now().as_secs();
                match bounded(timeout, sink.report_liveness(&report)).await {
                    Ok(()) => debug!(unique_id = %report.unique_id, "Liveness reported"),
                    Err(e) => warn!(error = %e, "Liveness report failed"),
                }
            }
        }));
        true
    }

    /// Stops the timer and waits for it to exit. No-op when idle.
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.stop().await;
            info!("Liveness reporting stopped");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

/// Builds the report body for `session`; the timestamp is filled per tick.
#[must_use]
pub fn build_report(
    session: &Session,
    app_version: &str,
    extra: &BTreeMap<String, String>,
) -> HeartbeatRequest {
    HeartbeatRequest {
        username: session.username.clone(),
        hwid: session.device_id.clone(),
        unique_id: session.unique_id.clone(),
        app_version: app_version.to_string(),
        timestamp: UnixTimestamp::now().as_secs(),
        extra: extra.clone(),
    }
}
