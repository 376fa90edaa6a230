//! One access decision.
//!
//! The gate holds no state of its own: every check re-reads the session file
//! and queries the remote channels afresh.

use crate::blocklist::BlockList;
use crate::error::bounded;
use crate::verdict::{AccessState, MaintenanceVerdict, ReasonKind, RestrictionVerdict};
use modlink_api::{RestrictionQuery, VerdictSource};
use modlink_license::{Session, SessionStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// When a check runs. Only affects how "no verdict" is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckPhase {
    Startup,
    Periodic,
}

/// Result of a full check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The service (or the local block list) produced a decision.
    Decided(AccessState),
    /// Neither channel could be reached or understood.
    NoVerdict,
}

impl CheckOutcome {
    /// Maps the outcome onto the next state.
    ///
    /// Returns the new state plus whether it is confirmed. At startup a
    /// missing verdict fails open to an unconfirmed `Active`; later it leaves
    /// `current` as it was.
    #[must_use]
    pub fn resolve(self, phase: CheckPhase, current: &AccessState) -> (AccessState, bool) {
        match (self, phase) {
            (Self::Decided(state), _) => (state, true),
            (Self::NoVerdict, CheckPhase::Startup) => (AccessState::Active, false),
            (Self::NoVerdict, CheckPhase::Periodic) => (current.clone(), false),
        }
    }
}

/// Decides whether this device may operate.
pub struct AccessGate {
    source: Arc<dyn VerdictSource>,
    sessions: SessionStore,
    device_id: String,
    block_list: BlockList,
    call_timeout: Duration,
}

impl AccessGate {
    pub fn new(
        source: Arc<dyn VerdictSource>,
        sessions: SessionStore,
        device_id: impl Into<String>,
        block_list: BlockList,
        call_timeout: Duration,
    ) -> Self {
        Self {
            source,
            sessions,
            device_id: device_id.into(),
            block_list,
            call_timeout,
        }
    }

    /// Runs a full check and resolves it for `phase`.
    pub async fn evaluate(&self, phase: CheckPhase, current: &AccessState) -> (AccessState, bool) {
        self.check().await.resolve(phase, current)
    }

    /// Full check: maintenance, then restriction, then the local block list.
    pub async fn check(&self) -> CheckOutcome {
        let session = self.current_session();

        let maintenance = match bounded(self.call_timeout, self.source.maintenance_status()).await
        {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(error = %e, "Maintenance check failed; inferring from restriction channel");
                None
            }
        };
        if let Some(status) = maintenance.as_ref().filter(|s| s.active) {
            info!("Service reports maintenance");
            return CheckOutcome::Decided(AccessState::Maintenance(MaintenanceVerdict::from_status(
                status,
            )));
        }

        let query = restriction_query(&session);
        let restriction =
            match bounded(self.call_timeout, self.source.restriction_status(&query)).await {
                Ok(response) => Some((
                    response.is_restricted,
                    RestrictionVerdict::from_response(&response),
                )),
                Err(e) => {
                    warn!(error = %e, "Restriction check failed");
                    None
                }
            };

        if let Some((declared, verdict)) = restriction.as_ref().filter(|(_, v)| v.is_restricted) {
            if verdict.reason_kind == ReasonKind::Maintenance {
                // Only reachable when nothing else is flagged. A bare
                // maintenance flag yields to a working maintenance channel
                // that said "inactive"; a declared restriction never does.
                if maintenance.is_none() || *declared {
                    info!(declared, "Maintenance reported by restriction channel");
                    return CheckOutcome::Decided(AccessState::Maintenance(
                        MaintenanceVerdict::from_restriction(verdict),
                    ));
                }
            } else {
                info!(reason = ?verdict.reason_kind, text = %verdict.reason_text, "Access restricted");
                return CheckOutcome::Decided(AccessState::Restricted(verdict.clone()));
            }
        }

        if self.block_list.contains(&session.unique_id) {
            info!(unique_id = %session.unique_id, "Account is on the local block list");
            return CheckOutcome::Decided(AccessState::Restricted(
                RestrictionVerdict::blocked_locally(),
            ));
        }

        match restriction {
            Some(_) => CheckOutcome::Decided(AccessState::Active),
            None => CheckOutcome::NoVerdict,
        }
    }

    /// Maintenance channel only. `None` when the channel is unreachable.
    pub async fn check_maintenance(&self) -> Option<MaintenanceVerdict> {
        match bounded(self.call_timeout, self.source.maintenance_status()).await {
            Ok(status) => Some(MaintenanceVerdict::from_status(&status)),
            Err(e) => {
                debug!(error = %e, "Maintenance poll failed");
                None
            }
        }
    }

    fn current_session(&self) -> Session {
        match self.sessions.load() {
            Ok(Some(session)) => session,
            Ok(None) => Session::guest(&self.device_id),
            Err(e) => {
                warn!(error = %e, "Session file unreadable; checking as guest");
                Session::guest(&self.device_id)
            }
        }
    }
}

fn restriction_query(session: &Session) -> RestrictionQuery {
    if session.is_guest() {
        return RestrictionQuery {
            hwid: session.device_id.clone(),
            ..Default::default()
        };
    }
    RestrictionQuery {
        hwid: session.device_id.clone(),
        unique_id: Some(session.unique_id.clone()),
        account_id: session.account_id(),
        username: Some(session.username.clone()),
    }
}
