//! Access states and the verdicts that produce them.
//!
//! Verdicts are transient: recomputed on every check and never persisted.

use modlink_api::{MaintenanceStatus, RestrictionResponse};
use serde::Serialize;

/// Where the UI should send a restricted user.
const RESTRICTED_REDIRECT: &str = "restricted";
/// Where the UI should send a user while the service is down.
const MAINTENANCE_REDIRECT: &str = "maintenance";

/// Why the service refused this device or account.
///
/// Declared in precedence order: when several ban flags are set at once the
/// earliest variant wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonKind {
    HwidBanned,
    AccountBanned,
    IpBanned,
    Maintenance,
    Unknown,
}

impl ReasonKind {
    fn default_text(self) -> &'static str {
        match self {
            Self::HwidBanned => "This device has been blocked.",
            Self::AccountBanned => "This account has been blocked.",
            Self::IpBanned => "Your network has been blocked.",
            Self::Maintenance => "The service is under maintenance.",
            Self::Unknown => "Access to the service is restricted.",
        }
    }
}

/// Outcome of the restriction channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestrictionVerdict {
    pub is_restricted: bool,
    pub reason_kind: ReasonKind,
    pub reason_text: String,
    pub redirect_path: String,
}

impl RestrictionVerdict {
    /// Resolves a raw response to its highest-precedence reason.
    ///
    /// A response with no ban flag is still restricted when the service says
    /// so; it then carries the generic reason.
    #[must_use]
    pub fn from_response(response: &RestrictionResponse) -> Self {
        let candidates = [
            (response.hwid_banned, ReasonKind::HwidBanned, &response.hwid_reason),
            (
                response.account_banned || response.unique_id_banned,
                ReasonKind::AccountBanned,
                &response.account_reason,
            ),
            (response.ip_banned, ReasonKind::IpBanned, &response.ip_reason),
            (
                response.maintenance,
                ReasonKind::Maintenance,
                &response.maintenance_message,
            ),
        ];
        let flagged = candidates.iter().find(|(set, _, _)| *set);
        let is_restricted = response.is_restricted || flagged.is_some();

        let (reason_kind, specific) = match flagged {
            Some((_, kind, text)) => (*kind, text.as_deref()),
            None => (ReasonKind::Unknown, None),
        };
        let reason_text = non_empty(specific)
            .or_else(|| non_empty(response.reason.as_deref()))
            .unwrap_or_else(|| reason_kind.default_text())
            .to_string();
        let default_redirect = if reason_kind == ReasonKind::Maintenance {
            MAINTENANCE_REDIRECT
        } else {
            RESTRICTED_REDIRECT
        };
        let redirect_path = non_empty(response.redirect.as_deref())
            .unwrap_or(default_redirect)
            .to_string();

        Self {
            is_restricted,
            reason_kind,
            reason_text,
            redirect_path,
        }
    }

    /// Verdict for an account on the local block list.
    #[must_use]
    pub fn blocked_locally() -> Self {
        Self {
            is_restricted: true,
            reason_kind: ReasonKind::Unknown,
            reason_text: ReasonKind::Unknown.default_text().to_string(),
            redirect_path: RESTRICTED_REDIRECT.to_string(),
        }
    }
}

/// Outcome of the maintenance channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaintenanceVerdict {
    pub active: bool,
    pub expected_duration: Option<String>,
    pub message: String,
    pub redirect_path: String,
}

impl MaintenanceVerdict {
    #[must_use]
    pub fn from_status(status: &MaintenanceStatus) -> Self {
        Self {
            active: status.active,
            expected_duration: status.expected_duration.clone(),
            message: non_empty(status.message.as_deref())
                .unwrap_or(ReasonKind::Maintenance.default_text())
                .to_string(),
            redirect_path: non_empty(status.redirect.as_deref())
                .unwrap_or(MAINTENANCE_REDIRECT)
                .to_string(),
        }
    }

    /// Maintenance inferred from the restriction channel.
    #[must_use]
    pub fn from_restriction(verdict: &RestrictionVerdict) -> Self {
        Self {
            active: true,
            expected_duration: None,
            message: verdict.reason_text.clone(),
            redirect_path: verdict.redirect_path.clone(),
        }
    }
}

/// Whether this instance may operate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AccessState {
    Unchecked,
    Active,
    Restricted(RestrictionVerdict),
    Maintenance(MaintenanceVerdict),
}

impl AccessState {
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Short name for logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unchecked => "unchecked",
            Self::Active => "active",
            Self::Restricted(_) => "restricted",
            Self::Maintenance(_) => "maintenance",
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn hwid_wins_over_everything() {
        let response = RestrictionResponse {
            is_restricted: true,
            hwid_banned: true,
            hwid_reason: Some("blocked".into()),
            account_banned: true,
            account_reason: Some("account".into()),
            ip_banned: true,
            maintenance: true,
            ..Default::default()
        };
        let verdict = RestrictionVerdict::from_response(&response);
        assert_eq!(verdict.reason_kind, ReasonKind::HwidBanned);
        assert_eq!(verdict.reason_text, "blocked");
        assert_eq!(verdict.redirect_path, "restricted");
    }

    #[test]
    fn unique_id_ban_counts_as_account() {
        let response = RestrictionResponse {
            unique_id_banned: true,
            ip_banned: true,
            ip_reason: Some("vpn".into()),
            ..Default::default()
        };
        let verdict = RestrictionVerdict::from_response(&response);
        assert!(verdict.is_restricted);
        assert_eq!(verdict.reason_kind, ReasonKind::AccountBanned);
        assert_eq!(verdict.reason_text, ReasonKind::AccountBanned.default_text());
    }

    #[test]
    fn ip_before_maintenance() {
        let response = RestrictionResponse {
            ip_banned: true,
            maintenance: true,
            ..Default::default()
        };
        assert_eq!(
            RestrictionVerdict::from_response(&response).reason_kind,
            ReasonKind::IpBanned
        );
    }

    #[test]
    fn generic_reason_and_redirect() {
        let response = RestrictionResponse {
            is_restricted: true,
            reason: Some("terms violation".into()),
            redirect: Some("appeal".into()),
            ..Default::default()
        };
        let verdict = RestrictionVerdict::from_response(&response);
        assert_eq!(verdict.reason_kind, ReasonKind::Unknown);
        assert_eq!(verdict.reason_text, "terms violation");
        assert_eq!(verdict.redirect_path, "appeal");
    }

    #[test]
    fn clean_response_is_not_restricted() {
        let verdict = RestrictionVerdict::from_response(&RestrictionResponse::default());
        assert!(!verdict.is_restricted);
    }

    #[test]
    fn state_serializes_tagged() {
        let json = serde_json::to_value(AccessState::Active).unwrap();
        assert_eq!(json, serde_json::json!({"state": "active"}));
    }
}
