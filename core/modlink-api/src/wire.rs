//! Request and response bodies.
//!
//! Responses are decoded once at the boundary into optional-field structs;
//! absent fields take the defaults declared here rather than being probed
//! ad hoc by consumers.

use modlink_types::ItemId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `GET /maintenance`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceStatus {
    #[serde(default, alias = "maintenance")]
    pub active: bool,
    #[serde(default)]
    pub expected_duration: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub redirect: Option<String>,
}

/// `POST /restriction` request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestrictionQuery {
    pub hwid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// `POST /restriction` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestrictionResponse {
    pub is_restricted: bool,
    pub hwid_banned: bool,
    pub hwid_reason: Option<String>,
    pub account_banned: bool,
    pub unique_id_banned: bool,
    pub account_reason: Option<String>,
    pub ip_banned: bool,
    pub ip_reason: Option<String>,
    pub maintenance: bool,
    pub maintenance_message: Option<String>,
    pub reason: Option<String>,
    pub redirect: Option<String>,
}

/// `POST /heartbeat` request. `extra` is flattened into the top-level object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub username: String,
    pub hwid: String,
    pub unique_id: String,
    pub app_version: String,
    pub timestamp: i64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

/// `GET /version`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    #[serde(alias = "version")]
    pub latest_version: String,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub mandatory: bool,
}

/// One release in `GET /patch-notes`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchNote {
    pub version: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub changes: Vec<String>,
}

/// `GET /patch-notes`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchNotes {
    #[serde(default)]
    pub notes: Vec<PatchNote>,
}

/// `GET /items/{id}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMetadata {
    pub id: ItemId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub premium: bool,
    /// RFC 3339 time of the latest published archive.
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

/// `POST /activate` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationRequest {
    pub code: String,
    pub username: String,
    pub hwid: String,
}
