//! reqwest-backed implementation of the service seams.

use crate::error::{ApiError, ApiResult};
use crate::source::{ItemSource, LivenessSink, VerdictSource};
use crate::wire::{
    ActivationRequest, HeartbeatRequest, ItemMetadata, MaintenanceStatus, PatchNotes,
    RestrictionQuery, RestrictionResponse, VersionInfo,
};
use async_trait::async_trait;
use modlink_license::LoginResponse;
use modlink_types::ItemId;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Connection settings for the remote service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Base URL, e.g. `https://api.modlink.app/v1`.
    pub base_url: String,
    /// Deadline for regular JSON calls (seconds).
    pub timeout_secs: u64,
    /// Deadline for archive downloads (seconds).
    pub download_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.modlink.app/v1".to_string(),
            timeout_secs: 5,
            download_timeout_secs: 60,
        }
    }
}

/// HTTP client for the licensing backend.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    config: ServiceConfig,
    client: Client,
}

impl ServiceClient {
    /// Creates a client. `user_agent` identifies the agent build.
    pub fn new(config: ServiceConfig, user_agent: &str) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(user_agent)
            .build()
            .map_err(|e| ApiError::Config(e.to_string()))?;
        Ok(Self { config, client })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Latest published agent version.
    pub async fn version(&self) -> ApiResult<VersionInfo> {
        let response = self.client.get(self.url("version")).send().await?;
        decode(response).await
    }

    /// Release notes, newest first.
    pub async fn patch_notes(&self) -> ApiResult<PatchNotes> {
        let response = self.client.get(self.url("patch-notes")).send().await?;
        decode(response).await
    }

    /// Redeems an activation code. Returns the decoded response plus the raw
    /// JSON, which the session keeps verbatim.
    pub async fn activate(
        &self,
        request: &ActivationRequest,
    ) -> ApiResult<(LoginResponse, serde_json::Value)> {
        let response = self
            .client
            .post(self.url("activate"))
            .json(request)
            .send()
            .await?;
        let raw: serde_json::Value = decode(response).await?;
        let login = serde_json::from_value(raw.clone())
            .map_err(|e| ApiError::Parse(format!("activation response: {e}")))?;
        Ok((login, raw))
    }
}

/// Checks the status and decodes a JSON body.
async fn decode<T: DeserializeOwned>(response: Response) -> ApiResult<T> {
    let response = check_status(response).await?;
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Parse(e.to_string()))
}

async fn check_status(response: Response) -> ApiResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl VerdictSource for ServiceClient {
    async fn maintenance_status(&self) -> ApiResult<MaintenanceStatus> {
        let response = self.client.get(self.url("maintenance")).send().await?;
        decode(response).await
    }

    async fn restriction_status(&self, query: &RestrictionQuery) -> ApiResult<RestrictionResponse> {
        let response = self
            .client
            .post(self.url("restriction"))
            .json(query)
            .send()
            .await?;
        decode(response).await
    }
}

#[async_trait]
impl LivenessSink for ServiceClient {
    async fn report_liveness(&self, report: &HeartbeatRequest) -> ApiResult<()> {
        let response = self
            .client
            .post(self.url("heartbeat"))
            .json(report)
            .send()
            .await?;
        check_status(response).await?;
        debug!(unique_id = %report.unique_id, "Liveness acknowledged");
        Ok(())
    }
}

#[async_trait]
impl ItemSource for ServiceClient {
    async fn item_metadata(&self, id: &ItemId) -> ApiResult<ItemMetadata> {
        let response = self.client.get(self.url(&format!("items/{id}"))).send().await?;
        decode(response).await
    }

    async fn download_item(&self, id: &ItemId) -> ApiResult<Vec<u8>> {
        let response = self
            .client
            .get(self.url(&format!("items/{id}/download")))
            .timeout(Duration::from_secs(self.config.download_timeout_secs))
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.bytes().await?.to_vec())
    }
}
