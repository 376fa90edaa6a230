//! Service seams consumed by the agent components.
//!
//! Each component depends on the narrowest trait it needs so tests can
//! substitute scripted sources without a network.

use crate::error::ApiResult;
use crate::wire::{HeartbeatRequest, ItemMetadata, MaintenanceStatus, RestrictionQuery, RestrictionResponse};
use async_trait::async_trait;
use modlink_types::ItemId;

/// Remote verdicts about whether this device may operate.
#[async_trait]
pub trait VerdictSource: Send + Sync {
    /// Queries the dedicated maintenance channel.
    async fn maintenance_status(&self) -> ApiResult<MaintenanceStatus>;

    /// Queries the restriction (ban) channel.
    async fn restriction_status(&self, query: &RestrictionQuery) -> ApiResult<RestrictionResponse>;
}

/// Receiver of periodic liveness reports.
#[async_trait]
pub trait LivenessSink: Send + Sync {
    /// Sends one liveness report.
    async fn report_liveness(&self, report: &HeartbeatRequest) -> ApiResult<()>;
}

/// Catalog of downloadable items.
#[async_trait]
pub trait ItemSource: Send + Sync {
    /// Fetches metadata for one item.
    async fn item_metadata(&self, id: &ItemId) -> ApiResult<ItemMetadata>;

    /// Downloads the item's zip archive.
    async fn download_item(&self, id: &ItemId) -> ApiResult<Vec<u8>>;
}
