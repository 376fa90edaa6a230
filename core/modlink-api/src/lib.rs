//! Remote licensing service client for modlink.
//!
//! Provides:
//! - Explicit wire types for every endpoint the agent consumes
//! - Narrow async traits ([`VerdictSource`], [`LivenessSink`], [`ItemSource`])
//!   that the gate, the liveness reporter and the item installer depend on
//! - [`ServiceClient`], the reqwest-backed implementation of all of them
//!
//! Every request is bounded by a timeout so a stalled service cannot starve
//! the agent's background timers.

mod client;
mod error;
mod source;
pub mod wire;

pub use client::{ServiceClient, ServiceConfig};
pub use error::{ApiError, ApiResult};
pub use source::{ItemSource, LivenessSink, VerdictSource};
pub use wire::{
    ActivationRequest, HeartbeatRequest, ItemMetadata, MaintenanceStatus, PatchNote, PatchNotes,
    RestrictionQuery, RestrictionResponse, VersionInfo,
};
