//! Access decisions and liveness reporting for the modlink agent.
//!
//! [`AccessGate`] turns the remote maintenance and restriction channels into a
//! single [`AccessState`]; [`GateRunner`] re-evaluates it on a schedule that
//! depends on the current state. [`LivenessReporter`] owns the heartbeat
//! timer. Every background loop is a [`TaskHandle`] owned by its component.

pub mod blocklist;
pub mod error;
pub mod gate;
pub mod liveness;
pub mod runner;
pub mod task;
pub mod verdict;

pub use blocklist::BlockList;
pub use error::{AccessError, AccessResult};
pub use gate::{AccessGate, CheckOutcome, CheckPhase};
pub use liveness::{LivenessConfig, LivenessReporter};
pub use runner::{GateConfig, GateHandle, GateRunner};
pub use task::{ShutdownSignal, TaskHandle};
pub use verdict::{AccessState, MaintenanceVerdict, ReasonKind, RestrictionVerdict};
