//! Keeps exactly one agent process alive per user.
//!
//! The first process takes an exclusive lock and becomes the primary; it then
//! listens on a local endpoint (a Unix socket or a Windows named pipe) for
//! activation URLs. Any later process finds the lock held, forwards its
//! activation URL to the primary and exits.

mod arbiter;
mod error;
mod listener;
mod transport;

pub use arbiter::{Acquisition, InstanceArbiter, InstanceConfig, PrimaryGuard};
pub use error::{InstanceError, InstanceResult};
pub use listener::ListenerHandle;
pub use transport::Endpoint;
