//! Device identity, session persistence and activation for modlink.
//!
//! This module handles:
//! - Hardware-derived device identity, computed once and pinned to disk
//! - The persisted session record every other component reads
//! - Activation payloads delivered through the `modlink://` URL scheme
//! - Local storage of the last activation code
//!
//! # Design Principles
//!
//! - **Pinned identity**: the device id is computed on first launch and then
//!   only ever read back, so hardware drift never invalidates a session
//! - **Single writer**: the session file is owned by [`SessionStore`] and is
//!   replaced wholesale on every successful login or activation
//! - **Explicit decoding**: server responses are decoded into optional-field
//!   structs once, with defaulting rules applied at that boundary

mod activation;
mod device;
mod error;
mod secret;
mod session;

pub use activation::{ActivationPayload, ACTIVATION_SCHEME};
pub use device::{DeviceIdentity, HardwareComponents};
pub use error::{LicenseError, LicenseResult};
pub use secret::SecretStore;
pub use session::{LoginResponse, Session, SessionStore, GUEST_PREFIX};
