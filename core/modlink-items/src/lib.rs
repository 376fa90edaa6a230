//! Installed-item management for modlink.
//!
//! An installed item is a marker file `<id>.<ext>` in the marker directory;
//! the extension alone says whether the item is enabled. This crate scans and
//! flips those markers ([`PluginFileToggler`]) and installs new ones from
//! downloaded archives ([`ItemInstaller`]).

pub mod error;
pub mod installer;
pub mod toggler;
pub mod updates;

pub use error::{ItemsError, ItemsResult};
pub use installer::{ItemInstaller, ItemsConfig, RequestThrottle};
pub use toggler::{
    Elevator, FileKind, FileOps, GameFileEntry, MarkerLayout, PluginFileToggler, RemoveOutcome,
    StdFileOps, SystemElevator,
};
pub use updates::UpdateTable;
