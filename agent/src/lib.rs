//! modlink agent composition.
//!
//! Wires the core crates into one running process:
//! - [`AgentConfig`]: layered defaults plus an optional `config.toml`
//! - [`Agent`]: gate loop, liveness, session watching and item commands
//! - [`ui`]: the message queue between the agent and its UI surface
//! - [`logging`]: stderr plus append-only file output

pub mod agent;
pub mod config;
pub mod error;
pub mod logging;
pub mod ui;
pub mod watcher;

pub use agent::Agent;
pub use config::{AgentConfig, AgentPaths, CONFIG_FILE};
pub use error::{AgentError, AgentResult};
pub use ui::{RebuildGate, UiCommand, UiMessage, UiQueue, UiReceiver};
pub use watcher::SessionWatcher;
