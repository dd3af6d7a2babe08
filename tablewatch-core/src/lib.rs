//! tablewatch-core - Self-monitoring for multiplayer card-game servers
//!
//! Four cooperating parts observe a running game server:
//!
//! - [`knowledge`] records every fix attempt and suggests what to try next
//! - [`causal`] traces detected issues back to the state changes behind them
//! - [`learning`] scores how much the accumulated knowledge can be trusted,
//!   and flags results that look like masking rather than fixing
//! - [`decision`] drives the investigation state machine and pause/resume
//!
//! [`monitor`] wires them together in a single task fed by the host's
//! state store and issue registry.

pub mod causal;
pub mod collab;
pub mod config;
pub mod decision;
pub mod error;
pub mod events;
pub mod knowledge;
pub mod learning;
pub mod monitor;
pub mod store;
pub mod types;

pub use config::{MonitorConfig, StorageConfig, WatchConfig};
pub use error::{Result, WatchError};
pub use events::{EventBus, WatchEvent};
pub use monitor::{
    Collaborators, Monitor, MonitorCommand, MonitorHandle, MonitorLoopResult, start_monitor,
};
pub use types::*;
