//! Vantage front-end context switching.
//!
//! Keeps one view per workspace context, snapshots it on the way out and
//! restores it on the way back while the daemon's listings are refetched in
//! the background.

pub mod backend;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod snapshot;
pub mod store;
pub mod validate;
pub mod view;

pub use backend::{Backend, IpcBackend};
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use orchestrator::{ContextSwitchOrchestrator, SwitchOutcome, SwitchPhase};
pub use snapshot::{Snapshot, SNAPSHOT_SCHEMA_VERSION};
pub use store::{
    ClientSnapshotStore, FileSnapshotBackend, MemorySnapshotBackend, SnapshotBackend, SnapshotMeta,
};
pub use validate::{validate, FreshLists};
pub use view::{Layout, Notification, Pane, Tab, ViewState};
