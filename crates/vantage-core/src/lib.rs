//! Vantage Core Components
//!
//! This crate provides the backend side of workspace switching: workspace
//! contexts and their lifecycle, the context registry, remote context
//! establishment, configuration, and the persistence interface.

mod config;
mod context;
mod error;
mod observer;
mod persistence;
mod registry;
mod remote;

pub use config::{CacheConfig, DaemonConfig, WatcherConfig};
pub use context::{ContextInfo, ContextKind, ContextOptions, WorkspaceContext, LOCAL_CONTEXT_ID};
pub use error::ContextError;
pub use observer::{ActiveContextObserver, ForwardMode};
pub use persistence::{ConfigStore, MemoryConfigStore, RemoteProfile, YamlConfigStore};
pub use registry::{ContextRegistry, SwitchResult};
pub use remote::{
    remote_context_id, AuthMethod, ConnectionState, ConnectionStatus, RemoteConfig,
    RemoteConnector, RemoteSession, RemoteTransport,
};
