//! Vantage Workspace Services
//!
//! The per-workspace building blocks a context is assembled from:
//! - A filesystem capability abstracting local and tunnelled roots
//! - A bounded LRU result cache with TTL expiry
//! - Broadcast event buses with detachable subscriptions
//! - Project and session discovery
//! - File watching with debounced (native) or polled change detection

mod cache;
mod error;
pub mod discovery;
pub mod events;
pub mod fs;
pub mod watcher;

pub use cache::{CacheStats, CachedListing, ResultCache};
pub use discovery::{ProjectScanner, ProjectSummary, SessionSummary};
pub use error::WorkspaceError;
pub use events::{EventBus, Subscription};
pub use fs::{DirEntry, FileSystem, FsKind, LocalFileSystem};
pub use watcher::{
    ChangeKind, ContextWatcher, FileChange, TodoChange, WatchMode, WatcherEvent, WatcherOptions,
};
