//! Workspace context: one root and the services bound to it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use vantage_workspace::{
    ContextWatcher, EventBus, FileSystem, LocalFileSystem, ProjectScanner, ResultCache,
    WatcherEvent, WatcherOptions,
};

/// Id of the permanent local context
pub const LOCAL_CONTEXT_ID: &str = "local";

/// Where a context's root lives.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    Local,
    Remote,
}

/// Public listing record. Carries no capability handles or credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextInfo {
    pub id: String,
    pub kind: ContextKind,
}

/// Service settings used when assembling a context.
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
    /// How often expired cache entries are swept while started
    pub cleanup_interval: Duration,
    pub watcher: WatcherOptions,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            cache_capacity: 200,
            cache_ttl: Duration::from_secs(600),
            cleanup_interval: Duration::from_secs(60),
            watcher: WatcherOptions::default(),
        }
    }
}

/// An isolated workspace and its backing services.
///
/// Lifecycle: `start` once, then any number of `pause`/`resume`, then
/// `dispose`. Once disposed every lifecycle call is logged and ignored.
pub struct WorkspaceContext {
    id: String,
    kind: ContextKind,
    root: PathBuf,
    fs: Arc<dyn FileSystem>,
    cache: Arc<ResultCache>,
    scanner: Arc<ProjectScanner>,
    watcher: ContextWatcher,
    cleanup_interval: Duration,
    /// Owned by the context, not the cache
    cleanup_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl WorkspaceContext {
    /// Assemble a context: filesystem, cache, discovery, then watcher.
    pub fn new(
        id: impl Into<String>,
        kind: ContextKind,
        root: impl Into<PathBuf>,
        fs: Arc<dyn FileSystem>,
        options: ContextOptions,
    ) -> Self {
        let root = root.into();
        let cache = Arc::new(ResultCache::new(options.cache_capacity, options.cache_ttl));
        let scanner = Arc::new(ProjectScanner::new(fs.clone(), root.clone(), cache.clone()));
        let watcher = ContextWatcher::new(scanner.clone(), options.watcher);

        Self {
            id: id.into(),
            kind,
            root,
            fs,
            cache,
            scanner,
            watcher,
            cleanup_interval: options.cleanup_interval,
            cleanup_task: parking_lot::Mutex::new(None),
            disposed: AtomicBool::new(false),
        }
    }

    /// The permanent local context over `root`.
    pub fn local(root: impl Into<PathBuf>, options: ContextOptions) -> Self {
        Self::new(
            LOCAL_CONTEXT_ID,
            ContextKind::Local,
            root,
            Arc::new(LocalFileSystem::new()),
            options,
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    pub fn scanner(&self) -> &Arc<ProjectScanner> {
        &self.scanner
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Change events from this context's watcher
    pub fn events(&self) -> &Arc<EventBus<WatcherEvent>> {
        self.watcher.events()
    }

    pub fn info(&self) -> ContextInfo {
        ContextInfo {
            id: self.id.clone(),
            kind: self.kind,
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.is_running()
    }

    /// Activate the watcher and the periodic cache sweep.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        if self.is_disposed() {
            tracing::error!(context_id = %self.id, "Cannot start a disposed context");
            return;
        }

        self.start_watcher();

        let mut cleanup = self.cleanup_task.lock();
        if cleanup.is_none() {
            let cache = self.cache.clone();
            let period = self.cleanup_interval;
            *cleanup = Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                // First tick completes immediately
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    cache.prune_expired();
                }
            }));
        }

        tracing::info!(context_id = %self.id, root = ?self.root, "Context started");
    }

    /// Stop the watcher while the context is in the background.
    pub fn pause(&self) {
        if self.is_disposed() {
            tracing::error!(context_id = %self.id, "Cannot pause a disposed context");
            return;
        }

        self.watcher.stop();
        tracing::debug!(context_id = %self.id, "Context paused");
    }

    /// Restart the watcher after a pause.
    pub fn resume(&self) {
        if self.is_disposed() {
            tracing::error!(context_id = %self.id, "Cannot resume a disposed context");
            return;
        }

        self.start_watcher();
        tracing::debug!(context_id = %self.id, "Context resumed");
    }

    /// Release everything. Idempotent; returns `false` if already disposed.
    pub fn dispose(&self) -> bool {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return false;
        }

        // Timers, then cached state, then subscriptions
        if let Some(task) = self.cleanup_task.lock().take() {
            task.abort();
        }
        self.watcher.stop();
        self.cache.clear();
        self.watcher.dispose();

        tracing::info!(context_id = %self.id, "Context disposed");
        true
    }

    fn start_watcher(&self) {
        // A workspace without a watchable root is still browsable
        if let Err(e) = self.watcher.start() {
            tracing::warn!(context_id = %self.id, error = %e, "Watcher unavailable");
        }
    }

    #[cfg(test)]
    pub(crate) fn has_cleanup_task(&self) -> bool {
        self.cleanup_task.lock().is_some()
    }
}

impl Drop for WorkspaceContext {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for WorkspaceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceContext")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("root", &self.root)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
