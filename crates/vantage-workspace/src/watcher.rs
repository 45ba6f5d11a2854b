//! Workspace file watcher.
//!
//! Native roots are watched through the platform backend (inotify/FSEvents)
//! with debouncing; tunnelled roots are polled. Raw changes are coalesced
//! per path and flushed on a short interval: each flush invalidates the
//! affected discovery cache entries, then emits [`WatcherEvent`]s on the
//! watcher's [`EventBus`].
//!
//! Lifecycle: `start` → (`stop` ↔ `start`)* → `dispose`. Once disposed the
//! watcher never runs again.

use crate::discovery::ProjectScanner;
use crate::events::EventBus;
use crate::WorkspaceError;
use notify::event::{MetadataKind, ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_full::{new_debouncer, DebouncedEvent, Debouncer, RecommendedCache};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// File change type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

/// A change to something under `<root>/projects`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub project_id: Option<String>,
    pub session_id: Option<String>,
}

/// A change to something under `<root>/todos`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TodoChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub session_id: Option<String>,
}

/// Event emitted by a [`ContextWatcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherEvent {
    File(FileChange),
    Todo(TodoChange),
}

impl WatcherEvent {
    pub fn path(&self) -> &Path {
        match self {
            WatcherEvent::File(c) => &c.path,
            WatcherEvent::Todo(c) => &c.path,
        }
    }
}

/// How the root is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    /// Platform notifications with debouncing
    Native,
    /// Periodic rescans at the given interval
    Poll(Duration),
}

/// Options for the watcher.
#[derive(Debug, Clone)]
pub struct WatcherOptions {
    /// Debounce duration (native mode)
    pub debounce_duration: Duration,
    /// How often coalesced changes are flushed to subscribers
    pub flush_interval: Duration,
    pub mode: WatchMode,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            debounce_duration: Duration::from_millis(500),
            flush_interval: Duration::from_millis(100),
            mode: WatchMode::Native,
        }
    }
}

// Held only for its Drop, which stops the underlying watcher
#[allow(dead_code)]
enum WatchBackend {
    Native(Debouncer<RecommendedWatcher, RecommendedCache>),
    Poll(PollWatcher),
}

/// Coalesces raw changes per path until the next flush.
#[derive(Default)]
struct ChangeBatcher {
    changes: HashMap<PathBuf, WatcherEvent>,
}

impl ChangeBatcher {
    fn add(&mut self, event: WatcherEvent) {
        let path = event.path().to_path_buf();
        match self.changes.get_mut(&path) {
            Some(existing) => {
                // Delete always wins over modify/create
                let new_kind = kind_of(&event);
                if new_kind == ChangeKind::Deleted || kind_of(existing) != ChangeKind::Deleted {
                    *existing = event;
                }
            }
            None => {
                self.changes.insert(path, event);
            }
        }
    }

    fn take(&mut self) -> Vec<WatcherEvent> {
        let mut batch: Vec<_> = self.changes.drain().map(|(_, e)| e).collect();
        batch.sort_by(|a, b| a.path().cmp(b.path()));
        batch
    }

    fn clear(&mut self) {
        self.changes.clear();
    }

    fn len(&self) -> usize {
        self.changes.len()
    }
}

fn kind_of(event: &WatcherEvent) -> ChangeKind {
    match event {
        WatcherEvent::File(c) => c.kind,
        WatcherEvent::Todo(c) => c.kind,
    }
}

#[derive(Default)]
struct WatcherState {
    backend: Option<WatchBackend>,
    flush_task: Option<JoinHandle<()>>,
}

/// File watcher bound to one workspace root.
pub struct ContextWatcher {
    root: PathBuf,
    options: WatcherOptions,
    scanner: Arc<ProjectScanner>,
    events: Arc<EventBus<WatcherEvent>>,
    pending: Arc<Mutex<ChangeBatcher>>,
    state: Mutex<WatcherState>,
    disposed: AtomicBool,
}

impl ContextWatcher {
    /// Create a stopped watcher for the scanner's root.
    pub fn new(scanner: Arc<ProjectScanner>, options: WatcherOptions) -> Self {
        Self {
            root: scanner.root().to_path_buf(),
            options,
            scanner,
            events: Arc::new(EventBus::new()),
            pending: Arc::new(Mutex::new(ChangeBatcher::default())),
            state: Mutex::new(WatcherState::default()),
            disposed: AtomicBool::new(false),
        }
    }

    /// Bus carrying this watcher's change events.
    pub fn events(&self) -> &Arc<EventBus<WatcherEvent>> {
        &self.events
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().backend.is_some()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Start watching. A no-op if already running or disposed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), WorkspaceError> {
        if self.is_disposed() {
            error!(root = ?self.root, "Refusing to start a disposed watcher");
            return Ok(());
        }

        let mut state = self.state.lock();
        if state.backend.is_some() {
            debug!(root = ?self.root, "Watcher already running");
            return Ok(());
        }

        let root = self
            .root
            .canonicalize()
            .map_err(|_| WorkspaceError::NotFound(self.root.clone()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let backend = self.create_backend(&root, tx)?;

        state.flush_task = Some(tokio::spawn(flush_loop(
            rx,
            self.pending.clone(),
            self.scanner.clone(),
            self.events.clone(),
            self.options.flush_interval,
        )));
        state.backend = Some(backend);

        info!(root = ?root, mode = ?self.options.mode, "Started watching");
        Ok(())
    }

    /// Stop watching, keeping the bus and its subscribers. Reversible.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if state.backend.is_none() && state.flush_task.is_none() {
            return;
        }

        // Backend first so nothing new is queued, then the flush timer
        state.backend = None;
        if let Some(task) = state.flush_task.take() {
            task.abort();
        }
        self.pending.lock().clear();

        debug!(root = ?self.root, "Stopped watching");
    }

    /// Tear down for good. Idempotent; returns `false` when already disposed.
    ///
    /// Order: watch backend and flush timer, then pending changes, then bus
    /// subscriptions. A flush in flight never sees a half-cleared batcher.
    pub fn dispose(&self) -> bool {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return false;
        }

        {
            let mut state = self.state.lock();
            state.backend = None;
            if let Some(task) = state.flush_task.take() {
                task.abort();
            }
        }

        self.pending.lock().clear();

        self.events.close();

        info!(root = ?self.root, "Watcher disposed");
        true
    }

    fn create_backend(
        &self,
        root: &Path,
        tx: mpsc::UnboundedSender<WatcherEvent>,
    ) -> Result<WatchBackend, WorkspaceError> {
        match self.options.mode {
            WatchMode::Native => {
                let handler_root = root.to_path_buf();
                let mut debouncer = new_debouncer(
                    self.options.debounce_duration,
                    None,
                    move |result: Result<Vec<DebouncedEvent>, Vec<notify::Error>>| match result {
                        Ok(events) => {
                            for event in events {
                                forward(&handler_root, &event.event, &tx);
                            }
                        }
                        Err(errors) => {
                            for e in errors {
                                warn!(error = %e, "Watcher error");
                            }
                        }
                    },
                )?;

                debouncer.watch(root, RecursiveMode::Recursive)?;
                Ok(WatchBackend::Native(debouncer))
            }
            WatchMode::Poll(interval) => {
                let handler_root = root.to_path_buf();
                let mut watcher = PollWatcher::new(
                    move |result: notify::Result<Event>| match result {
                        Ok(event) => forward(&handler_root, &event, &tx),
                        Err(e) => warn!(error = %e, "Poll watcher error"),
                    },
                    Config::default().with_poll_interval(interval),
                )?;

                watcher.watch(root, RecursiveMode::Recursive)?;
                Ok(WatchBackend::Poll(watcher))
            }
        }
    }
}

impl Drop for ContextWatcher {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn forward(root: &Path, event: &Event, tx: &mpsc::UnboundedSender<WatcherEvent>) {
    let Some(kind) = convert_kind(&event.kind) else {
        return;
    };

    for path in &event.paths {
        if let Some(change) = classify(root, path, kind) {
            // Receiver gone means the watcher is stopping
            let _ = tx.send(change);
        }
    }
}

async fn flush_loop(
    mut rx: mpsc::UnboundedReceiver<WatcherEvent>,
    pending: Arc<Mutex<ChangeBatcher>>,
    scanner: Arc<ProjectScanner>,
    events: Arc<EventBus<WatcherEvent>>,
    flush_interval: Duration,
) {
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            change = rx.recv() => match change {
                Some(change) => pending.lock().add(change),
                None => break,
            },
            _ = ticker.tick() => {
                let batch = {
                    let mut pending = pending.lock();
                    if pending.len() == 0 {
                        continue;
                    }
                    pending.take()
                };

                for event in batch {
                    if let WatcherEvent::File(FileChange { project_id: Some(id), .. }) = &event {
                        scanner.invalidate_project(id);
                    }
                    events.emit(event);
                }
            }
        }
    }
}

/// Map a notify event kind to a change kind; `None` for events we ignore.
fn convert_kind(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(ChangeKind::Created),
        // Polling reports content changes as write-time updates
        EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime)) => {
            Some(ChangeKind::Modified)
        }
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Modify(_) => Some(ChangeKind::Modified),
        EventKind::Remove(_) => Some(ChangeKind::Deleted),
        EventKind::Any | EventKind::Access(_) | EventKind::Other => None,
    }
}

/// Classify a path relative to the workspace root.
fn classify(root: &Path, path: &Path, kind: ChangeKind) -> Option<WatcherEvent> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect();

    match parts.as_slice() {
        ["projects", project, rest @ ..] => {
            let session_id = match rest {
                [file] => file.strip_suffix(".jsonl").map(str::to_string),
                _ => None,
            };
            Some(WatcherEvent::File(FileChange {
                path: path.to_path_buf(),
                kind,
                project_id: Some(project.to_string()),
                session_id,
            }))
        }
        ["todos", file] => Some(WatcherEvent::Todo(TodoChange {
            path: path.to_path_buf(),
            kind,
            session_id: file
                .strip_suffix(".json")
                .map(|stem| stem.split("-agent-").next().unwrap_or(stem).to_string()),
        })),
        _ => None,
    }
}
