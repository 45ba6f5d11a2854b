//! Push-event forwarding from the active context to subscribed clients.

use parking_lot::Mutex;
use tokio::sync::broadcast;
use vantage_core::{ActiveContextObserver, ContextKind, ForwardMode, WorkspaceContext};
use vantage_ipc::{ChangeType, PushEvent};
use vantage_workspace::{ChangeKind, Subscription, WatcherEvent};

/// Buffered push events per client before it starts lagging
const CLIENT_CHANNEL_CAPACITY: usize = 256;

/// Re-points the client event stream at whichever context is active.
///
/// Holds exactly one watcher subscription; rewiring detaches the old one
/// before attaching the new one, so a background context can never reach
/// clients.
pub struct EventForwarder {
    clients: broadcast::Sender<PushEvent>,
    current: Mutex<Option<Subscription>>,
}

impl EventForwarder {
    pub fn new() -> Self {
        let (clients, _) = broadcast::channel(CLIENT_CHANNEL_CAPACITY);
        Self {
            clients,
            current: Mutex::new(None),
        }
    }

    /// Receiver for one subscribed client
    pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.clients.subscribe()
    }

    /// Forward `context`'s watcher events from now on.
    ///
    /// Must be called from within a tokio runtime.
    pub fn rewire(&self, context: &WorkspaceContext, mode: ForwardMode) {
        let mut current = self.current.lock();
        if let Some(previous) = current.take() {
            previous.unsubscribe();
        }

        let context_id = context.id().to_string();
        let clients = self.clients.clone();
        let forward_id = context_id.clone();
        *current = Some(context.events().subscribe_with(move |event| {
            // No receivers is fine
            let _ = clients.send(to_push_event(&forward_id, event));
        }));
        drop(current);

        if mode == ForwardMode::FullNotify {
            let _ = self.clients.send(PushEvent::ContextChanged {
                context_id: context_id.clone(),
                kind: map_kind(context.kind()),
            });
        }

        tracing::debug!(context_id = %context_id, mode = ?mode, "Event forwarding rewired");
    }

    /// Stop forwarding entirely.
    pub fn detach(&self) {
        if let Some(previous) = self.current.lock().take() {
            previous.unsubscribe();
        }
    }

    pub fn is_attached(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .is_some_and(Subscription::is_active)
    }
}

impl Default for EventForwarder {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveContextObserver for EventForwarder {
    fn active_context_changed(&self, context: &WorkspaceContext, mode: ForwardMode) {
        self.rewire(context, mode);
    }
}

pub fn map_kind(kind: ContextKind) -> vantage_ipc::ContextKind {
    match kind {
        ContextKind::Local => vantage_ipc::ContextKind::Local,
        ContextKind::Remote => vantage_ipc::ContextKind::Remote,
    }
}

fn map_change(kind: ChangeKind) -> ChangeType {
    match kind {
        ChangeKind::Created => ChangeType::Created,
        ChangeKind::Modified => ChangeType::Modified,
        ChangeKind::Deleted => ChangeType::Deleted,
    }
}

fn to_push_event(context_id: &str, event: WatcherEvent) -> PushEvent {
    match event {
        WatcherEvent::File(change) => PushEvent::FileChange {
            context_id: context_id.to_string(),
            path: change.path,
            change_type: map_change(change.kind),
            project_id: change.project_id,
            session_id: change.session_id,
        },
        WatcherEvent::Todo(change) => PushEvent::TodoChange {
            context_id: context_id.to_string(),
            path: change.path,
            change_type: map_change(change.kind),
            session_id: change.session_id,
        },
    }
}
