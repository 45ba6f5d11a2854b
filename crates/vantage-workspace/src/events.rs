//! Broadcast event bus with detachable subscriptions.
//!
//! Emitting never blocks; slow receivers lag instead of stalling the
//! sender. Every [`EventBus::subscribe_with`] returns a [`Subscription`]
//! handle and the forwarding task lives exactly as long as that handle,
//! so a listener cannot outlive whoever attached it.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tracing::warn;

/// Default broadcast channel capacity.
const DEFAULT_CAPACITY: usize = 256;

type SubscriptionMap = Arc<Mutex<HashMap<u64, AbortHandle>>>;

/// Broadcast-based event bus.
pub struct EventBus<T> {
    tx: broadcast::Sender<T>,
    subscriptions: SubscriptionMap,
    next_id: AtomicU64,
    emit_count: AtomicU64,
    closed: AtomicBool,
}

impl<T: Clone + Send + 'static> EventBus<T> {
    /// Create a new bus with the default channel capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new bus with a custom channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            emit_count: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Emit an event to all receivers. Non-blocking.
    ///
    /// Returns the number of receivers that got the event; 0 once closed.
    pub fn emit(&self, event: T) -> usize {
        if self.closed.load(Ordering::SeqCst) {
            return 0;
        }
        self.emit_count.fetch_add(1, Ordering::Relaxed);
        self.tx.send(event).unwrap_or(0)
    }

    /// Raw receiver for events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }

    /// Run `handler` for every event until the returned handle is dropped,
    /// unsubscribed, or the bus is closed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe_with<F>(&self, mut handler: F) -> Subscription
    where
        F: FnMut(T) + Send + 'static,
    {
        let mut rx = self.tx.subscribe();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => handler(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Subscriber lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        if self.closed.load(Ordering::SeqCst) {
            task.abort();
        } else {
            self.subscriptions.lock().insert(id, task.abort_handle());
        }

        Subscription {
            id,
            task: Some(task.abort_handle()),
            subscriptions: Arc::downgrade(&self.subscriptions),
        }
    }

    /// Number of live handler subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Total number of events emitted.
    pub fn emit_count(&self) -> u64 {
        self.emit_count.load(Ordering::Relaxed)
    }

    /// Detach every subscription and refuse further emits.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let drained: Vec<_> = self.subscriptions.lock().drain().collect();
        for (_, handle) in drained {
            handle.abort();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl<T: Clone + Send + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a running [`EventBus::subscribe_with`] handler.
///
/// Dropping the handle detaches the handler.
#[must_use = "dropping a Subscription detaches it immediately"]
pub struct Subscription {
    id: u64,
    task: Option<AbortHandle>,
    subscriptions: std::sync::Weak<Mutex<HashMap<u64, AbortHandle>>>,
}

impl Subscription {
    /// Detach the handler now.
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    /// Whether the handler task is still running.
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn detach(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(map) = self.subscriptions.upgrade() {
            map.lock().remove(&self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
