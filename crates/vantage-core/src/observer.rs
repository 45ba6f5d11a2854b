//! Notification hook for active-context changes.

use crate::context::WorkspaceContext;
use serde::{Deserialize, Serialize};

/// How consumers learn about a new active context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardMode {
    /// Re-point push-event forwarding only. Used when the consumer asked
    /// for the change and updates its own state.
    RewireOnly,
    /// Re-point forwarding and push an explicit change notification. Used
    /// for changes the consumer did not initiate.
    FullNotify,
}

/// Receives the new active context after every switch.
pub trait ActiveContextObserver: Send + Sync {
    fn active_context_changed(&self, context: &WorkspaceContext, mode: ForwardMode);
}
