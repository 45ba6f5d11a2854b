//! Per-context view snapshots.

use crate::view::ViewState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bumped whenever [`ViewState`]'s persisted shape changes
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Immutable capture of a context's view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub context_id: String,
    pub captured_at: DateTime<Utc>,
    pub schema_version: u32,
    pub view: ViewState,
}

impl Snapshot {
    /// Capture `view` now, dropping transient fields.
    pub fn capture(context_id: impl Into<String>, view: &ViewState) -> Self {
        Self {
            context_id: context_id.into(),
            captured_at: Utc::now(),
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            view: view.persistent(),
        }
    }

    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.captured_at
    }

    /// View ready to show: transient fields reset, indexes rebuilt.
    pub fn restore(&self) -> ViewState {
        let mut view = self.view.persistent();
        view.reindex();
        view
    }
}
