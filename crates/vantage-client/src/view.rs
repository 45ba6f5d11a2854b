//! Front-end view state for one workspace context.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use vantage_ipc::{ProjectInfo, SessionInfo};

/// Id of the pane every fresh layout starts with
pub const DEFAULT_PANE_ID: &str = "main";

/// What a tab shows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tab {
    pub id: String,
    pub title: String,
    /// Project the tab belongs to; `None` for workspace-wide views
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pane {
    pub id: String,
    #[serde(default)]
    pub tabs: Vec<Tab>,
    #[serde(default)]
    pub active_tab_id: Option<String>,
}

impl Pane {
    pub fn empty(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tabs: Vec::new(),
            active_tab_id: None,
        }
    }
}

/// Split layout. Never has zero panes once validated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Layout {
    pub panes: Vec<Pane>,
    #[serde(default)]
    pub focused_pane_id: Option<String>,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            panes: vec![Pane::empty(DEFAULT_PANE_ID)],
            focused_pane_id: Some(DEFAULT_PANE_ID.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub id: String,
    pub message: String,
    #[serde(default)]
    pub read: bool,
}

/// Everything the front-end shows for the active context.
///
/// `loading`, `error` and the session index are transient and never end
/// up in a snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ViewState {
    #[serde(default)]
    pub selected_project_id: Option<String>,
    #[serde(default)]
    pub selected_session_id: Option<String>,
    #[serde(default)]
    pub projects: Vec<ProjectInfo>,
    /// Sessions of the selected project
    #[serde(default)]
    pub sessions: Vec<SessionInfo>,
    /// Pagination cursor into the session list
    #[serde(default)]
    pub sessions_cursor: Option<String>,
    #[serde(default)]
    pub layout: Layout,
    #[serde(default)]
    pub notifications: Vec<Notification>,

    #[serde(skip)]
    pub loading: bool,
    #[serde(skip)]
    pub error: Option<String>,
    #[serde(skip)]
    session_index: HashMap<String, usize>,
}

impl ViewState {
    /// A valid view with no data: one empty pane, nothing selected.
    pub fn empty() -> Self {
        Self::default()
    }

    /// True if there is nothing worth keeping on screen.
    pub fn has_data(&self) -> bool {
        !self.projects.is_empty() || !self.sessions.is_empty()
    }

    /// Copy without transient fields.
    pub fn persistent(&self) -> Self {
        Self {
            loading: false,
            error: None,
            session_index: HashMap::new(),
            ..self.clone()
        }
    }

    /// Rebuild the session id lookup after `sessions` changed.
    pub fn reindex(&mut self) {
        self.session_index = self
            .sessions
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();
    }

    pub fn session(&self, id: &str) -> Option<&SessionInfo> {
        self.session_index.get(id).and_then(|&i| self.sessions.get(i))
    }

    pub fn project(&self, id: &str) -> Option<&ProjectInfo> {
        self.projects.iter().find(|p| p.id == id)
    }

    pub fn unread_notifications(&self) -> usize {
        self.notifications.iter().filter(|n| !n.read).count()
    }
}
