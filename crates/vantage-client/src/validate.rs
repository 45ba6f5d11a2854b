//! Reconciling a restored view against fresh listings.

use crate::view::{Layout, Pane, Tab, ViewState, DEFAULT_PANE_ID};
use std::collections::HashSet;
use vantage_ipc::{ProjectInfo, SessionInfo};

/// Authoritative listings fetched from the daemon.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FreshLists {
    pub projects: Vec<ProjectInfo>,
    /// Sessions of `project_id`, when that project was fetched
    pub sessions: Option<(String, Vec<SessionInfo>)>,
}

impl FreshLists {
    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
            && self
                .sessions
                .as_ref()
                .map_or(true, |(_, sessions)| sessions.is_empty())
    }
}

struct Known<'a> {
    projects: HashSet<&'a str>,
    sessions: Option<(&'a str, HashSet<&'a str>)>,
}

impl Known<'_> {
    fn has_project(&self, id: &str) -> bool {
        self.projects.contains(id)
    }

    /// Sessions can only be checked for the project they were fetched for.
    fn has_session(&self, project_id: &str, session_id: &str) -> bool {
        match &self.sessions {
            Some((pid, ids)) if *pid == project_id => ids.contains(session_id),
            _ => true,
        }
    }

    fn keeps_tab(&self, tab: &Tab) -> bool {
        match (&tab.project_id, &tab.session_id) {
            (None, _) => true,
            (Some(p), None) => self.has_project(p),
            (Some(p), Some(s)) => self.has_project(p) && self.has_session(p, s),
        }
    }
}

/// Apply `fresh` to `snapshot`.
///
/// Listings are replaced, selections and tabs pointing at ids that no longer
/// exist are dropped, and the layout keeps at least one pane.
pub fn validate(snapshot: &ViewState, fresh: &FreshLists) -> ViewState {
    let known = Known {
        projects: fresh.projects.iter().map(|p| p.id.as_str()).collect(),
        sessions: fresh.sessions.as_ref().map(|(pid, sessions)| {
            (
                pid.as_str(),
                sessions.iter().map(|s| s.id.as_str()).collect(),
            )
        }),
    };

    let mut view = snapshot.persistent();
    view.projects = fresh.projects.clone();

    view.selected_project_id = snapshot
        .selected_project_id
        .clone()
        .filter(|id| known.has_project(id));

    match (&view.selected_project_id, &fresh.sessions) {
        (Some(selected), Some((pid, sessions))) if selected == pid => {
            view.sessions = sessions.clone();
        }
        (Some(_), _) => {}
        (None, _) => {
            view.sessions.clear();
            view.sessions_cursor = None;
        }
    }

    view.selected_session_id = match &view.selected_project_id {
        Some(project) => snapshot
            .selected_session_id
            .clone()
            .filter(|s| known.has_session(project, s)),
        None => None,
    };

    view.layout = validate_layout(&snapshot.layout, &known);
    view.reindex();
    view
}

fn validate_layout(layout: &Layout, known: &Known<'_>) -> Layout {
    let mut panes: Vec<Pane> = layout
        .panes
        .iter()
        .filter_map(|pane| {
            let tabs: Vec<Tab> = pane
                .tabs
                .iter()
                .filter(|t| known.keeps_tab(t))
                .cloned()
                .collect();

            // Panes emptied by validation go; panes that were already empty stay
            if tabs.is_empty() && !pane.tabs.is_empty() {
                return None;
            }

            let active_tab_id = pane
                .active_tab_id
                .clone()
                .filter(|id| tabs.iter().any(|t| &t.id == id))
                .or_else(|| tabs.first().map(|t| t.id.clone()));

            Some(Pane {
                id: pane.id.clone(),
                tabs,
                active_tab_id,
            })
        })
        .collect();

    if panes.is_empty() {
        let id = layout
            .panes
            .first()
            .map(|p| p.id.clone())
            .unwrap_or_else(|| DEFAULT_PANE_ID.to_string());
        panes.push(Pane::empty(id));
    }

    let focused_pane_id = layout
        .focused_pane_id
        .clone()
        .filter(|id| panes.iter().any(|p| &p.id == id))
        .or_else(|| panes.first().map(|p| p.id.clone()));

    Layout {
        panes,
        focused_pane_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn project(id: &str) -> ProjectInfo {
        ProjectInfo {
            id: id.to_string(),
            path: PathBuf::from(format!("/root/projects/{}", id)),
            session_count: 1,
            last_modified_ms: 0,
        }
    }

    fn session(project_id: &str, id: &str) -> SessionInfo {
        SessionInfo {
            id: id.to_string(),
            project_id: project_id.to_string(),
            path: PathBuf::from(format!("/root/projects/{}/{}.jsonl", project_id, id)),
            size: 10,
            last_modified_ms: 0,
        }
    }

    fn tab(id: &str, project: Option<&str>, session: Option<&str>) -> Tab {
        Tab {
            id: id.to_string(),
            title: id.to_string(),
            project_id: project.map(str::to_string),
            session_id: session.map(str::to_string),
        }
    }

    fn snapshot_view() -> ViewState {
        let mut view = ViewState::empty();
        view.projects = vec![project("a"), project("b")];
        view.sessions = vec![session("a", "s1"), session("a", "s2")];
        view.selected_project_id = Some("a".to_string());
        view.selected_session_id = Some("s2".to_string());
        view.layout = Layout {
            panes: vec![
                Pane {
                    id: "left".to_string(),
                    tabs: vec![
                        tab("t-a", Some("a"), None),
                        tab("t-s2", Some("a"), Some("s2")),
                    ],
                    active_tab_id: Some("t-s2".to_string()),
                },
                Pane {
                    id: "right".to_string(),
                    tabs: vec![tab("t-b", Some("b"), None)],
                    active_tab_id: Some("t-b".to_string()),
                },
            ],
            focused_pane_id: Some("right".to_string()),
        };
        view
    }

    #[test]
    fn test_all_ids_present_keeps_everything() {
        let view = snapshot_view();
        let fresh = FreshLists {
            projects: vec![project("a"), project("b")],
            sessions: Some(("a".to_string(), vec![session("a", "s1"), session("a", "s2")])),
        };

        let validated = validate(&view, &fresh);
        assert_eq!(validated.layout, view.layout);
        assert_eq!(validated.selected_session_id.as_deref(), Some("s2"));
        assert!(validated.session("s1").is_some());
    }

    #[test]
    fn test_empty_projects_still_leaves_a_pane() {
        let validated = validate(&snapshot_view(), &FreshLists::default());

        assert_eq!(validated.layout.panes.len(), 1);
        assert_eq!(validated.layout.panes[0].id, "left");
        assert!(validated.layout.panes[0].tabs.is_empty());
        assert_eq!(validated.layout.focused_pane_id.as_deref(), Some("left"));
        assert!(validated.selected_project_id.is_none());
        assert!(validated.selected_session_id.is_none());
        assert!(validated.sessions.is_empty());
    }

    #[test]
    fn test_empty_layout_gets_default_pane() {
        let mut view = ViewState::empty();
        view.layout.panes.clear();
        view.layout.focused_pane_id = None;

        let validated = validate(&view, &FreshLists::default());
        assert_eq!(validated.layout.panes.len(), 1);
        assert_eq!(validated.layout.panes[0].id, DEFAULT_PANE_ID);
    }

    #[test]
    fn test_removed_session_drops_tab_and_active_falls_back() {
        let fresh = FreshLists {
            projects: vec![project("a"), project("b")],
            sessions: Some(("a".to_string(), vec![session("a", "s1")])),
        };

        let validated = validate(&snapshot_view(), &fresh);
        let left = &validated.layout.panes[0];
        assert_eq!(left.tabs.len(), 1);
        assert_eq!(left.active_tab_id.as_deref(), Some("t-a"));
        assert!(validated.selected_session_id.is_none());
        assert_eq!(validated.selected_project_id.as_deref(), Some("a"));
    }

    #[test]
    fn test_removed_project_drops_pane_and_refocuses() {
        let fresh = FreshLists {
            projects: vec![project("a")],
            sessions: None,
        };

        let validated = validate(&snapshot_view(), &fresh);
        assert_eq!(validated.layout.panes.len(), 1);
        assert_eq!(validated.layout.focused_pane_id.as_deref(), Some("left"));
        // Sessions were not refetched, so the snapshot's list stands
        assert_eq!(validated.sessions.len(), 2);
        assert_eq!(validated.selected_session_id.as_deref(), Some("s2"));
    }

    #[test]
    fn test_workspace_tabs_always_survive() {
        let mut view = ViewState::empty();
        view.layout.panes[0].tabs = vec![tab("dash", None, None)];
        view.layout.panes[0].active_tab_id = Some("dash".to_string());

        let validated = validate(&view, &FreshLists::default());
        assert_eq!(validated.layout.panes[0].tabs.len(), 1);
    }

    #[test]
    fn test_transient_fields_cleared() {
        let mut view = snapshot_view();
        view.loading = true;
        view.error = Some("old".to_string());

        let validated = validate(&view, &FreshLists::default());
        assert!(!validated.loading);
        assert!(validated.error.is_none());
    }
}
