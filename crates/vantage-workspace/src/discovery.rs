//! Project and session discovery.
//!
//! A workspace root is laid out as
//!
//! ```text
//! <root>/
//!   projects/<project-id>/<session-id>.jsonl
//!   todos/<session-id>.json
//! ```
//!
//! Listings are memoized in the workspace's [`ResultCache`]; the watcher
//! invalidates the affected keys when files change.

use crate::cache::{CachedListing, ResultCache};
use crate::fs::FileSystem;
use crate::WorkspaceError;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const PROJECTS_KEY: &str = "projects";
const SESSIONS_KEY_PREFIX: &str = "sessions:";
const SESSION_EXTENSION: &str = ".jsonl";

/// A project directory under the workspace root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSummary {
    /// Directory name, used as the stable project id
    pub id: String,
    /// Absolute path of the project directory
    pub path: PathBuf,
    /// Number of session files in the project
    pub session_count: usize,
    /// Most recent session modification (Unix ms)
    pub last_modified_ms: i64,
}

/// A session file inside a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// File stem, used as the stable session id
    pub id: String,
    /// Owning project id
    pub project_id: String,
    /// Absolute path of the session file
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Last modification (Unix ms)
    pub last_modified_ms: i64,
}

/// Lists projects and sessions through a filesystem capability.
pub struct ProjectScanner {
    fs: Arc<dyn FileSystem>,
    root: PathBuf,
    cache: Arc<ResultCache>,
}

impl ProjectScanner {
    /// Create a scanner over `root`, memoizing into `cache`.
    pub fn new(fs: Arc<dyn FileSystem>, root: impl Into<PathBuf>, cache: Arc<ResultCache>) -> Self {
        Self {
            fs,
            root: root.into(),
            cache,
        }
    }

    /// Workspace root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding project folders
    pub fn projects_dir(&self) -> PathBuf {
        self.root.join("projects")
    }

    /// Directory holding todo files
    pub fn todos_dir(&self) -> PathBuf {
        self.root.join("todos")
    }

    /// List projects, most recently active first.
    ///
    /// A missing `projects` directory is an empty workspace, not an error.
    pub async fn list_projects(&self) -> Result<Arc<Vec<ProjectSummary>>, WorkspaceError> {
        if let Some(CachedListing::Projects(projects)) = self.cache.get(PROJECTS_KEY) {
            return Ok(projects);
        }

        let entries = match self.fs.read_dir(&self.projects_dir()).await {
            Ok(entries) => entries,
            Err(WorkspaceError::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };

        let mut projects = Vec::new();
        for entry in entries.into_iter().filter(|e| e.is_dir) {
            let sessions = self.scan_sessions(&entry.name, &entry.path).await?;
            let last_modified_ms = sessions
                .iter()
                .map(|s| s.last_modified_ms)
                .max()
                .unwrap_or(entry.mtime_ms);

            projects.push(ProjectSummary {
                id: entry.name,
                path: entry.path,
                session_count: sessions.len(),
                last_modified_ms,
            });
        }

        projects.sort_by(|a, b| {
            b.last_modified_ms
                .cmp(&a.last_modified_ms)
                .then_with(|| a.id.cmp(&b.id))
        });

        debug!(root = ?self.root, count = projects.len(), "Scanned projects");

        let projects = Arc::new(projects);
        self.cache
            .put(PROJECTS_KEY, CachedListing::Projects(projects.clone()));
        Ok(projects)
    }

    /// List sessions of one project, most recent first.
    pub async fn list_sessions(
        &self,
        project_id: &str,
    ) -> Result<Arc<Vec<SessionSummary>>, WorkspaceError> {
        let key = sessions_key(project_id);
        if let Some(CachedListing::Sessions(sessions)) = self.cache.get(&key) {
            return Ok(sessions);
        }

        let project_dir = self.project_dir(project_id)?;
        let sessions = Arc::new(self.scan_sessions(project_id, &project_dir).await?);

        self.cache.put(key, CachedListing::Sessions(sessions.clone()));
        Ok(sessions)
    }

    /// Resolve a project id to its directory. Ids are a single directory
    /// name; anything that would step outside `projects/` does not exist.
    fn project_dir(&self, project_id: &str) -> Result<PathBuf, WorkspaceError> {
        let mut components = Path::new(project_id).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.projects_dir().join(project_id)),
            _ => {
                debug!(project_id, "Rejected project id");
                Err(WorkspaceError::NotFound(PathBuf::from(project_id)))
            }
        }
    }

    /// Drop cached listings touched by a change in `project_id`.
    pub fn invalidate_project(&self, project_id: &str) {
        self.cache.invalidate(PROJECTS_KEY);
        self.cache.invalidate(&sessions_key(project_id));
    }

    async fn scan_sessions(
        &self,
        project_id: &str,
        project_dir: &Path,
    ) -> Result<Vec<SessionSummary>, WorkspaceError> {
        let entries = self.fs.read_dir(project_dir).await?;

        let mut sessions: Vec<_> = entries
            .into_iter()
            .filter(|e| !e.is_dir && e.name.ends_with(SESSION_EXTENSION))
            .map(|e| SessionSummary {
                id: e.name.trim_end_matches(SESSION_EXTENSION).to_string(),
                project_id: project_id.to_string(),
                path: e.path,
                size: e.size,
                last_modified_ms: e.mtime_ms,
            })
            .collect();

        sessions.sort_by(|a, b| {
            b.last_modified_ms
                .cmp(&a.last_modified_ms)
                .then_with(|| a.id.cmp(&b.id))
        });

        Ok(sessions)
    }
}

fn sessions_key(project_id: &str) -> String {
    format!("{}{}", SESSIONS_KEY_PREFIX, project_id)
}
