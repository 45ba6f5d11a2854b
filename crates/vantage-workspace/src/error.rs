//! Workspace service error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in workspace services.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// I/O error during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File watcher error
    #[error("Watcher error: {0}")]
    Watcher(String),

    /// Path not found
    #[error("Path not found: {0}")]
    NotFound(PathBuf),
}

impl From<notify::Error> for WorkspaceError {
    fn from(e: notify::Error) -> Self {
        WorkspaceError::Watcher(e.to_string())
    }
}
