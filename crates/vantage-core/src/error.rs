//! Core error types for Vantage.

use thiserror::Error;
use vantage_workspace::WorkspaceError;

/// Errors that can occur in context operations
#[derive(Debug, Error)]
pub enum ContextError {
    /// A context with this id is already registered
    #[error("Context already registered: {0}")]
    Duplicate(String),

    /// No context with this id
    #[error("Context not found: {0}")]
    NotFound(String),

    /// The local context can never be destroyed
    #[error("Context is permanent and cannot be destroyed: {0}")]
    Permanent(String),

    /// Remote transport failed to connect or disconnect
    #[error("Transport error: {0}")]
    Transport(String),

    /// The context was already disposed
    #[error("Context is disposed: {0}")]
    Disposed(String),

    /// Context id or kind is not acceptable here
    #[error("Invalid context: {0}")]
    Invalid(String),

    /// Workspace service error
    #[error("Workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration or persisted state could not be read or written
    #[error("Config error: {0}")]
    Config(String),
}

impl From<serde_yaml::Error> for ContextError {
    fn from(e: serde_yaml::Error) -> Self {
        ContextError::Config(e.to_string())
    }
}
