//! Error types for the client side.

use thiserror::Error;
use vantage_ipc::IpcError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Daemon rejected request: {0}")]
    Rejected(String),

    #[error("Backend unavailable: {0}")]
    Backend(String),

    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    #[error("Snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Message suitable for showing in the view
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Rejected(msg) | ClientError::Backend(msg) => msg.clone(),
            ClientError::Ipc(IpcError::Rejected { message, .. }) => message.clone(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;
    use vantage_ipc::ErrorCode;

    #[test]
    fn test_user_message_unwraps_rejection() {
        let err = ClientError::Ipc(IpcError::Rejected {
            code: ErrorCode::NotFound,
            message: "Context not found: remote-x".to_string(),
        });
        assert_eq!(err.user_message(), "Context not found: remote-x");

        let err = ClientError::Rejected("nope".to_string());
        assert_eq!(err.user_message(), "nope");
    }
}
