//! The daemon as seen by the orchestrator.

use crate::error::{ClientError, Result};
use async_trait::async_trait;
use vantage_ipc::{IpcClient, IpcError, ProjectInfo, SessionInfo};

#[async_trait]
pub trait Backend: Send + Sync {
    /// Make `context_id` the active context on the daemon
    async fn switch_context(&self, context_id: &str) -> Result<()>;

    async fn active_context(&self) -> Result<String>;

    async fn list_projects(&self) -> Result<Vec<ProjectInfo>>;

    async fn list_sessions(&self, project_id: &str) -> Result<Vec<SessionInfo>>;
}

/// [`Backend`] over the daemon's control socket.
#[derive(Clone)]
pub struct IpcBackend {
    client: IpcClient,
}

impl IpcBackend {
    pub fn new(client: IpcClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &IpcClient {
        &self.client
    }
}

fn rejected(e: IpcError) -> ClientError {
    match e {
        IpcError::Rejected { message, .. } => ClientError::Rejected(message),
        other => ClientError::Ipc(other),
    }
}

#[async_trait]
impl Backend for IpcBackend {
    async fn switch_context(&self, context_id: &str) -> Result<()> {
        self.client
            .switch_context(context_id)
            .await
            .map(|_| ())
            .map_err(rejected)
    }

    async fn active_context(&self) -> Result<String> {
        self.client.active_context().await.map_err(rejected)
    }

    async fn list_projects(&self) -> Result<Vec<ProjectInfo>> {
        self.client.list_projects().await.map_err(rejected)
    }

    async fn list_sessions(&self, project_id: &str) -> Result<Vec<SessionInfo>> {
        self.client.list_sessions(project_id).await.map_err(rejected)
    }
}
