//! Remote transport for roots exposed through an external tunnel mount.
//!
//! The tunnel itself (sshfs or similar) is managed outside the daemon. This
//! transport only checks reachability and resolves the mounted workspace
//! root.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use vantage_core::{ContextError, RemoteConfig, RemoteSession, RemoteTransport};
use vantage_workspace::LocalFileSystem;

/// Workspace directory looked up inside a mount
const WORKSPACE_DIR: &str = ".claude";

const DEFAULT_REACH_TIMEOUT: Duration = Duration::from_secs(5);

pub struct MountTransport {
    reach_timeout: Duration,
    /// Host -> mount point of every open connection
    open: Mutex<HashMap<String, PathBuf>>,
}

impl MountTransport {
    pub fn new() -> Self {
        Self::with_reach_timeout(DEFAULT_REACH_TIMEOUT)
    }

    pub fn with_reach_timeout(reach_timeout: Duration) -> Self {
        Self {
            reach_timeout,
            open: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_open(&self, host: &str) -> bool {
        self.open.lock().contains_key(host)
    }

    async fn reach(&self, config: &RemoteConfig) -> Result<(), ContextError> {
        let target = (config.host.as_str(), config.port);
        match tokio::time::timeout(self.reach_timeout, TcpStream::connect(target)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(ContextError::Transport(format!(
                "{}:{} unreachable: {}",
                config.host, config.port, e
            ))),
            Err(_) => Err(ContextError::Transport(format!(
                "{}:{} timed out",
                config.host, config.port
            ))),
        }
    }
}

impl Default for MountTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Mount point to use for `config`.
fn mount_path(config: &RemoteConfig) -> Result<&Path, ContextError> {
    config.mount_path.as_deref().ok_or_else(|| {
        ContextError::Transport(format!("no mount path configured for {}", config.host))
    })
}

/// `<mount>/.claude` if present, otherwise the mount itself.
async fn resolve_root(mount: &Path) -> Result<PathBuf, ContextError> {
    match tokio::fs::metadata(mount).await {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            return Err(ContextError::Transport(format!(
                "mount path is not a directory: {}",
                mount.display()
            )))
        }
        Err(e) => {
            return Err(ContextError::Transport(format!(
                "mount path unavailable: {}: {}",
                mount.display(),
                e
            )))
        }
    }

    let nested = mount.join(WORKSPACE_DIR);
    if tokio::fs::metadata(&nested).await.is_ok_and(|m| m.is_dir()) {
        Ok(nested)
    } else {
        Ok(mount.to_path_buf())
    }
}

#[async_trait]
impl RemoteTransport for MountTransport {
    async fn connect(&self, config: &RemoteConfig) -> Result<RemoteSession, ContextError> {
        let mount = mount_path(config)?;
        let root = resolve_root(mount).await?;
        self.open
            .lock()
            .insert(config.host.clone(), mount.to_path_buf());

        tracing::debug!(host = %config.host, root = ?root, "Mount resolved");

        Ok(RemoteSession {
            fs: Arc::new(LocalFileSystem::mounted()),
            root,
        })
    }

    async fn disconnect(&self, host: &str) -> Result<(), ContextError> {
        if self.open.lock().remove(host).is_some() {
            tracing::debug!(host = %host, "Mount released");
        }
        Ok(())
    }

    async fn test(&self, config: &RemoteConfig) -> Result<(), ContextError> {
        self.reach(config).await?;
        if let Some(mount) = config.mount_path.as_deref() {
            resolve_root(mount).await?;
        }
        Ok(())
    }

    async fn is_alive(&self, host: &str) -> bool {
        let Some(mount) = self.open.lock().get(host).cloned() else {
            return false;
        };
        // A dropped mount shows up as a missing directory
        tokio::fs::metadata(&mount).await.is_ok_and(|m| m.is_dir())
    }
}
