//! Daemon lifecycle management.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use vantage_core::{
    ContextKind, ContextRegistry, DaemonConfig, RemoteConnector, WorkspaceContext,
    YamlConfigStore,
};
use vantage_ipc::IpcServer;

use crate::forwarder::EventForwarder;
use crate::handler::DaemonHandler;
use crate::signals;
use crate::transport::MountTransport;

/// The main daemon process
pub struct Daemon {
    config: DaemonConfig,
    shutdown_tx: broadcast::Sender<()>,
    is_running: Arc<AtomicBool>,
    start_time: std::time::Instant,
}

impl Daemon {
    /// Create a daemon with an explicit configuration
    pub fn with_config(config: DaemonConfig) -> Result<Self> {
        config
            .ensure_dirs()
            .context("Failed to create data directories")?;

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            shutdown_tx,
            is_running: Arc::new(AtomicBool::new(false)),
            start_time: std::time::Instant::now(),
        })
    }

    /// Run the daemon
    pub async fn run(&self) -> Result<()> {
        self.acquire_pid_lock()?;
        self.is_running.store(true, Ordering::SeqCst);

        tracing::info!(
            socket = %self.config.socket_path.display(),
            data_dir = %self.config.data_dir.display(),
            local_root = %self.config.local_root.display(),
            "Daemon starting"
        );

        let handler = Arc::new(self.build_handler().await?);
        handler.initialize().await;

        let ipc_server = IpcServer::new(&self.config.socket_path, handler.clone())
            .await
            .context("Failed to create IPC server")?;

        let health = {
            let handler = handler.clone();
            let period = self.config.health_check_interval();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    handler.check_connection().await;
                }
            })
        };

        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::select! {
            result = ipc_server.run() => {
                if let Err(e) = result {
                    tracing::error!("IPC server error: {}", e);
                }
            }
            _ = signals::wait_for_shutdown(shutdown_rx) => {
                tracing::info!("Shutdown signal received");
            }
        }

        health.abort();
        handler.shutdown().await;
        self.cleanup().await?;

        Ok(())
    }

    /// Assemble the registry (seeded with the started local context), the
    /// remote connector and the persisted state store.
    async fn build_handler(&self) -> Result<DaemonHandler> {
        let local = WorkspaceContext::local(
            &self.config.local_root,
            self.config.context_options(ContextKind::Local),
        );
        local.start();

        let registry = ContextRegistry::new(local).context("Failed to create context registry")?;
        let connector = RemoteConnector::new(
            Arc::new(MountTransport::new()),
            self.config.context_options(ContextKind::Remote),
        );
        let store = YamlConfigStore::open(self.config.state_file()).await;

        Ok(DaemonHandler::new(
            Arc::new(Mutex::new(registry)),
            connector,
            Arc::new(EventForwarder::new()),
            Arc::new(store),
            self.shutdown_tx.clone(),
            self.start_time,
        ))
    }

    /// Acquire PID lock to ensure single instance
    fn acquire_pid_lock(&self) -> Result<()> {
        let pid_file = &self.config.pid_file;

        if pid_file.exists() {
            if let Ok(pid_str) = std::fs::read_to_string(pid_file) {
                if let Ok(pid) = pid_str.trim().parse::<u32>() {
                    if is_process_running(pid) {
                        anyhow::bail!("Daemon already running (PID: {})", pid);
                    }
                }
            }
            // Stale PID file
            std::fs::remove_file(pid_file)?;
        }

        if let Some(parent) = pid_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(pid_file, std::process::id().to_string())?;

        tracing::debug!(pid = std::process::id(), "PID lock acquired");

        Ok(())
    }

    /// Cleanup resources on shutdown
    async fn cleanup(&self) -> Result<()> {
        tracing::info!("Cleaning up...");

        if self.config.socket_path.exists() {
            let _ = std::fs::remove_file(&self.config.socket_path);
        }

        if self.config.pid_file.exists() {
            let _ = std::fs::remove_file(&self.config.pid_file);
        }

        self.is_running.store(false, Ordering::SeqCst);

        tracing::info!("Cleanup complete");

        Ok(())
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        // Only remove the PID file this instance wrote
        if self.is_running.load(Ordering::SeqCst) && self.config.pid_file.exists() {
            let _ = std::fs::remove_file(&self.config.pid_file);
        }
    }
}

/// Check if a process is running by PID
fn is_process_running(pid: u32) -> bool {
    // kill(pid, 0) checks existence without sending a signal
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;
    use vantage_ipc::{IpcClient, Request, Response};

    fn test_config(dir: &std::path::Path) -> DaemonConfig {
        DaemonConfig {
            socket_path: dir.join("vantage.sock"),
            data_dir: dir.join("data"),
            local_root: dir.join("claude"),
            pid_file: dir.join("vantage.pid"),
            ..Default::default()
        }
    }

    #[test]
    fn test_is_process_running() {
        assert!(is_process_running(std::process::id()));
        assert!(!is_process_running(999999999));
    }

    #[test]
    fn test_pid_lock_rejects_live_owner() {
        let temp_dir = tempdir().unwrap();
        let config = test_config(temp_dir.path());
        std::fs::write(&config.pid_file, std::process::id().to_string()).unwrap();

        let daemon = Daemon::with_config(config).unwrap();
        assert!(daemon.acquire_pid_lock().is_err());
    }

    #[test]
    fn test_pid_lock_replaces_stale_file() {
        let temp_dir = tempdir().unwrap();
        let config = test_config(temp_dir.path());
        std::fs::write(&config.pid_file, "999999999").unwrap();

        let daemon = Daemon::with_config(config.clone()).unwrap();
        daemon.acquire_pid_lock().unwrap();

        let written = std::fs::read_to_string(&config.pid_file).unwrap();
        assert_eq!(written, std::process::id().to_string());
    }

    #[tokio::test]
    async fn test_run_serves_until_shutdown() {
        let temp_dir = tempdir().unwrap();
        let config = test_config(temp_dir.path());
        let socket_path = config.socket_path.clone();
        let pid_file = config.pid_file.clone();

        let daemon = Daemon::with_config(config).unwrap();
        let run = tokio::spawn(async move { daemon.run().await });

        let client = IpcClient::with_socket_path(&socket_path);
        for _ in 0..50 {
            if client.is_daemon_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(client.active_context().await.unwrap(), "local");
        assert_eq!(client.request(Request::Shutdown).await.unwrap(), Response::ack());

        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!socket_path.exists());
        assert!(!pid_file.exists());
    }
}
