//! Remote context establishment.
//!
//! Turns a transport-provided filesystem capability into a registered,
//! started and active [`WorkspaceContext`], and tears it down again on
//! disconnect. Tunnel mechanics (authentication, multiplexing) belong to
//! the [`RemoteTransport`] implementation.

use crate::context::{ContextKind, ContextOptions, WorkspaceContext, LOCAL_CONTEXT_ID};
use crate::observer::{ActiveContextObserver, ForwardMode};
use crate::registry::ContextRegistry;
use crate::ContextError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use vantage_workspace::FileSystem;

/// How the tunnel authenticates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    #[default]
    Agent,
    PrivateKey,
    Password,
}

/// Connection request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub auth_method: AuthMethod,
    /// Opaque handle the transport resolves to a secret (keychain entry, key
    /// file). The secret itself never passes through the core.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_ref: Option<String>,
    /// Where the tunnel exposes the remote filesystem, if mounted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_path: Option<PathBuf>,
}

fn default_port() -> u16 {
    22
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Status reported by connect/disconnect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub host: Option<String>,
    pub error: Option<String>,
    pub remote_root_path: Option<PathBuf>,
}

impl ConnectionStatus {
    pub fn disconnected() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            host: None,
            error: None,
            remote_root_path: None,
        }
    }

    fn connecting(host: &str) -> Self {
        Self {
            state: ConnectionState::Connecting,
            host: Some(host.to_string()),
            error: None,
            remote_root_path: None,
        }
    }

    fn failed(host: &str, error: &ContextError) -> Self {
        Self {
            state: ConnectionState::Error,
            host: Some(host.to_string()),
            error: Some(error.to_string()),
            remote_root_path: None,
        }
    }
}

/// What a transport hands back once the tunnel is up.
pub struct RemoteSession {
    pub fs: Arc<dyn FileSystem>,
    /// Resolved workspace root on the remote side
    pub root: PathBuf,
}

/// Remote tunnel provider.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Open the tunnel and resolve the remote workspace root.
    async fn connect(&self, config: &RemoteConfig) -> Result<RemoteSession, ContextError>;

    /// Close the tunnel to `host`. Closing an unknown host is not an error.
    async fn disconnect(&self, host: &str) -> Result<(), ContextError>;

    /// Check that `config` could connect, without keeping anything open.
    async fn test(&self, config: &RemoteConfig) -> Result<(), ContextError>;

    /// Whether the tunnel to `host` is still usable.
    async fn is_alive(&self, _host: &str) -> bool {
        true
    }
}

/// Context id for a remote host. Stable across reconnects.
pub fn remote_context_id(host: &str) -> String {
    format!("remote-{}", host)
}

/// Owns the current remote connection and its context lifecycle.
pub struct RemoteConnector {
    transport: Arc<dyn RemoteTransport>,
    options: ContextOptions,
    current: Option<RemoteConfig>,
    status: ConnectionStatus,
}

impl RemoteConnector {
    /// `options` are used for every remote context this connector builds.
    pub fn new(transport: Arc<dyn RemoteTransport>, options: ContextOptions) -> Self {
        Self {
            transport,
            options,
            current: None,
            status: ConnectionStatus::disconnected(),
        }
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    /// Config of the live connection, if any.
    pub fn current(&self) -> Option<&RemoteConfig> {
        self.current.as_ref()
    }

    /// Connect, then register, start and activate the remote context.
    ///
    /// Reconnecting to the same host destroys the old context first, so one
    /// host never has two live watchers. Moving to a different host opens the
    /// new tunnel before the old one is closed; if that fails the previous
    /// connection stays as it was.
    pub async fn connect(
        &mut self,
        registry: &Mutex<ContextRegistry>,
        config: RemoteConfig,
        observer: &dyn ActiveContextObserver,
    ) -> Result<ConnectionStatus, ContextError> {
        if config.host.trim().is_empty() {
            return Err(ContextError::Invalid("host must not be empty".to_string()));
        }

        let id = remote_context_id(&config.host);
        let previous = self.current.take();
        let previous_status = self.status.clone();

        // The transport keys tunnels by host, so a same-host reconnect has to
        // close the old one before opening the next
        let same_host = previous.as_ref().map(|p| p.host == config.host) == Some(true);
        if same_host {
            if let Err(e) = self.transport.disconnect(&config.host).await {
                tracing::warn!(host = %config.host, error = %e, "Failed to close previous tunnel");
            }
        }

        self.status = ConnectionStatus::connecting(&config.host);
        tracing::info!(host = %config.host, port = config.port, "Connecting");

        let session = match self.transport.connect(&config).await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(host = %config.host, error = %e, "Connect failed");
                if same_host {
                    self.release(registry, &config.host, observer, ForwardMode::FullNotify)
                        .await?;
                    self.status = ConnectionStatus::failed(&config.host, &e);
                } else if previous.is_some() {
                    self.current = previous;
                    self.status = previous_status;
                } else {
                    self.status = ConnectionStatus::failed(&config.host, &e);
                }
                return Err(e);
            }
        };

        let root = session.root.clone();
        let context = WorkspaceContext::new(
            &id,
            ContextKind::Remote,
            session.root,
            session.fs,
            self.options.clone(),
        );

        if let Err(e) = self.activate(registry, context, observer).await {
            if let Err(close_err) = self.transport.disconnect(&config.host).await {
                tracing::warn!(host = %config.host, error = %close_err, "Failed to close tunnel");
            }
            if !same_host && previous.is_some() {
                self.current = previous;
                self.status = previous_status;
            } else {
                self.status = ConnectionStatus::failed(&config.host, &e);
            }
            return Err(e);
        }

        // One tunnel at a time
        if let Some(previous) = previous.filter(|_| !same_host) {
            self.retire(registry, &previous.host).await?;
        }

        tracing::info!(host = %config.host, context_id = %id, root = ?root, "Connected");

        self.status = ConnectionStatus {
            state: ConnectionState::Connected,
            host: Some(config.host.clone()),
            error: None,
            remote_root_path: Some(root),
        };
        self.current = Some(config);

        Ok(self.status.clone())
    }

    /// Close the tunnel. If its context was active, fall back to local and
    /// destroy it; otherwise leave the registry alone.
    pub async fn disconnect(
        &mut self,
        registry: &Mutex<ContextRegistry>,
        observer: &dyn ActiveContextObserver,
    ) -> Result<ConnectionStatus, ContextError> {
        let Some(config) = self.current.take() else {
            self.status = ConnectionStatus::disconnected();
            return Ok(self.status.clone());
        };

        let closed = self.transport.disconnect(&config.host).await;
        self.release(registry, &config.host, observer, ForwardMode::RewireOnly)
            .await?;

        self.status = ConnectionStatus::disconnected();
        tracing::info!(host = %config.host, "Disconnected");

        match closed {
            Ok(()) => Ok(self.status.clone()),
            Err(e) => {
                tracing::warn!(host = %config.host, error = %e, "Transport close failed");
                self.status.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Check the live tunnel and tear it down if it dropped.
    ///
    /// Consumers did not ask for this change, so a fallback to local is
    /// announced with [`ForwardMode::FullNotify`]. Returns `false` if the
    /// connection was lost.
    pub async fn check_health(
        &mut self,
        registry: &Mutex<ContextRegistry>,
        observer: &dyn ActiveContextObserver,
    ) -> Result<bool, ContextError> {
        let Some(host) = self.current.as_ref().map(|c| c.host.clone()) else {
            return Ok(true);
        };
        if self.transport.is_alive(&host).await {
            return Ok(true);
        }

        tracing::warn!(host = %host, "Remote connection lost");
        self.current = None;
        if let Err(e) = self.transport.disconnect(&host).await {
            tracing::debug!(host = %host, error = %e, "Transport close after loss failed");
        }
        self.release(registry, &host, observer, ForwardMode::FullNotify)
            .await?;

        self.status = ConnectionStatus {
            state: ConnectionState::Error,
            host: Some(host),
            error: Some("connection lost".to_string()),
            remote_root_path: None,
        };
        Ok(false)
    }

    /// Fall back to local if `host`'s context is active.
    async fn release(
        &self,
        registry: &Mutex<ContextRegistry>,
        host: &str,
        observer: &dyn ActiveContextObserver,
        mode: ForwardMode,
    ) -> Result<(), ContextError> {
        let id = remote_context_id(host);
        let mut registry = registry.lock().await;
        if registry.active_id() == id {
            registry.switch(LOCAL_CONTEXT_ID)?;
            registry.destroy(&id)?;
            observer.active_context_changed(registry.active()?, mode);
        }
        Ok(())
    }

    /// Close a superseded tunnel and drop its context. The context is never
    /// active here, since the new host's context was switched in first.
    async fn retire(
        &self,
        registry: &Mutex<ContextRegistry>,
        host: &str,
    ) -> Result<(), ContextError> {
        if let Err(e) = self.transport.disconnect(host).await {
            tracing::warn!(host = %host, error = %e, "Failed to close previous tunnel");
        }
        let id = remote_context_id(host);
        let mut registry = registry.lock().await;
        if registry.has(&id) {
            registry.destroy(&id)?;
            tracing::info!(context_id = %id, "Dropped superseded remote context");
        }
        Ok(())
    }

    /// Check a config without changing any state.
    pub async fn test(&self, config: &RemoteConfig) -> Result<(), ContextError> {
        self.transport.test(config).await
    }

    async fn activate(
        &self,
        registry: &Mutex<ContextRegistry>,
        context: WorkspaceContext,
        observer: &dyn ActiveContextObserver,
    ) -> Result<(), ContextError> {
        let id = context.id().to_string();
        let mut registry = registry.lock().await;

        if registry.has(&id) {
            tracing::info!(context_id = %id, "Replacing existing context");
            registry.destroy(&id)?;
        }

        registry.register(context)?;
        if let Some(context) = registry.get(&id) {
            context.start();
        }
        registry.switch(&id)?;

        observer.active_context_changed(registry.active()?, ForwardMode::RewireOnly);
        Ok(())
    }
}
