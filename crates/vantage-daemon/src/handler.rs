//! Request handler for daemon IPC.
//!
//! Every request ends in a `Response`; registry and transport errors are
//! mapped to error codes here and never cross the socket as anything else.

use crate::forwarder::{map_kind, EventForwarder};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, Mutex};
use vantage_core::{
    remote_context_id, AuthMethod, ConfigStore, ConnectionState, ConnectionStatus, ContextError,
    ContextInfo, ContextRegistry, ForwardMode, RemoteConfig, RemoteConnector, RemoteProfile,
    LOCAL_CONTEXT_ID,
};
use vantage_ipc::{
    ConnectionConfig, ConnectionInfo, ContextEntry, ErrorCode, ProjectInfo, PushEvent, Request,
    RequestHandler, Response, ResponseData, SessionInfo,
};
use vantage_workspace::WorkspaceError;

/// Handles incoming IPC requests
pub struct DaemonHandler {
    registry: Arc<Mutex<ContextRegistry>>,
    /// Locked before the registry whenever both are needed
    connector: Mutex<RemoteConnector>,
    forwarder: Arc<EventForwarder>,
    store: Arc<dyn ConfigStore>,
    shutdown_tx: broadcast::Sender<()>,
    start_time: Instant,
    requests_total: AtomicU64,
}

impl DaemonHandler {
    /// Create a new handler
    pub fn new(
        registry: Arc<Mutex<ContextRegistry>>,
        connector: RemoteConnector,
        forwarder: Arc<EventForwarder>,
        store: Arc<dyn ConfigStore>,
        shutdown_tx: broadcast::Sender<()>,
        start_time: Instant,
    ) -> Self {
        Self {
            registry,
            connector: Mutex::new(connector),
            forwarder,
            store,
            shutdown_tx,
            start_time,
            requests_total: AtomicU64::new(0),
        }
    }

    /// Attach forwarding to the active context, then restore the context
    /// that was active before the last shutdown.
    pub async fn initialize(&self) {
        {
            let registry = self.registry.lock().await;
            match registry.active() {
                Ok(context) => self.forwarder.rewire(context, ForwardMode::RewireOnly),
                Err(e) => tracing::error!(error = %e, "No active context"),
            }
        }

        self.restore_last_context().await;
    }

    async fn restore_last_context(&self) {
        let last = match self.store.last_active_context().await {
            Ok(Some(id)) if id != LOCAL_CONTEXT_ID => id,
            Ok(_) => return,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read last active context");
                return;
            }
        };

        let profile = match self.store.profiles().await {
            Ok(profiles) => profiles
                .into_iter()
                .find(|p| remote_context_id(&p.host) == last),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read remote profiles");
                return;
            }
        };
        let Some(profile) = profile else {
            tracing::warn!(context_id = %last, "No saved profile for last context, staying local");
            return;
        };

        tracing::info!(context_id = %last, "Restoring last active context");
        let mut connector = self.connector.lock().await;
        if let Err(e) = connector
            .connect(&self.registry, profile.to_config(), self.forwarder.as_ref())
            .await
        {
            tracing::warn!(context_id = %last, error = %e, "Restore failed, staying local");
        }
    }

    /// Tear down a dropped remote connection, falling back to local.
    pub async fn check_connection(&self) {
        let mut connector = self.connector.lock().await;
        match connector
            .check_health(&self.registry, self.forwarder.as_ref())
            .await
        {
            Ok(true) => {}
            Ok(false) => self.persist_active().await,
            Err(e) => tracing::error!(error = %e, "Connection health check failed"),
        }
    }

    /// Release every context. Only called once, at process shutdown.
    pub async fn shutdown(&self) {
        let mut connector = self.connector.lock().await;
        if connector.current().is_some() {
            if let Err(e) = connector
                .disconnect(&self.registry, self.forwarder.as_ref())
                .await
            {
                tracing::warn!(error = %e, "Failed to close remote connection");
            }
        }
        drop(connector);

        self.forwarder.detach();
        self.registry.lock().await.dispose_all();
    }

    /// Get uptime in seconds
    fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    async fn persist_active(&self) {
        let id = self.registry.lock().await.active_id().to_string();
        if let Err(e) = self.store.set_last_active_context(&id).await {
            tracing::warn!(context_id = %id, error = %e, "Failed to persist active context");
        }
    }

    async fn dispatch(&self, request: Request) -> Result<Response, ContextError> {
        match request {
            Request::Ping => Ok(Response::ok_with(ResponseData::Pong {
                timestamp: chrono::Utc::now().timestamp(),
            })),

            Request::Status => {
                let connection = self.connector.lock().await.status().state;
                let registry = self.registry.lock().await;
                let cache_hit_rate = registry
                    .active()
                    .map(|c| c.cache().stats().hit_rate())
                    .unwrap_or_default();

                Ok(Response::ok_with(ResponseData::Status {
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    uptime_secs: self.uptime_secs(),
                    contexts: registry.len(),
                    active_context_id: registry.active_id().to_string(),
                    connection: map_state(connection),
                    requests_total: self.requests_total.load(Ordering::Relaxed),
                    cache_hit_rate,
                }))
            }

            Request::ListContexts => {
                let contexts = self
                    .registry
                    .lock()
                    .await
                    .list()
                    .into_iter()
                    .map(map_context)
                    .collect();
                Ok(Response::ok_with(ResponseData::Contexts { contexts }))
            }

            Request::GetActive => {
                let context_id = self.registry.lock().await.active_id().to_string();
                Ok(Response::ok_with(ResponseData::ActiveContext { context_id }))
            }

            Request::SwitchContext { context_id } => {
                let result = {
                    let mut registry = self.registry.lock().await;
                    let result = registry.switch(&context_id)?;
                    if result.previous_context_id != result.current.id {
                        self.forwarder
                            .rewire(registry.active()?, ForwardMode::RewireOnly);
                    }
                    result
                };
                self.persist_active().await;

                Ok(Response::ok_with(ResponseData::Switched {
                    context_id: result.current.id,
                    previous_context_id: result.previous_context_id,
                }))
            }

            Request::Connect { config } => {
                let config = map_config(config);
                let status = self
                    .connector
                    .lock()
                    .await
                    .connect(&self.registry, config.clone(), self.forwarder.as_ref())
                    .await?;

                if let Err(e) = self.store.save_profile(RemoteProfile::from(&config)).await {
                    tracing::warn!(host = %config.host, error = %e, "Failed to save profile");
                }
                self.persist_active().await;

                Ok(Response::ok_with(ResponseData::Connection {
                    connection: map_status(status),
                }))
            }

            Request::Disconnect => {
                let status = self
                    .connector
                    .lock()
                    .await
                    .disconnect(&self.registry, self.forwarder.as_ref())
                    .await?;
                self.persist_active().await;

                Ok(Response::ok_with(ResponseData::Connection {
                    connection: map_status(status),
                }))
            }

            Request::TestConnection { config } => {
                let config = map_config(config);
                let result = self.connector.lock().await.test(&config).await;
                Ok(Response::ok_with(ResponseData::ConnectionTest {
                    success: result.is_ok(),
                    error: result.err().map(|e| e.to_string()),
                }))
            }

            Request::ListProjects => {
                let scanner = self.registry.lock().await.active()?.scanner().clone();
                let projects = scanner
                    .list_projects()
                    .await?
                    .iter()
                    .map(|p| ProjectInfo {
                        id: p.id.clone(),
                        path: p.path.clone(),
                        session_count: p.session_count,
                        last_modified_ms: p.last_modified_ms,
                    })
                    .collect();
                Ok(Response::ok_with(ResponseData::Projects { projects }))
            }

            Request::ListSessions { project_id } => {
                let scanner = self.registry.lock().await.active()?.scanner().clone();
                let sessions = scanner
                    .list_sessions(&project_id)
                    .await?
                    .iter()
                    .map(|s| SessionInfo {
                        id: s.id.clone(),
                        project_id: s.project_id.clone(),
                        path: s.path.clone(),
                        size: s.size,
                        last_modified_ms: s.last_modified_ms,
                    })
                    .collect();
                Ok(Response::ok_with(ResponseData::Sessions { sessions }))
            }

            // The server turns these into event streams before dispatch
            Request::Subscribe => Ok(Response::error(
                ErrorCode::InvalidRequest,
                "subscribe must be the first request on its own connection",
            )),

            Request::Shutdown => {
                tracing::info!("Shutdown requested");
                let _ = self.shutdown_tx.send(());
                Ok(Response::ack())
            }
        }
    }
}

#[async_trait]
impl RequestHandler for DaemonHandler {
    async fn handle(&self, request: Request) -> Response {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        match self.dispatch(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "Request failed");
                error_response(&e)
            }
        }
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<PushEvent>> {
        Some(self.forwarder.subscribe())
    }
}

fn error_code(error: &ContextError) -> ErrorCode {
    match error {
        ContextError::NotFound(_) => ErrorCode::NotFound,
        ContextError::Workspace(WorkspaceError::NotFound(_)) => ErrorCode::NotFound,
        ContextError::Duplicate(_) => ErrorCode::DuplicateContext,
        ContextError::Permanent(_) => ErrorCode::PermanentContext,
        ContextError::Transport(_) => ErrorCode::TransportError,
        ContextError::Invalid(_) => ErrorCode::InvalidRequest,
        ContextError::Disposed(_)
        | ContextError::Workspace(_)
        | ContextError::Io(_)
        | ContextError::Config(_) => ErrorCode::InternalError,
    }
}

fn error_response(error: &ContextError) -> Response {
    Response::error(error_code(error), error.to_string())
}

fn map_context(info: ContextInfo) -> ContextEntry {
    ContextEntry {
        id: info.id,
        kind: map_kind(info.kind),
    }
}

fn map_config(config: ConnectionConfig) -> RemoteConfig {
    RemoteConfig {
        host: config.host,
        port: config.port,
        username: config.username,
        auth_method: match config.auth_method {
            vantage_ipc::AuthMethod::Agent => AuthMethod::Agent,
            vantage_ipc::AuthMethod::PrivateKey => AuthMethod::PrivateKey,
            vantage_ipc::AuthMethod::Password => AuthMethod::Password,
        },
        credentials_ref: config.credentials_ref,
        mount_path: config.mount_path,
    }
}

fn map_state(state: ConnectionState) -> vantage_ipc::ConnectionState {
    match state {
        ConnectionState::Disconnected => vantage_ipc::ConnectionState::Disconnected,
        ConnectionState::Connecting => vantage_ipc::ConnectionState::Connecting,
        ConnectionState::Connected => vantage_ipc::ConnectionState::Connected,
        ConnectionState::Error => vantage_ipc::ConnectionState::Error,
    }
}

fn map_status(status: ConnectionStatus) -> ConnectionInfo {
    ConnectionInfo {
        state: map_state(status.state),
        host: status.host,
        error: status.error,
        remote_root_path: status.remote_root_path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MountTransport;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};
    use vantage_core::{
        ContextOptions, MemoryConfigStore, RemoteSession, RemoteTransport, WorkspaceContext,
    };
    use vantage_workspace::LocalFileSystem;

    /// Accepts every connect and remembers what it was given
    struct RecordingTransport {
        root: PathBuf,
        seen: parking_lot::Mutex<Vec<RemoteConfig>>,
    }

    #[async_trait]
    impl RemoteTransport for RecordingTransport {
        async fn connect(&self, config: &RemoteConfig) -> Result<RemoteSession, ContextError> {
            self.seen.lock().push(config.clone());
            Ok(RemoteSession {
                fs: Arc::new(LocalFileSystem::mounted()),
                root: self.root.clone(),
            })
        }

        async fn disconnect(&self, _host: &str) -> Result<(), ContextError> {
            Ok(())
        }

        async fn test(&self, config: &RemoteConfig) -> Result<(), ContextError> {
            self.seen.lock().push(config.clone());
            Ok(())
        }
    }

    struct Fixture {
        _local: TempDir,
        mount: TempDir,
        handler: DaemonHandler,
        store: Arc<MemoryConfigStore>,
        shutdown_rx: broadcast::Receiver<()>,
    }

    fn fixture_with_store(store: Arc<MemoryConfigStore>) -> Fixture {
        fixture_with(store, Arc::new(MountTransport::new()))
    }

    fn fixture_with(
        store: Arc<MemoryConfigStore>,
        transport: Arc<dyn RemoteTransport>,
    ) -> Fixture {
        let local = tempdir().unwrap();
        let mount = tempdir().unwrap();

        let local_ctx = WorkspaceContext::local(local.path(), ContextOptions::default());
        local_ctx.start();
        let registry = Arc::new(Mutex::new(ContextRegistry::new(local_ctx).unwrap()));
        let connector = RemoteConnector::new(transport, ContextOptions::default());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handler = DaemonHandler::new(
            registry,
            connector,
            Arc::new(EventForwarder::new()),
            store.clone(),
            shutdown_tx,
            Instant::now(),
        );

        Fixture {
            _local: local,
            mount,
            handler,
            store,
            shutdown_rx,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_store(Arc::new(MemoryConfigStore::new()))
    }

    fn connect_request(mount: &Path) -> Request {
        Request::Connect {
            config: ConnectionConfig {
                mount_path: Some(mount.to_path_buf()),
                ..ConnectionConfig::new("box")
            },
        }
    }

    async fn active(handler: &DaemonHandler) -> String {
        match handler.handle(Request::GetActive).await {
            Response::Ok {
                data: Some(ResponseData::ActiveContext { context_id }),
            } => context_id,
            other => panic!("Unexpected response {:?}", other),
        }
    }

    fn error_code_of(response: Response) -> ErrorCode {
        match response {
            Response::Error { code, .. } => code,
            other => panic!("Expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_initial_state() {
        let f = fixture();

        let response = f.handler.handle(Request::ListContexts).await;
        assert_eq!(
            response,
            Response::ok_with(ResponseData::Contexts {
                contexts: vec![ContextEntry {
                    id: "local".to_string(),
                    kind: vantage_ipc::ContextKind::Local,
                }]
            })
        );
        assert_eq!(active(&f.handler).await, "local");
    }

    #[tokio::test]
    async fn test_switch_unknown_is_not_found() {
        let f = fixture();

        let response = f
            .handler
            .handle(Request::SwitchContext {
                context_id: "remote-nope".to_string(),
            })
            .await;

        assert_eq!(error_code_of(response), ErrorCode::NotFound);
        assert_eq!(active(&f.handler).await, "local");
    }

    #[tokio::test]
    async fn test_connect_switch_disconnect() {
        let f = fixture();

        let response = f.handler.handle(connect_request(f.mount.path())).await;
        let Response::Ok {
            data: Some(ResponseData::Connection { connection }),
        } = response
        else {
            panic!("Unexpected response {:?}", response);
        };
        assert_eq!(connection.state, vantage_ipc::ConnectionState::Connected);
        assert_eq!(connection.remote_root_path.as_deref(), Some(f.mount.path()));
        assert_eq!(active(&f.handler).await, "remote-box");

        // Connect persists the profile and the new active id
        assert!(f.store.profile("box").await.unwrap().is_some());
        assert_eq!(
            f.store.last_active_context().await.unwrap().as_deref(),
            Some("remote-box")
        );

        let response = f
            .handler
            .handle(Request::SwitchContext {
                context_id: "local".to_string(),
            })
            .await;
        assert_eq!(
            response,
            Response::ok_with(ResponseData::Switched {
                context_id: "local".to_string(),
                previous_context_id: "remote-box".to_string(),
            })
        );
        assert_eq!(
            f.store.last_active_context().await.unwrap().as_deref(),
            Some("local")
        );

        f.handler
            .handle(Request::SwitchContext {
                context_id: "remote-box".to_string(),
            })
            .await;
        let response = f.handler.handle(Request::Disconnect).await;
        assert!(matches!(
            response,
            Response::Ok {
                data: Some(ResponseData::Connection { .. })
            }
        ));
        assert_eq!(active(&f.handler).await, "local");

        let response = f.handler.handle(Request::ListContexts).await;
        let Response::Ok {
            data: Some(ResponseData::Contexts { contexts }),
        } = response
        else {
            panic!("Unexpected response");
        };
        assert_eq!(contexts.len(), 1);
    }

    #[tokio::test]
    async fn test_connect_passes_credentials_ref_to_transport() {
        let root = tempdir().unwrap();
        let transport = Arc::new(RecordingTransport {
            root: root.path().to_path_buf(),
            seen: parking_lot::Mutex::new(Vec::new()),
        });
        let f = fixture_with(Arc::new(MemoryConfigStore::new()), transport.clone());

        let response = f
            .handler
            .handle(Request::Connect {
                config: ConnectionConfig {
                    username: "dev".to_string(),
                    auth_method: vantage_ipc::AuthMethod::PrivateKey,
                    credentials_ref: Some("keychain:dev@box".to_string()),
                    ..ConnectionConfig::new("box")
                },
            })
            .await;
        assert!(matches!(response, Response::Ok { .. }));

        let seen = transport.seen.lock().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].credentials_ref.as_deref(), Some("keychain:dev@box"));
        assert_eq!(seen[0].auth_method, AuthMethod::PrivateKey);

        // The reference reaches the transport but is never persisted
        let profile = f.store.profile("box").await.unwrap().unwrap();
        assert_eq!(profile.username, "dev");
        assert!(profile.to_config().credentials_ref.is_none());
    }

    #[tokio::test]
    async fn test_connect_failure_is_transport_error() {
        let f = fixture();

        let response = f
            .handler
            .handle(connect_request(&f.mount.path().join("missing")))
            .await;

        assert_eq!(error_code_of(response), ErrorCode::TransportError);
        assert_eq!(active(&f.handler).await, "local");
        assert!(f.store.profiles().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_listings_follow_active_context() {
        let f = fixture();
        let project = f.mount.path().join("projects").join("remote-project");
        std::fs::create_dir_all(&project).unwrap();
        std::fs::write(project.join("s1.jsonl"), "{}\n").unwrap();

        let response = f.handler.handle(Request::ListProjects).await;
        assert_eq!(
            response,
            Response::ok_with(ResponseData::Projects { projects: vec![] })
        );

        f.handler.handle(connect_request(f.mount.path())).await;

        let response = f.handler.handle(Request::ListProjects).await;
        let Response::Ok {
            data: Some(ResponseData::Projects { projects }),
        } = response
        else {
            panic!("Unexpected response");
        };
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].id, "remote-project");

        let response = f
            .handler
            .handle(Request::ListSessions {
                project_id: "remote-project".to_string(),
            })
            .await;
        let Response::Ok {
            data: Some(ResponseData::Sessions { sessions }),
        } = response
        else {
            panic!("Unexpected response");
        };
        assert_eq!(sessions[0].id, "s1");

        let response = f
            .handler
            .handle(Request::ListSessions {
                project_id: "missing".to_string(),
            })
            .await;
        assert_eq!(error_code_of(response), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_connection_test_does_not_change_state() {
        let f = fixture();

        let response = f
            .handler
            .handle(Request::TestConnection {
                config: ConnectionConfig {
                    port: 1,
                    ..ConnectionConfig::new("127.0.0.1")
                },
            })
            .await;

        assert!(matches!(
            response,
            Response::Ok {
                data: Some(ResponseData::ConnectionTest { success: false, error: Some(_) })
            }
        ));
        assert_eq!(active(&f.handler).await, "local");
    }

    #[tokio::test]
    async fn test_restore_last_context() {
        let mount = tempdir().unwrap();
        let store = Arc::new(MemoryConfigStore::new());
        store
            .save_profile(RemoteProfile {
                host: "box".to_string(),
                port: 22,
                username: "dev".to_string(),
                auth_method: AuthMethod::Agent,
                mount_path: Some(mount.path().to_path_buf()),
                last_connected_at: None,
            })
            .await
            .unwrap();
        store.set_last_active_context("remote-box").await.unwrap();

        let f = fixture_with_store(store);
        f.handler.initialize().await;

        assert_eq!(active(&f.handler).await, "remote-box");
    }

    #[tokio::test]
    async fn test_restore_failure_stays_local() {
        let store = Arc::new(MemoryConfigStore::new());
        store
            .save_profile(RemoteProfile {
                host: "box".to_string(),
                port: 22,
                username: "dev".to_string(),
                auth_method: AuthMethod::Agent,
                mount_path: Some(PathBuf::from("/nonexistent/vantage/mount")),
                last_connected_at: None,
            })
            .await
            .unwrap();
        store.set_last_active_context("remote-box").await.unwrap();

        let f = fixture_with_store(store);
        f.handler.initialize().await;

        assert_eq!(active(&f.handler).await, "local");
    }

    #[tokio::test]
    async fn test_lost_mount_falls_back_with_notification() {
        let f = fixture();
        let mount = f.mount.path().join("box");
        std::fs::create_dir_all(&mount).unwrap();
        f.handler.initialize().await;
        f.handler.handle(connect_request(&mount)).await;

        let mut events = f.handler.subscribe().unwrap();
        std::fs::remove_dir_all(&mount).unwrap();
        f.handler.check_connection().await;

        assert_eq!(active(&f.handler).await, "local");
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            PushEvent::ContextChanged {
                context_id: "local".to_string(),
                kind: vantage_ipc::ContextKind::Local,
            }
        );
    }

    #[tokio::test]
    async fn test_status_and_shutdown() {
        let mut f = fixture();

        let response = f.handler.handle(Request::Status).await;
        let Response::Ok {
            data:
                Some(ResponseData::Status {
                    contexts,
                    active_context_id,
                    connection,
                    requests_total,
                    ..
                }),
        } = response
        else {
            panic!("Unexpected response");
        };
        assert_eq!(contexts, 1);
        assert_eq!(active_context_id, "local");
        assert_eq!(connection, vantage_ipc::ConnectionState::Disconnected);
        assert_eq!(requests_total, 1);

        assert_eq!(f.handler.handle(Request::Shutdown).await, Response::ack());
        assert!(f.shutdown_rx.try_recv().is_ok());

        f.handler.shutdown().await;
        assert!(f.handler.registry.lock().await.active().unwrap().is_disposed());
    }
}
