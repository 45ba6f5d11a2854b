//! IPC client for communicating with the Vantage daemon.

use crate::protocol::{read_frame, write_frame};
use crate::{
    ConnectionConfig, ConnectionInfo, ContextEntry, IpcError, ProjectInfo, PushEvent, Request,
    Response, ResponseData, SessionInfo,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::UnixStream;

/// Default socket path
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/vantage.sock";

/// Connection timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Request/response timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Remote connects may wait on a slow tunnel
const CONNECT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// IPC client for communicating with the daemon
#[derive(Debug, Clone)]
pub struct IpcClient {
    socket_path: PathBuf,
}

impl IpcClient {
    /// Create a client with default socket path
    pub fn new() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
        }
    }

    /// Create a client with custom socket path
    pub fn with_socket_path<P: AsRef<Path>>(socket_path: P) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Connect to the daemon and return a connected client
    pub async fn connect(&self) -> Result<ConnectedClient, IpcError> {
        if !self.socket_path.exists() {
            return Err(IpcError::DaemonNotRunning);
        }

        let stream = tokio::time::timeout(CONNECT_TIMEOUT, UnixStream::connect(&self.socket_path))
            .await
            .map_err(|_| IpcError::ConnectionFailed("Connection timed out".to_string()))??;

        Ok(ConnectedClient { stream })
    }

    /// Check if daemon is running
    pub fn is_daemon_running(&self) -> bool {
        self.socket_path.exists()
    }

    /// Open a push-event subscription on a dedicated connection
    pub async fn subscribe(&self) -> Result<EventStream, IpcError> {
        let mut client = self.connect().await?;
        match client.send(Request::Subscribe).await? {
            Response::Ack => Ok(EventStream {
                stream: client.stream,
            }),
            other => Err(unexpected(other)),
        }
    }
}

impl Default for IpcClient {
    fn default() -> Self {
        Self::new()
    }
}

/// A connected IPC client that can send requests and receive responses
pub struct ConnectedClient {
    stream: UnixStream,
}

impl ConnectedClient {
    /// Send a request and wait for response
    pub async fn send(&mut self, request: Request) -> Result<Response, IpcError> {
        self.send_with_timeout(request, REQUEST_TIMEOUT).await
    }

    async fn send_with_timeout(
        &mut self,
        request: Request,
        timeout: Duration,
    ) -> Result<Response, IpcError> {
        tokio::time::timeout(timeout, self.do_send(request))
            .await
            .map_err(|_| IpcError::ConnectionFailed("Request timed out".to_string()))?
    }

    async fn do_send(&mut self, request: Request) -> Result<Response, IpcError> {
        write_frame(&mut self.stream, &request).await?;
        read_frame(&mut self.stream).await
    }
}

/// Push events from a `subscribe` connection
pub struct EventStream {
    stream: UnixStream,
}

impl EventStream {
    /// Next event, or `None` once the daemon closes the stream
    pub async fn next(&mut self) -> Result<Option<PushEvent>, IpcError> {
        match read_frame(&mut self.stream).await {
            Ok(event) => Ok(Some(event)),
            Err(IpcError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn unexpected(response: Response) -> IpcError {
    match response {
        Response::Error { code, message } => IpcError::Rejected { code, message },
        other => IpcError::UnexpectedResponse(format!("{:?}", other)),
    }
}

/// Convenience functions for one-off requests
impl IpcClient {
    /// Send a request and wait for response (opens new connection)
    pub async fn request(&self, request: Request) -> Result<Response, IpcError> {
        let mut client = self.connect().await?;
        client.send(request).await
    }

    async fn request_data(&self, request: Request) -> Result<ResponseData, IpcError> {
        self.request_data_with_timeout(request, REQUEST_TIMEOUT).await
    }

    async fn request_data_with_timeout(
        &self,
        request: Request,
        timeout: Duration,
    ) -> Result<ResponseData, IpcError> {
        let mut client = self.connect().await?;
        match client.send_with_timeout(request, timeout).await? {
            Response::Ok { data: Some(data) } => Ok(data),
            other => Err(unexpected(other)),
        }
    }

    /// Registered contexts
    pub async fn list_contexts(&self) -> Result<Vec<ContextEntry>, IpcError> {
        match self.request_data(Request::ListContexts).await? {
            ResponseData::Contexts { contexts } => Ok(contexts),
            other => Err(IpcError::UnexpectedResponse(format!("{:?}", other))),
        }
    }

    /// Active context id
    pub async fn active_context(&self) -> Result<String, IpcError> {
        match self.request_data(Request::GetActive).await? {
            ResponseData::ActiveContext { context_id } => Ok(context_id),
            other => Err(IpcError::UnexpectedResponse(format!("{:?}", other))),
        }
    }

    /// Switch the active context, returning the new active id
    pub async fn switch_context(&self, context_id: &str) -> Result<String, IpcError> {
        let request = Request::SwitchContext {
            context_id: context_id.to_string(),
        };
        match self.request_data(request).await? {
            ResponseData::Switched { context_id, .. } => Ok(context_id),
            other => Err(IpcError::UnexpectedResponse(format!("{:?}", other))),
        }
    }

    /// Connect to a remote host
    pub async fn connect_remote(&self, config: ConnectionConfig) -> Result<ConnectionInfo, IpcError> {
        let request = Request::Connect { config };
        match self
            .request_data_with_timeout(request, CONNECT_REQUEST_TIMEOUT)
            .await?
        {
            ResponseData::Connection { connection } => Ok(connection),
            other => Err(IpcError::UnexpectedResponse(format!("{:?}", other))),
        }
    }

    /// Close the remote connection
    pub async fn disconnect_remote(&self) -> Result<ConnectionInfo, IpcError> {
        match self.request_data(Request::Disconnect).await? {
            ResponseData::Connection { connection } => Ok(connection),
            other => Err(IpcError::UnexpectedResponse(format!("{:?}", other))),
        }
    }

    /// Test a remote config. `Ok(Err(reason))` means the daemon ran the
    /// test and it failed.
    pub async fn test_connection(
        &self,
        config: ConnectionConfig,
    ) -> Result<Result<(), String>, IpcError> {
        let request = Request::TestConnection { config };
        match self
            .request_data_with_timeout(request, CONNECT_REQUEST_TIMEOUT)
            .await?
        {
            ResponseData::ConnectionTest { success: true, .. } => Ok(Ok(())),
            ResponseData::ConnectionTest { error, .. } => {
                Ok(Err(error.unwrap_or_else(|| "unknown error".to_string())))
            }
            other => Err(IpcError::UnexpectedResponse(format!("{:?}", other))),
        }
    }

    /// Projects in the active context
    pub async fn list_projects(&self) -> Result<Vec<ProjectInfo>, IpcError> {
        match self.request_data(Request::ListProjects).await? {
            ResponseData::Projects { projects } => Ok(projects),
            other => Err(IpcError::UnexpectedResponse(format!("{:?}", other))),
        }
    }

    /// Sessions of a project in the active context
    pub async fn list_sessions(&self, project_id: &str) -> Result<Vec<SessionInfo>, IpcError> {
        let request = Request::ListSessions {
            project_id: project_id.to_string(),
        };
        match self.request_data(request).await? {
            ResponseData::Sessions { sessions } => Ok(sessions),
            other => Err(IpcError::UnexpectedResponse(format!("{:?}", other))),
        }
    }

    /// Get daemon status
    pub async fn get_status(&self) -> Result<ResponseData, IpcError> {
        self.request_data(Request::Status).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorCode, IpcServer, RequestHandler};
    use async_trait::async_trait;
    use std::sync::Arc;
    use tempfile::tempdir;
    use tokio::sync::broadcast;

    struct TestHandler {
        events: broadcast::Sender<PushEvent>,
    }

    #[async_trait]
    impl RequestHandler for TestHandler {
        async fn handle(&self, request: Request) -> Response {
            match request {
                Request::Ping => Response::ok_with(ResponseData::Pong { timestamp: 0 }),
                Request::SwitchContext { context_id } if context_id == "local" => {
                    Response::ok_with(ResponseData::Switched {
                        context_id,
                        previous_context_id: "local".to_string(),
                    })
                }
                Request::SwitchContext { context_id } => Response::error(
                    ErrorCode::NotFound,
                    format!("Context not found: {}", context_id),
                ),
                Request::TestConnection { config } => {
                    Response::ok_with(ResponseData::ConnectionTest {
                        success: false,
                        error: Some(format!("{} unreachable", config.host)),
                    })
                }
                _ => Response::ack(),
            }
        }

        fn subscribe(&self) -> Option<broadcast::Receiver<PushEvent>> {
            Some(self.events.subscribe())
        }
    }

    async fn start(socket_path: &Path) -> broadcast::Sender<PushEvent> {
        let (events, _) = broadcast::channel(16);
        let handler = Arc::new(TestHandler {
            events: events.clone(),
        });
        let server = IpcServer::new(socket_path, handler).await.unwrap();
        tokio::spawn(async move {
            let _ = server.run().await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        events
    }

    #[tokio::test]
    async fn test_client_connect_no_daemon() {
        let client = IpcClient::with_socket_path("/tmp/nonexistent_vantage_12345.sock");
        let result = client.connect().await;
        assert!(matches!(result, Err(IpcError::DaemonNotRunning)));
        assert!(!client.is_daemon_running());
    }

    #[tokio::test]
    async fn test_client_default() {
        let client = IpcClient::default();
        assert_eq!(client.socket_path(), Path::new(DEFAULT_SOCKET_PATH));
    }

    #[tokio::test]
    async fn test_client_connect_and_ping() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        start(&socket_path).await;

        let client = IpcClient::with_socket_path(&socket_path);
        let response = client.request(Request::Ping).await.unwrap();

        assert!(matches!(
            response,
            Response::Ok {
                data: Some(ResponseData::Pong { .. })
            }
        ));
    }

    #[tokio::test]
    async fn test_switch_rejection_surfaces_message() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        start(&socket_path).await;

        let client = IpcClient::with_socket_path(&socket_path);
        assert_eq!(client.switch_context("local").await.unwrap(), "local");

        let err = client.switch_context("remote-x").await.unwrap_err();
        assert!(matches!(
            err,
            IpcError::Rejected {
                code: ErrorCode::NotFound,
                ..
            }
        ));
        assert!(err.to_string().contains("remote-x"));
    }

    #[tokio::test]
    async fn test_failed_connection_test() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        start(&socket_path).await;

        let client = IpcClient::with_socket_path(&socket_path);
        let result = client
            .test_connection(ConnectionConfig::new("box"))
            .await
            .unwrap();
        assert_eq!(result, Err("box unreachable".to_string()));
    }

    #[tokio::test]
    async fn test_subscribe_receives_events() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        let events = start(&socket_path).await;

        let client = IpcClient::with_socket_path(&socket_path);
        let mut stream = client.subscribe().await.unwrap();

        let event = PushEvent::ContextChanged {
            context_id: "local".to_string(),
            kind: crate::ContextKind::Local,
        };
        events.send(event.clone()).unwrap();

        assert_eq!(stream.next().await.unwrap(), Some(event));
    }
}
