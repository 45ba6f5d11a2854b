//! Unix socket IPC server for the Vantage daemon.
//!
//! Handles incoming connections and dispatches requests to handlers. A
//! connection may carry any number of requests; a `subscribe` request turns
//! it into a one-way push-event stream.

use crate::protocol::{read_frame_bytes, write_frame};
use crate::{ErrorCode, IpcError, PushEvent, Request, Response};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

/// How long an open connection may sit idle between requests
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Unix socket IPC server
pub struct IpcServer {
    listener: UnixListener,
    handler: Arc<dyn RequestHandler>,
}

impl IpcServer {
    /// Create a new IPC server bound to the given socket path
    pub async fn new<P: AsRef<Path>>(
        socket_path: P,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<Self, IpcError> {
        let socket_path = socket_path.as_ref();

        // Remove stale socket file if it exists
        if socket_path.exists() {
            let _ = std::fs::remove_file(socket_path);
        }

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(socket_path)?;

        // User only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::info!("IPC server listening on {}", socket_path.display());

        Ok(Self { listener, handler })
    }

    /// Run the server, accepting connections until the task is dropped
    pub async fn run(&self) -> Result<(), IpcError> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    let handler = self.handler.clone();
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(stream, handler).await {
                            tracing::debug!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Accept error: {}", e);
                }
            }
        }
    }

    /// Serve requests on one connection until the peer hangs up
    async fn handle_connection(
        mut stream: UnixStream,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<(), IpcError> {
        loop {
            let frame = match tokio::time::timeout(IDLE_TIMEOUT, read_frame_bytes(&mut stream)).await
            {
                Ok(Ok(frame)) => frame,
                Ok(Err(IpcError::Io(e))) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(());
                }
                Ok(Err(e)) => return Err(e),
                Err(elapsed) => return Err(IpcError::Timeout(elapsed)),
            };

            let request = match Self::decode_request(&frame) {
                Ok(req) => req,
                Err(e) => {
                    let response = Response::error(
                        ErrorCode::InvalidRequest,
                        format!("Failed to parse request: {}", e),
                    );
                    write_frame(&mut stream, &response).await?;
                    return Err(e);
                }
            };

            tracing::debug!("Received request: {:?}", request);

            if request == Request::Subscribe {
                return Self::stream_events(stream, handler.as_ref()).await;
            }

            let response = handler.handle(request).await;
            write_frame(&mut stream, &response).await?;
        }
    }

    /// Forward push events until the client goes away or the source closes
    async fn stream_events(
        mut stream: UnixStream,
        handler: &dyn RequestHandler,
    ) -> Result<(), IpcError> {
        let Some(mut rx) = handler.subscribe() else {
            let response = Response::error(
                ErrorCode::InvalidRequest,
                "Subscriptions are not supported",
            );
            return write_frame(&mut stream, &response).await;
        };

        write_frame(&mut stream, &Response::ack()).await?;
        tracing::debug!("Client subscribed to push events");

        loop {
            match rx.recv().await {
                Ok(event) => write_frame(&mut stream, &event).await?,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            }
        }
    }

    fn decode_request(buf: &[u8]) -> Result<Request, IpcError> {
        match rmp_serde::from_slice(buf) {
            Ok(request) => Ok(request),
            // JSON fallback, useful for testing with nc/socat
            Err(e) => serde_json::from_slice(buf).map_err(|_| IpcError::Deserialize(e)),
        }
    }
}

/// Trait for handling incoming requests
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handle a request and return a response
    async fn handle(&self, request: Request) -> Response;

    /// Source of push events for `subscribe` requests
    fn subscribe(&self) -> Option<broadcast::Receiver<PushEvent>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::read_frame;
    use crate::{ContextKind, ResponseData};
    use tempfile::tempdir;
    use tokio::io::AsyncWriteExt;

    struct TestHandler {
        events: broadcast::Sender<PushEvent>,
    }

    #[async_trait]
    impl RequestHandler for TestHandler {
        async fn handle(&self, request: Request) -> Response {
            match request {
                Request::Ping => Response::ok_with(ResponseData::Pong {
                    timestamp: chrono::Utc::now().timestamp(),
                }),
                Request::GetActive => Response::ok_with(ResponseData::ActiveContext {
                    context_id: "local".to_string(),
                }),
                _ => Response::ack(),
            }
        }

        fn subscribe(&self) -> Option<broadcast::Receiver<PushEvent>> {
            Some(self.events.subscribe())
        }
    }

    async fn start_server(socket_path: &Path) -> broadcast::Sender<PushEvent> {
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
    async fn test_server_ping() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("server.sock");
        start_server(&socket_path).await;

        let mut stream = UnixStream::connect(&socket_path).await.unwrap();
        write_frame(&mut stream, &Request::Ping).await.unwrap();
        let response: Response = read_frame(&mut stream).await.unwrap();

        assert!(
            matches!(
                response,
                Response::Ok {
                    data: Some(ResponseData::Pong { .. })
                }
            ),
            "Expected Pong response, got {:?}",
            response
        );
    }

    #[tokio::test]
    async fn test_server_multiple_requests_per_connection() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("server.sock");
        start_server(&socket_path).await;

        let mut stream = UnixStream::connect(&socket_path).await.unwrap();
        for _ in 0..3 {
            write_frame(&mut stream, &Request::GetActive).await.unwrap();
            let response: Response = read_frame(&mut stream).await.unwrap();
            assert_eq!(
                response,
                Response::ok_with(ResponseData::ActiveContext {
                    context_id: "local".to_string()
                })
            );
        }
    }

    #[tokio::test]
    async fn test_server_accepts_json() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("server.sock");
        start_server(&socket_path).await;

        let mut stream = UnixStream::connect(&socket_path).await.unwrap();
        let body = br#"{"action":"get_active"}"#;
        stream
            .write_all(&(body.len() as u32).to_le_bytes())
            .await
            .unwrap();
        stream.write_all(body).await.unwrap();

        let response: Response = read_frame(&mut stream).await.unwrap();
        assert!(matches!(
            response,
            Response::Ok {
                data: Some(ResponseData::ActiveContext { .. })
            }
        ));
    }

    #[tokio::test]
    async fn test_server_rejects_garbage() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("server.sock");
        start_server(&socket_path).await;

        let mut stream = UnixStream::connect(&socket_path).await.unwrap();
        let body = b"not a request";
        stream
            .write_all(&(body.len() as u32).to_le_bytes())
            .await
            .unwrap();
        stream.write_all(body).await.unwrap();

        let response: Response = read_frame(&mut stream).await.unwrap();
        assert!(matches!(
            response,
            Response::Error {
                code: ErrorCode::InvalidRequest,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_server_streams_push_events() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("server.sock");
        let events = start_server(&socket_path).await;

        let mut stream = UnixStream::connect(&socket_path).await.unwrap();
        write_frame(&mut stream, &Request::Subscribe).await.unwrap();
        let ack: Response = read_frame(&mut stream).await.unwrap();
        assert_eq!(ack, Response::ack());

        let event = PushEvent::ContextChanged {
            context_id: "local".to_string(),
            kind: ContextKind::Local,
        };
        events.send(event.clone()).unwrap();

        let received: PushEvent = read_frame(&mut stream).await.unwrap();
        assert_eq!(received, event);
    }
}
