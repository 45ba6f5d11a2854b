//! Integration tests for Vantage IPC communication.
//!
//! These tests verify end-to-end communication between client and server.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Barrier, Mutex};

use async_trait::async_trait;
use tempfile::tempdir;
use vantage_ipc::{
    ChangeType, ConnectionConfig, ConnectionInfo, ConnectionState, ContextEntry, ContextKind,
    ErrorCode, IpcClient, IpcError, IpcServer, PushEvent, Request, RequestHandler, Response,
    ResponseData,
};

/// Test handler that simulates a registry of contexts
struct IntegrationHandler {
    contexts: Mutex<Vec<ContextEntry>>,
    active: Mutex<String>,
    events: broadcast::Sender<PushEvent>,
}

impl IntegrationHandler {
    fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            contexts: Mutex::new(vec![ContextEntry {
                id: "local".to_string(),
                kind: ContextKind::Local,
            }]),
            active: Mutex::new("local".to_string()),
            events,
        }
    }
}

#[async_trait]
impl RequestHandler for IntegrationHandler {
    async fn handle(&self, request: Request) -> Response {
        match request {
            Request::Ping => Response::ok_with(ResponseData::Pong {
                timestamp: chrono::Utc::now().timestamp(),
            }),
            Request::ListContexts => Response::ok_with(ResponseData::Contexts {
                contexts: self.contexts.lock().await.clone(),
            }),
            Request::GetActive => Response::ok_with(ResponseData::ActiveContext {
                context_id: self.active.lock().await.clone(),
            }),
            Request::SwitchContext { context_id } => {
                let known = self
                    .contexts
                    .lock()
                    .await
                    .iter()
                    .any(|c| c.id == context_id);
                if !known {
                    return Response::error(
                        ErrorCode::NotFound,
                        format!("Context not found: {}", context_id),
                    );
                }
                let mut active = self.active.lock().await;
                let previous_context_id = std::mem::replace(&mut *active, context_id.clone());
                Response::ok_with(ResponseData::Switched {
                    context_id,
                    previous_context_id,
                })
            }
            Request::Connect { config } => {
                let id = format!("remote-{}", config.host);
                self.contexts.lock().await.push(ContextEntry {
                    id: id.clone(),
                    kind: ContextKind::Remote,
                });
                *self.active.lock().await = id;
                Response::ok_with(ResponseData::Connection {
                    connection: ConnectionInfo {
                        state: ConnectionState::Connected,
                        host: Some(config.host),
                        error: None,
                        remote_root_path: Some("/mnt/remote/.claude".into()),
                    },
                })
            }
            _ => Response::ack(),
        }
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<PushEvent>> {
        Some(self.events.subscribe())
    }
}

async fn start_server(socket_path: &std::path::Path) -> Arc<IntegrationHandler> {
    let handler = Arc::new(IntegrationHandler::new());
    let server = IpcServer::new(socket_path, handler.clone()).await.unwrap();

    tokio::spawn(async move {
        let _ = server.run().await;
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    handler
}

#[tokio::test]
async fn test_full_ipc_lifecycle() {
    let temp_dir = tempdir().unwrap();
    let socket_path = temp_dir.path().join("integration.sock");
    start_server(&socket_path).await;

    let client = IpcClient::with_socket_path(&socket_path);

    // 1. Ping
    let response = client.request(Request::Ping).await.unwrap();
    assert!(matches!(
        response,
        Response::Ok {
            data: Some(ResponseData::Pong { .. })
        }
    ));

    // 2. Only local exists
    let contexts = client.list_contexts().await.unwrap();
    assert_eq!(contexts.len(), 1);
    assert_eq!(client.active_context().await.unwrap(), "local");

    // 3. Connect makes the remote active
    let status = client
        .connect_remote(ConnectionConfig::new("box"))
        .await
        .unwrap();
    assert_eq!(status.state, ConnectionState::Connected);
    assert_eq!(client.active_context().await.unwrap(), "remote-box");

    // 4. Switch back
    assert_eq!(client.switch_context("local").await.unwrap(), "local");
    assert_eq!(client.list_contexts().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_switch_unknown_keeps_active() {
    let temp_dir = tempdir().unwrap();
    let socket_path = temp_dir.path().join("unknown.sock");
    start_server(&socket_path).await;

    let client = IpcClient::with_socket_path(&socket_path);
    let err = client.switch_context("remote-missing").await.unwrap_err();

    assert!(matches!(
        err,
        IpcError::Rejected {
            code: ErrorCode::NotFound,
            ..
        }
    ));
    assert_eq!(client.active_context().await.unwrap(), "local");
}

#[tokio::test]
async fn test_concurrent_clients() {
    let temp_dir = tempdir().unwrap();
    let socket_path = temp_dir.path().join("concurrent.sock");
    start_server(&socket_path).await;

    // Spawn 10 concurrent clients
    let barrier = Arc::new(Barrier::new(10));
    let mut handles = Vec::new();

    for i in 0..10 {
        let path = socket_path.clone();
        let barrier = barrier.clone();

        handles.push(tokio::spawn(async move {
            barrier.wait().await;

            let client = IpcClient::with_socket_path(&path);
            let response = client.request(Request::Ping).await;

            (i, response.is_ok())
        }));
    }

    let mut successes = 0;
    for handle in handles {
        let (_, success) = handle.await.unwrap();
        if success {
            successes += 1;
        }
    }

    assert_eq!(successes, 10, "All 10 concurrent clients should succeed");
}

#[tokio::test]
async fn test_subscription_survives_requests_on_other_connections() {
    let temp_dir = tempdir().unwrap();
    let socket_path = temp_dir.path().join("subscribe.sock");
    let handler = start_server(&socket_path).await;

    let client = IpcClient::with_socket_path(&socket_path);
    let mut events = client.subscribe().await.unwrap();

    client.switch_context("local").await.unwrap();

    let sent = vec![
        PushEvent::FileChange {
            context_id: "local".to_string(),
            path: "/root/projects/p/s.jsonl".into(),
            change_type: ChangeType::Modified,
            project_id: Some("p".to_string()),
            session_id: Some("s".to_string()),
        },
        PushEvent::TodoChange {
            context_id: "local".to_string(),
            path: "/root/todos/s.json".into(),
            change_type: ChangeType::Created,
            session_id: Some("s".to_string()),
        },
    ];
    for event in &sent {
        handler.events.send(event.clone()).unwrap();
    }

    for expected in sent {
        let received = tokio::time::timeout(Duration::from_secs(2), events.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, Some(expected));
    }
}

#[tokio::test]
async fn test_event_stream_ends_when_source_closes() {
    let temp_dir = tempdir().unwrap();
    let socket_path = temp_dir.path().join("closing.sock");

    let (events, _) = broadcast::channel::<PushEvent>(4);
    struct ClosingHandler {
        rx: std::sync::Mutex<Option<broadcast::Receiver<PushEvent>>>,
    }

    #[async_trait]
    impl RequestHandler for ClosingHandler {
        async fn handle(&self, _request: Request) -> Response {
            Response::ack()
        }

        fn subscribe(&self) -> Option<broadcast::Receiver<PushEvent>> {
            self.rx.lock().unwrap().take()
        }
    }

    let handler = Arc::new(ClosingHandler {
        rx: std::sync::Mutex::new(Some(events.subscribe())),
    });
    let server = IpcServer::new(&socket_path, handler).await.unwrap();
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = IpcClient::with_socket_path(&socket_path);
    let mut stream = client.subscribe().await.unwrap();
    drop(events);

    let next = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(next, None);
}
