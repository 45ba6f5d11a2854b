//! Context switching against a real control socket.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::tempdir;
use tokio::sync::Mutex;
use vantage_client::{
    ClientConfig, ClientError, ClientSnapshotStore, ContextSwitchOrchestrator, IpcBackend,
    SwitchPhase,
};
use vantage_ipc::{
    ErrorCode, IpcClient, IpcServer, ProjectInfo, Request, RequestHandler, Response,
    ResponseData, SessionInfo,
};

/// Daemon stand-in with a fixed project listing per context
struct ListingHandler {
    active: Mutex<String>,
    projects: HashMap<String, Vec<ProjectInfo>>,
}

fn project(id: &str) -> ProjectInfo {
    ProjectInfo {
        id: id.to_string(),
        path: PathBuf::from(format!("/w/projects/{}", id)),
        session_count: 1,
        last_modified_ms: 1_700_000_000_000,
    }
}

#[async_trait]
impl RequestHandler for ListingHandler {
    async fn handle(&self, request: Request) -> Response {
        match request {
            Request::GetActive => Response::ok_with(ResponseData::ActiveContext {
                context_id: self.active.lock().await.clone(),
            }),
            Request::SwitchContext { context_id } => {
                if !self.projects.contains_key(&context_id) {
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
            Request::ListProjects => {
                let active = self.active.lock().await.clone();
                Response::ok_with(ResponseData::Projects {
                    projects: self.projects.get(&active).cloned().unwrap_or_default(),
                })
            }
            Request::ListSessions { project_id } => Response::ok_with(ResponseData::Sessions {
                sessions: vec![SessionInfo {
                    id: "s1".to_string(),
                    path: PathBuf::from(format!("/w/projects/{}/s1.jsonl", project_id)),
                    project_id,
                    size: 42,
                    last_modified_ms: 1_700_000_000_000,
                }],
            }),
            _ => Response::ack(),
        }
    }
}

async fn start_server(socket_path: &std::path::Path) {
    let handler = Arc::new(ListingHandler {
        active: Mutex::new("local".to_string()),
        projects: HashMap::from([
            ("local".to_string(), vec![project("home-app")]),
            (
                "remote-box".to_string(),
                vec![project("srv-api"), project("srv-web")],
            ),
        ]),
    });
    let server = IpcServer::new(socket_path, handler).await.unwrap();
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
}

async fn attach(
    socket_path: &std::path::Path,
    snapshot_dir: &std::path::Path,
) -> ContextSwitchOrchestrator {
    let config = ClientConfig {
        socket_path: socket_path.to_path_buf(),
        snapshot_dir: snapshot_dir.to_path_buf(),
        ..Default::default()
    };
    let backend = Arc::new(IpcBackend::new(IpcClient::with_socket_path(
        &config.socket_path,
    )));
    let store = Arc::new(ClientSnapshotStore::from_config(&config));
    ContextSwitchOrchestrator::attach(backend, store).await.unwrap()
}

#[tokio::test]
async fn test_switch_round_trip_restores_view() {
    let temp_dir = tempdir().unwrap();
    let socket_path = temp_dir.path().join("switch.sock");
    start_server(&socket_path).await;

    let orchestrator = attach(&socket_path, &temp_dir.path().join("snapshots")).await;
    orchestrator.settle().await;
    assert_eq!(orchestrator.view().projects.len(), 1);
    orchestrator.update_view(|view| view.selected_project_id = Some("home-app".to_string()));

    let outcome = orchestrator.switch("remote-box").await.unwrap().unwrap();
    assert!(!outcome.had_snapshot);
    orchestrator.settle().await;
    assert_eq!(orchestrator.view().projects.len(), 2);

    let outcome = orchestrator.switch("local").await.unwrap().unwrap();
    assert!(outcome.had_snapshot);
    assert_eq!(
        orchestrator.view().selected_project_id.as_deref(),
        Some("home-app")
    );

    orchestrator.settle().await;
    let view = orchestrator.view();
    assert_eq!(view.sessions.len(), 1);
    assert_eq!(view.sessions[0].project_id, "home-app");
    assert_eq!(orchestrator.phase(), SwitchPhase::Idle);
}

#[tokio::test]
async fn test_unknown_context_surfaces_error() {
    let temp_dir = tempdir().unwrap();
    let socket_path = temp_dir.path().join("unknown.sock");
    start_server(&socket_path).await;

    let orchestrator = attach(&socket_path, &temp_dir.path().join("snapshots")).await;
    orchestrator.settle().await;

    let err = orchestrator.switch("remote-gone").await.unwrap_err();
    assert!(matches!(err, ClientError::Rejected(_)));
    assert_eq!(orchestrator.active_context_id(), "local");
    assert_eq!(
        orchestrator.view().error.as_deref(),
        Some("Context not found: remote-gone")
    );
}

#[tokio::test]
async fn test_snapshots_survive_restart() {
    let temp_dir = tempdir().unwrap();
    let socket_path = temp_dir.path().join("restart.sock");
    let snapshot_dir = temp_dir.path().join("snapshots");
    start_server(&socket_path).await;

    {
        let orchestrator = attach(&socket_path, &snapshot_dir).await;
        orchestrator.settle().await;
        orchestrator.update_view(|view| view.selected_project_id = Some("home-app".to_string()));
        orchestrator.persist().await.unwrap();
    }

    let orchestrator = attach(&socket_path, &snapshot_dir).await;
    assert_eq!(
        orchestrator.view().selected_project_id.as_deref(),
        Some("home-app")
    );
}

#[tokio::test]
async fn test_daemon_down_fails_attach() {
    let temp_dir = tempdir().unwrap();
    let socket_path = temp_dir.path().join("absent.sock");

    let backend = Arc::new(IpcBackend::new(IpcClient::with_socket_path(&socket_path)));
    let store = Arc::new(ClientSnapshotStore::in_memory(Duration::from_secs(60)));
    let result = ContextSwitchOrchestrator::attach(backend, store).await;

    assert!(matches!(result, Err(ClientError::Ipc(_))));
}
