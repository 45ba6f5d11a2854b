//! IPC Protocol definitions for Vantage daemon communication.
//!
//! Frames are a 4-byte little-endian length followed by a MessagePack body
//! (named fields). Requests may also be sent as JSON for debugging.

use crate::IpcError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame size (1MB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Request from client (front-end/CLI) to daemon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Request {
    /// List registered contexts
    ListContexts,

    /// Get the active context id
    GetActive,

    /// Make another registered context active
    SwitchContext { context_id: String },

    /// Connect to a remote host and activate its context
    Connect { config: ConnectionConfig },

    /// Close the current remote connection
    Disconnect,

    /// Check a remote config without changing state
    TestConnection { config: ConnectionConfig },

    /// Projects of the active context
    ListProjects,

    /// Sessions of one project in the active context
    ListSessions { project_id: String },

    /// Keep the connection open and receive push events
    Subscribe,

    /// Get daemon status
    Status,

    /// Graceful shutdown
    Shutdown,

    /// Ping for health check
    Ping,
}

/// Where a context's root lives
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    Local,
    Remote,
}

/// Public context record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextEntry {
    pub id: String,
    pub kind: ContextKind,
}

/// Remote authentication method
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    #[default]
    Agent,
    PrivateKey,
    Password,
}

/// Remote connection parameters. Never carries a secret.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub auth_method: AuthMethod,
    /// Handle the daemon's transport resolves to a secret
    #[serde(default)]
    pub credentials_ref: Option<String>,
    #[serde(default)]
    pub mount_path: Option<PathBuf>,
}

impl ConnectionConfig {
    /// Config for `host` with default port and agent auth
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            username: String::new(),
            auth_method: AuthMethod::Agent,
            credentials_ref: None,
            mount_path: None,
        }
    }
}

fn default_port() -> u16 {
    22
}

/// Remote connection lifecycle state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Connection status as reported to clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub state: ConnectionState,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub remote_root_path: Option<PathBuf>,
}

/// Project listing entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectInfo {
    pub id: String,
    pub path: PathBuf,
    pub session_count: usize,
    pub last_modified_ms: i64,
}

/// Session listing entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: String,
    pub project_id: String,
    pub path: PathBuf,
    pub size: u64,
    pub last_modified_ms: i64,
}

/// Response from daemon to client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    /// Success with optional data
    Ok {
        #[serde(default)]
        data: Option<ResponseData>,
    },

    /// Acknowledgment for requests without a result
    Ack,

    /// Error response
    Error { code: ErrorCode, message: String },
}

impl Response {
    /// Create a success response with no data
    pub fn ok() -> Self {
        Response::Ok { data: None }
    }

    /// Create a success response with data
    pub fn ok_with(data: ResponseData) -> Self {
        Response::Ok { data: Some(data) }
    }

    /// Create an acknowledgment response
    pub fn ack() -> Self {
        Response::Ack
    }

    /// Create an error response
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Response::Error {
            code,
            message: message.into(),
        }
    }
}

/// Response data variants
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseData {
    /// Registered contexts, local first
    Contexts { contexts: Vec<ContextEntry> },

    /// Active context id
    ActiveContext { context_id: String },

    /// Switch completed
    Switched {
        context_id: String,
        previous_context_id: String,
    },

    /// Connect/disconnect result
    Connection { connection: ConnectionInfo },

    /// Connection test result
    ConnectionTest {
        success: bool,
        #[serde(default)]
        error: Option<String>,
    },

    /// Project listing
    Projects { projects: Vec<ProjectInfo> },

    /// Session listing
    Sessions { sessions: Vec<SessionInfo> },

    /// Daemon status
    Status {
        version: String,
        uptime_secs: u64,
        contexts: usize,
        active_context_id: String,
        connection: ConnectionState,
        /// Total requests handled
        #[serde(default)]
        requests_total: u64,
        /// Active context's cache hit rate (0.0-1.0)
        #[serde(default)]
        cache_hit_rate: f64,
    },

    /// Pong response
    Pong { timestamp: i64 },
}

/// Error codes for error responses
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Unknown context id
    NotFound,
    /// Context id already registered
    DuplicateContext,
    /// The local context cannot be destroyed
    PermanentContext,
    /// Remote connect/disconnect failed
    TransportError,
    /// Request format is invalid
    InvalidRequest,
    /// Internal daemon error
    InternalError,
}

/// File change kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Created,
    Modified,
    Deleted,
}

/// Event pushed to subscribed clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PushEvent {
    /// A session file changed in the active context
    FileChange {
        context_id: String,
        path: PathBuf,
        change_type: ChangeType,
        #[serde(default)]
        project_id: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },

    /// A todo file changed in the active context
    TodoChange {
        context_id: String,
        path: PathBuf,
        change_type: ChangeType,
        #[serde(default)]
        session_id: Option<String>,
    },

    /// The active context changed without the client asking
    ContextChanged {
        context_id: String,
        kind: ContextKind,
    },
}

/// Write one length-prefixed MessagePack frame
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), IpcError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = rmp_serde::to_vec_named(value)?;
    if bytes.len() > MAX_FRAME_SIZE {
        return Err(IpcError::RequestTooLarge);
    }
    let len_bytes = (bytes.len() as u32).to_le_bytes();

    writer.write_all(&len_bytes).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;

    Ok(())
}

/// Read one frame body
pub async fn read_frame_bytes<R>(reader: &mut R) -> Result<Vec<u8>, IpcError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf) as usize;

    if len > MAX_FRAME_SIZE {
        return Err(IpcError::RequestTooLarge);
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Read and decode one MessagePack frame
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, IpcError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let buf = read_frame_bytes(reader).await?;
    Ok(rmp_serde::from_slice(&buf)?)
}
