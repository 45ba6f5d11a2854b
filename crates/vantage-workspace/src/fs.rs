//! Filesystem capability.
//!
//! Every workspace reads its root through a [`FileSystem`] so that local
//! disks and roots reached through a tunnel look the same to discovery.

use crate::WorkspaceError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Where a filesystem capability is backed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsKind {
    /// Directly on this machine
    Local,
    /// Reached through a remote tunnel (mount, sftp bridge, ...)
    Remote,
}

/// A directory entry returned by [`FileSystem::read_dir`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// File name (last path component)
    pub name: String,
    /// Absolute path
    pub path: PathBuf,
    /// Whether the entry is a directory
    pub is_dir: bool,
    /// Size in bytes (0 for directories)
    pub size: u64,
    /// Last modified time (Unix timestamp, milliseconds)
    pub mtime_ms: i64,
}

/// Read-only access to a workspace root.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Backing kind of this capability
    fn kind(&self) -> FsKind;

    /// List the direct children of a directory, sorted by name
    async fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>, WorkspaceError>;
}

/// [`FileSystem`] over the local disk.
#[derive(Debug, Clone)]
pub struct LocalFileSystem {
    kind: FsKind,
}

impl LocalFileSystem {
    /// Create a capability for the local disk.
    pub fn new() -> Self {
        Self { kind: FsKind::Local }
    }

    /// Create a capability for a remote root that is exposed as a local
    /// mount point by the tunnel.
    pub fn mounted() -> Self {
        Self {
            kind: FsKind::Remote,
        }
    }
}

impl Default for LocalFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    fn kind(&self) -> FsKind {
        self.kind
    }

    async fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>, WorkspaceError> {
        let mut reader = match tokio::fs::read_dir(path).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(WorkspaceError::NotFound(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let metadata = match entry.metadata().await {
                Ok(m) => m,
                // Entry vanished between listing and stat
                Err(_) => continue,
            };

            let mtime_ms = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);

            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                path: entry.path(),
                is_dir: metadata.is_dir(),
                size: if metadata.is_dir() { 0 } else { metadata.len() },
                mtime_ms,
            });
        }

        // Sort by name for deterministic ordering
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(entries)
    }
}
