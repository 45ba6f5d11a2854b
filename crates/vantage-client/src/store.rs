//! Snapshot persistence keyed by context id.
//!
//! Only the latest snapshot per context is kept. Entries older than the TTL
//! or written with another schema version read as absent.

use crate::config::ClientConfig;
use crate::error::Result;
use crate::snapshot::{Snapshot, SNAPSHOT_SCHEMA_VERSION};
use crate::view::ViewState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Header fields of a stored snapshot, readable across schema versions
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SnapshotMeta {
    pub context_id: String,
    pub captured_at: DateTime<Utc>,
    pub schema_version: u32,
}

impl From<&Snapshot> for SnapshotMeta {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            context_id: snapshot.context_id.clone(),
            captured_at: snapshot.captured_at,
            schema_version: snapshot.schema_version,
        }
    }
}

/// Where snapshots live.
#[async_trait]
pub trait SnapshotBackend: Send + Sync {
    /// Read the entry for `context_id`; `None` if missing or unreadable
    /// under the current schema.
    async fn read(&self, context_id: &str) -> Result<Option<Snapshot>>;

    /// Replace the entry for `snapshot.context_id`
    async fn write(&self, snapshot: &Snapshot) -> Result<()>;

    async fn remove(&self, context_id: &str) -> Result<()>;

    /// Headers of every stored entry
    async fn list(&self) -> Result<Vec<SnapshotMeta>>;
}

/// In-process backend, lost on exit.
#[derive(Default)]
pub struct MemorySnapshotBackend {
    entries: RwLock<HashMap<String, Snapshot>>,
}

impl MemorySnapshotBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotBackend for MemorySnapshotBackend {
    async fn read(&self, context_id: &str) -> Result<Option<Snapshot>> {
        Ok(self.entries.read().get(context_id).cloned())
    }

    async fn write(&self, snapshot: &Snapshot) -> Result<()> {
        self.entries
            .write()
            .insert(snapshot.context_id.clone(), snapshot.clone());
        Ok(())
    }

    async fn remove(&self, context_id: &str) -> Result<()> {
        self.entries.write().remove(context_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SnapshotMeta>> {
        Ok(self.entries.read().values().map(SnapshotMeta::from).collect())
    }
}

/// One JSON file per context under a directory.
pub struct FileSnapshotBackend {
    dir: PathBuf,
    gate: Mutex<()>,
}

impl FileSnapshotBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            gate: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, context_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(context_id)))
    }
}

/// Context ids may contain host names; keep file names portable.
fn file_stem(context_id: &str) -> String {
    context_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl SnapshotBackend for FileSnapshotBackend {
    async fn read(&self, context_id: &str) -> Result<Option<Snapshot>> {
        let path = self.path_for(context_id);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let meta: SnapshotMeta = serde_json::from_slice(&content)?;
        if meta.schema_version != SNAPSHOT_SCHEMA_VERSION {
            tracing::debug!(
                context_id = %context_id,
                version = meta.schema_version,
                "Ignoring snapshot from another schema version"
            );
            return Ok(None);
        }
        if meta.context_id != context_id {
            return Ok(None);
        }

        Ok(Some(serde_json::from_slice(&content)?))
    }

    async fn write(&self, snapshot: &Snapshot) -> Result<()> {
        let _guard = self.gate.lock().await;
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(&snapshot.context_id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(snapshot)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, context_id: &str) -> Result<()> {
        let _guard = self.gate.lock().await;
        match tokio::fs::remove_file(self.path_for(context_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<SnapshotMeta>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut metas = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = match tokio::fs::read(&path).await {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!(path = ?path, error = %e, "Failed to read snapshot");
                    continue;
                }
            };
            match serde_json::from_slice::<SnapshotMeta>(&content) {
                Ok(meta) => metas.push(meta),
                Err(e) => tracing::warn!(path = ?path, error = %e, "Corrupt snapshot file"),
            }
        }
        Ok(metas)
    }
}

/// Per-context snapshot cache with TTL expiry.
pub struct ClientSnapshotStore {
    backend: Arc<dyn SnapshotBackend>,
    ttl: Duration,
}

impl ClientSnapshotStore {
    pub fn new(backend: Arc<dyn SnapshotBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(Arc::new(MemorySnapshotBackend::new()), ttl)
    }

    /// File-backed store configured from `config`
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            Arc::new(FileSnapshotBackend::new(&config.snapshot_dir)),
            config.snapshot_ttl(),
        )
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Capture `view` for `context_id` without persisting it.
    pub fn capture(&self, context_id: &str, view: &ViewState) -> Snapshot {
        Snapshot::capture(context_id, view)
    }

    /// Persist `snapshot`, replacing any earlier one for its context.
    pub async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        self.backend.write(snapshot).await?;
        tracing::debug!(context_id = %snapshot.context_id, "Snapshot saved");
        Ok(())
    }

    /// Latest live snapshot for `context_id`.
    pub async fn load(&self, context_id: &str) -> Result<Option<Snapshot>> {
        let Some(snapshot) = self.backend.read(context_id).await? else {
            return Ok(None);
        };

        if snapshot.schema_version != SNAPSHOT_SCHEMA_VERSION {
            return Ok(None);
        }
        if self.is_expired(snapshot.captured_at) {
            tracing::debug!(context_id = %context_id, "Snapshot expired");
            self.backend.remove(context_id).await?;
            return Ok(None);
        }

        Ok(Some(snapshot))
    }

    pub async fn remove(&self, context_id: &str) -> Result<()> {
        self.backend.remove(context_id).await
    }

    /// Delete expired and foreign-schema entries; returns how many went.
    pub async fn prune_expired(&self) -> Result<usize> {
        let mut removed = 0;
        for meta in self.backend.list().await? {
            if meta.schema_version != SNAPSHOT_SCHEMA_VERSION || self.is_expired(meta.captured_at) {
                self.backend.remove(&meta.context_id).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(removed, "Pruned snapshots");
        }
        Ok(removed)
    }

    /// Run [`prune_expired`](Self::prune_expired) every `interval`.
    pub fn spawn_cleanup(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = store.prune_expired().await {
                    tracing::warn!(error = %e, "Snapshot cleanup failed");
                }
            }
        })
    }

    fn is_expired(&self, captured_at: DateTime<Utc>) -> bool {
        // A timestamp in the future counts as fresh
        (Utc::now() - captured_at)
            .to_std()
            .map(|age| age > self.ttl)
            .unwrap_or(false)
    }
}
