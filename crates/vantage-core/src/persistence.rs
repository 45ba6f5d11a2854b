//! Persisted side-channel state: last active context and remote profiles.
//!
//! The registry never persists anything itself; the daemon writes through
//! a [`ConfigStore`] after successful switches and connects.

use crate::remote::{AuthMethod, RemoteConfig};
use crate::ContextError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// A saved remote connection. Never holds a password or other secret.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteProfile {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth_method: AuthMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_connected_at: Option<DateTime<Utc>>,
}

impl RemoteProfile {
    /// Rebuild a connection config. Credentials are resolved by the transport.
    pub fn to_config(&self) -> RemoteConfig {
        RemoteConfig {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            auth_method: self.auth_method,
            credentials_ref: None,
            mount_path: self.mount_path.clone(),
        }
    }
}

impl From<&RemoteConfig> for RemoteProfile {
    fn from(config: &RemoteConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            auth_method: config.auth_method,
            mount_path: config.mount_path.clone(),
            last_connected_at: Some(Utc::now()),
        }
    }
}

/// Narrow persistence interface used by the daemon.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn last_active_context(&self) -> Result<Option<String>, ContextError>;

    async fn set_last_active_context(&self, id: &str) -> Result<(), ContextError>;

    async fn profiles(&self) -> Result<Vec<RemoteProfile>, ContextError>;

    /// Insert or replace the profile for `profile.host`.
    async fn save_profile(&self, profile: RemoteProfile) -> Result<(), ContextError>;

    async fn profile(&self, host: &str) -> Result<Option<RemoteProfile>, ContextError> {
        Ok(self.profiles().await?.into_iter().find(|p| p.host == host))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
struct PersistedState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_active_context: Option<String>,
    #[serde(default)]
    profiles: Vec<RemoteProfile>,
}

impl PersistedState {
    fn upsert(&mut self, profile: RemoteProfile) {
        match self.profiles.iter_mut().find(|p| p.host == profile.host) {
            Some(existing) => *existing = profile,
            None => self.profiles.push(profile),
        }
    }
}

/// [`ConfigStore`] backed by one YAML file.
pub struct YamlConfigStore {
    path: PathBuf,
    state: Mutex<PersistedState>,
}

impl YamlConfigStore {
    /// Open the store, starting empty if the file is missing or unreadable.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_yaml::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!(path = ?path, error = %e, "Ignoring unreadable state file");
                PersistedState::default()
            }),
            Err(_) => PersistedState::default(),
        };

        Self {
            path,
            state: Mutex::new(state),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write(&self, state: &PersistedState) -> Result<(), ContextError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write to a sibling then rename so readers never see a partial file
        let content = serde_yaml::to_string(state)?;
        let tmp = self.path.with_extension("yaml.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for YamlConfigStore {
    async fn last_active_context(&self) -> Result<Option<String>, ContextError> {
        Ok(self.state.lock().await.last_active_context.clone())
    }

    async fn set_last_active_context(&self, id: &str) -> Result<(), ContextError> {
        let mut state = self.state.lock().await;
        state.last_active_context = Some(id.to_string());
        self.write(&state).await
    }

    async fn profiles(&self) -> Result<Vec<RemoteProfile>, ContextError> {
        Ok(self.state.lock().await.profiles.clone())
    }

    async fn save_profile(&self, profile: RemoteProfile) -> Result<(), ContextError> {
        let mut state = self.state.lock().await;
        state.upsert(profile);
        self.write(&state).await
    }
}

/// In-memory [`ConfigStore`], for tests and ephemeral daemons.
#[derive(Default)]
pub struct MemoryConfigStore {
    state: Mutex<PersistedState>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn last_active_context(&self) -> Result<Option<String>, ContextError> {
        Ok(self.state.lock().await.last_active_context.clone())
    }

    async fn set_last_active_context(&self, id: &str) -> Result<(), ContextError> {
        self.state.lock().await.last_active_context = Some(id.to_string());
        Ok(())
    }

    async fn profiles(&self) -> Result<Vec<RemoteProfile>, ContextError> {
        Ok(self.state.lock().await.profiles.clone())
    }

    async fn save_profile(&self, profile: RemoteProfile) -> Result<(), ContextError> {
        self.state.lock().await.upsert(profile);
        Ok(())
    }
}
