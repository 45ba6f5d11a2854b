//! Client-side configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Unix socket of the daemon
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Directory holding one snapshot file per context
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: PathBuf,

    /// Seconds after which a snapshot is treated as absent
    #[serde(default = "default_snapshot_ttl_secs")]
    pub snapshot_ttl_secs: u64,

    /// Seconds between expired-snapshot sweeps
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_socket_path() -> PathBuf {
    PathBuf::from(vantage_ipc::DEFAULT_SOCKET_PATH)
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".vantage")
}

fn default_snapshot_dir() -> PathBuf {
    default_data_dir().join("snapshots")
}

fn default_snapshot_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_cleanup_interval_secs() -> u64 {
    60 * 60
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            snapshot_dir: default_snapshot_dir(),
            snapshot_ttl_secs: default_snapshot_ttl_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl ClientConfig {
    /// Load `~/.vantage/client.yaml`, falling back to defaults
    pub fn load() -> Self {
        let path = default_data_dir().join("client.yaml");
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_yaml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to parse client config: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read client config: {}", e);
                Self::default()
            }
        }
    }

    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.snapshot_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.snapshot_ttl(), Duration::from_secs(86_400));
        assert!(config.snapshot_dir.ends_with("snapshots"));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: ClientConfig = serde_yaml::from_str("snapshot_ttl_secs: 60\n").unwrap();
        assert_eq!(config.snapshot_ttl_secs, 60);
        assert_eq!(config.cleanup_interval_secs, 3600);
    }
}
