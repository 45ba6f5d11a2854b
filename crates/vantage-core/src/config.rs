//! Configuration for the Vantage daemon.

use crate::context::{ContextKind, ContextOptions};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use vantage_workspace::{WatchMode, WatcherOptions};

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Unix socket path for IPC
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Data directory for daemon state
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Root of the local workspace
    #[serde(default = "default_local_root")]
    pub local_root: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// PID file path
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,

    /// Per-context result cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Per-context watcher settings
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Seconds between remote connection health checks
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
}

/// Result cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum cached listings per context
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    /// Seconds a cached listing stays valid
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,

    /// Seconds between expired-entry sweeps
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

/// Watcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Native watcher debounce in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Change flush interval in milliseconds
    #[serde(default = "default_flush_ms")]
    pub flush_ms: u64,

    /// Poll interval for remote roots in milliseconds
    #[serde(default = "default_remote_poll_interval_ms")]
    pub remote_poll_interval_ms: u64,
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/tmp/vantage.sock")
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".vantage")
}

fn default_local_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".claude")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_pid_file() -> PathBuf {
    PathBuf::from("/tmp/vantage.pid")
}

fn default_health_check_interval_secs() -> u64 {
    10
}

fn default_cache_capacity() -> usize {
    200
}

fn default_cache_ttl_secs() -> u64 {
    600
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_flush_ms() -> u64 {
    100
}

fn default_remote_poll_interval_ms() -> u64 {
    2000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            flush_ms: default_flush_ms(),
            remote_poll_interval_ms: default_remote_poll_interval_ms(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            data_dir: default_data_dir(),
            local_root: default_local_root(),
            log_level: default_log_level(),
            pid_file: default_pid_file(),
            cache: CacheConfig::default(),
            watcher: WatcherConfig::default(),
            health_check_interval_secs: default_health_check_interval_secs(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from file, falling back to defaults
    pub fn load() -> Self {
        let config_path = default_data_dir().join("config.yaml");

        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_yaml::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config file: {}", e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config file: {}", e);
                }
            }
        }

        Self::default()
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Path of the persisted daemon state (last context, profiles)
    pub fn state_file(&self) -> PathBuf {
        self.data_dir.join("state.yaml")
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs.max(1))
    }

    /// Ensure data directories exist
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }

    /// Service options for a context of the given kind.
    ///
    /// Remote roots are polled; local roots use native notifications.
    pub fn context_options(&self, kind: ContextKind) -> ContextOptions {
        let mode = match kind {
            ContextKind::Local => WatchMode::Native,
            ContextKind::Remote => {
                WatchMode::Poll(Duration::from_millis(self.watcher.remote_poll_interval_ms))
            }
        };

        ContextOptions {
            cache_capacity: self.cache.capacity,
            cache_ttl: Duration::from_secs(self.cache.ttl_secs),
            cleanup_interval: Duration::from_secs(self.cache.cleanup_interval_secs),
            watcher: WatcherOptions {
                debounce_duration: Duration::from_millis(self.watcher.debounce_ms),
                flush_interval: Duration::from_millis(self.watcher.flush_ms),
                mode,
            },
        }
    }
}
