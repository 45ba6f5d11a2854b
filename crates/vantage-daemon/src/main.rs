//! Vantage Daemon
//!
//! Background process that owns the workspace contexts and serves the
//! control channel.

mod daemon;
mod forwarder;
mod handler;
mod signals;
mod transport;

use anyhow::Result;
use tracing_subscriber::EnvFilter;
use vantage_core::DaemonConfig;

pub use daemon::Daemon;

/// Run the daemon
pub async fn run(config: DaemonConfig) -> Result<()> {
    let daemon = Daemon::with_config(config)?;
    daemon.run().await
}

fn main() -> Result<()> {
    let config = DaemonConfig::load();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_target(false)
        .init();

    tracing::info!("Starting Vantage daemon v{}", env!("CARGO_PKG_VERSION"));

    // Run async runtime
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(config))
}
