//! Vantage CLI
//!
//! Command-line interface for the Vantage daemon and its workspace contexts.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use vantage_client::{ClientConfig, ClientSnapshotStore, ContextSwitchOrchestrator, IpcBackend};
use vantage_ipc::{
    AuthMethod, ConnectionConfig, ConnectionInfo, ConnectionState, ContextKind, IpcClient,
    PushEvent, Request, Response, ResponseData,
};

#[derive(Parser)]
#[command(name = "vantage")]
#[command(about = "Vantage - switch between local and remote agent workspaces")]
#[command(version)]
struct Cli {
    /// Daemon socket (default from ~/.vantage/client.yaml)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Vantage daemon
    Start {
        /// Run in foreground (for debugging)
        #[arg(short, long)]
        foreground: bool,
    },

    /// Stop the Vantage daemon
    Stop,

    /// Show daemon status
    Status,

    /// Check if daemon is running
    Ping,

    /// List registered contexts
    Contexts,

    /// Print the active context id
    Active,

    /// Make another context active
    Switch {
        /// Context id, e.g. `local` or `remote-<host>`
        context_id: String,
    },

    /// Connect to a remote workspace and make it active
    Connect {
        #[command(flatten)]
        remote: RemoteArgs,
    },

    /// Drop the remote connection
    Disconnect,

    /// Check that a remote workspace is reachable without connecting
    Test {
        #[command(flatten)]
        remote: RemoteArgs,
    },

    /// List projects in the active context
    Projects,

    /// List sessions of a project in the active context
    Sessions { project_id: String },

    /// Print push events until interrupted
    Watch,
}

#[derive(clap::Args)]
struct RemoteArgs {
    host: String,

    #[arg(short, long, default_value_t = 22)]
    port: u16,

    #[arg(short, long, default_value = "")]
    user: String,

    #[arg(long, value_enum, default_value_t = AuthArg::Agent)]
    auth: AuthArg,

    /// Keychain entry or key file the daemon resolves to a secret
    #[arg(long)]
    credentials: Option<String>,

    /// Local mount point of the remote filesystem
    #[arg(short, long)]
    mount: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum AuthArg {
    Agent,
    Key,
    Password,
}

impl From<RemoteArgs> for ConnectionConfig {
    fn from(args: RemoteArgs) -> Self {
        Self {
            host: args.host,
            port: args.port,
            username: args.user,
            auth_method: match args.auth {
                AuthArg::Agent => AuthMethod::Agent,
                AuthArg::Key => AuthMethod::PrivateKey,
                AuthArg::Password => AuthMethod::Password,
            },
            credentials_ref: args.credentials,
            mount_path: args.mount,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Simple logging for CLI
    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();

    let mut config = ClientConfig::load();
    if let Some(socket) = cli.socket {
        config.socket_path = socket;
    }
    let client = IpcClient::with_socket_path(&config.socket_path);

    match cli.command {
        Commands::Start { foreground } => cmd_start(&client, foreground).await,
        Commands::Stop => cmd_stop(&client).await,
        Commands::Status => cmd_status(&client).await,
        Commands::Ping => cmd_ping(&client).await,
        Commands::Contexts => cmd_contexts(&client).await,
        Commands::Active => cmd_active(&client).await,
        Commands::Switch { context_id } => cmd_switch(&config, client, &context_id).await,
        Commands::Connect { remote } => cmd_connect(&client, remote.into()).await,
        Commands::Disconnect => cmd_disconnect(&client).await,
        Commands::Test { remote } => cmd_test(&client, remote.into()).await,
        Commands::Projects => cmd_projects(&client).await,
        Commands::Sessions { project_id } => cmd_sessions(&client, &project_id).await,
        Commands::Watch => cmd_watch(&config, client).await,
    }
}

fn ensure_running(client: &IpcClient) -> Result<()> {
    if !client.is_daemon_running() {
        anyhow::bail!("Vantage daemon is not running. Start with: vantage start");
    }
    Ok(())
}

async fn cmd_start(client: &IpcClient, foreground: bool) -> Result<()> {
    if foreground {
        println!("Starting Vantage daemon in foreground...");
        println!("Press Ctrl+C to stop.");

        let status = std::process::Command::new("vantage-daemon")
            .status()
            .context("Failed to start daemon. Is vantage-daemon in PATH?")?;

        if !status.success() {
            anyhow::bail!("Daemon exited with error");
        }
        return Ok(());
    }

    if client.is_daemon_running() {
        println!("Vantage daemon is already running.");
        return Ok(());
    }

    // Try launchctl on macOS
    #[cfg(target_os = "macos")]
    {
        if let Some(home) = dirs::home_dir() {
            let plist_path = home.join("Library/LaunchAgents/com.vantage.daemon.plist");
            if plist_path.exists() {
                let status = std::process::Command::new("launchctl")
                    .args(["load", "-w"])
                    .arg(&plist_path)
                    .status()?;

                if status.success() {
                    println!("✓ Vantage daemon started via launchctl");
                    return Ok(());
                }
            }
        }
    }

    // Fallback: start in background
    let child = std::process::Command::new("vantage-daemon")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .context("Failed to start daemon")?;

    println!("✓ Vantage daemon started (PID: {})", child.id());
    Ok(())
}

async fn cmd_stop(client: &IpcClient) -> Result<()> {
    if !client.is_daemon_running() {
        println!("Vantage daemon is not running.");
        return Ok(());
    }

    match client.request(Request::Shutdown).await {
        Ok(Response::Ack) => {
            println!("✓ Vantage daemon stopping...");

            // Wait a moment for cleanup
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;

            if !client.is_daemon_running() {
                println!("✓ Daemon stopped.");
            }
        }
        Ok(resp) => {
            println!("Unexpected response: {:?}", resp);
        }
        Err(e) => {
            println!("Failed to stop daemon: {}", e);
        }
    }

    Ok(())
}

async fn cmd_status(client: &IpcClient) -> Result<()> {
    if !client.is_daemon_running() {
        println!("Vantage daemon is not running.");
        println!("\nStart with: vantage start");
        return Ok(());
    }

    match client.get_status().await {
        Ok(ResponseData::Status {
            version,
            uptime_secs,
            contexts,
            active_context_id,
            connection,
            requests_total,
            cache_hit_rate,
        }) => {
            println!("Vantage Daemon v{}", version);
            println!();
            println!("  Status:     Running");
            println!("  Uptime:     {}", format_duration(uptime_secs));
            println!("  Contexts:   {}", contexts);
            println!("  Active:     {}", active_context_id);
            println!("  Remote:     {}", state_label(connection));
            println!();
            println!("  Requests:   {}", requests_total);
            println!("  Cache Hit:  {:.1}%", cache_hit_rate * 100.0);
        }
        Ok(_) => {
            println!("Unexpected status response");
        }
        Err(e) => {
            println!("Failed to get status: {}", e);
        }
    }

    Ok(())
}

async fn cmd_ping(client: &IpcClient) -> Result<()> {
    if !client.is_daemon_running() {
        println!("✗ Daemon not running");
        return Ok(());
    }

    let start = std::time::Instant::now();
    match client.request(Request::Ping).await {
        Ok(Response::Ok {
            data: Some(ResponseData::Pong { .. }),
        }) => {
            let elapsed = start.elapsed();
            println!("✓ Pong! ({:.2}ms)", elapsed.as_secs_f64() * 1000.0);
        }
        Ok(_) => {
            println!("✗ Unexpected response");
        }
        Err(e) => {
            println!("✗ Error: {}", e);
        }
    }

    Ok(())
}

async fn cmd_contexts(client: &IpcClient) -> Result<()> {
    ensure_running(client)?;

    let active = client.active_context().await?;
    for entry in client.list_contexts().await? {
        let marker = if entry.id == active { "*" } else { " " };
        let kind = match entry.kind {
            ContextKind::Local => "local",
            ContextKind::Remote => "remote",
        };
        println!("{} {:<30} {}", marker, entry.id, kind);
    }
    Ok(())
}

async fn cmd_active(client: &IpcClient) -> Result<()> {
    ensure_running(client)?;
    println!("{}", client.active_context().await?);
    Ok(())
}

/// Switch through the orchestrator so the view snapshots stay current.
async fn cmd_switch(config: &ClientConfig, client: IpcClient, context_id: &str) -> Result<()> {
    ensure_running(&client)?;

    let backend = Arc::new(IpcBackend::new(client));
    let store = Arc::new(ClientSnapshotStore::from_config(config));
    let orchestrator = ContextSwitchOrchestrator::attach(backend, store).await?;
    orchestrator.settle().await;

    match orchestrator.switch(context_id).await {
        Ok(Some(outcome)) => {
            orchestrator.settle().await;
            orchestrator.persist().await?;
            let view = orchestrator.view();
            println!(
                "✓ Switched {} → {} ({} projects{})",
                outcome.previous_context_id,
                outcome.context_id,
                view.projects.len(),
                if outcome.had_snapshot {
                    ", restored view"
                } else {
                    ""
                }
            );
        }
        Ok(None) => println!("{} is already active.", context_id),
        Err(e) => {
            println!("✗ Switch failed: {}", e.user_message());
        }
    }
    Ok(())
}

async fn cmd_connect(client: &IpcClient, config: ConnectionConfig) -> Result<()> {
    ensure_running(client)?;

    let host = config.host.clone();
    println!("Connecting to {}...", host);
    match client.connect_remote(config).await {
        Ok(info) => print_connection(&info),
        Err(e) => println!("✗ Failed to connect to {}: {}", host, e),
    }
    Ok(())
}

async fn cmd_disconnect(client: &IpcClient) -> Result<()> {
    ensure_running(client)?;

    match client.disconnect_remote().await {
        Ok(info) => print_connection(&info),
        Err(e) => println!("✗ Failed to disconnect: {}", e),
    }
    Ok(())
}

async fn cmd_test(client: &IpcClient, config: ConnectionConfig) -> Result<()> {
    ensure_running(client)?;

    let target = format!("{}:{}", config.host, config.port);
    match client.test_connection(config).await? {
        Ok(()) => println!("✓ {} is reachable", target),
        Err(reason) => println!("✗ {}: {}", target, reason),
    }
    Ok(())
}

async fn cmd_projects(client: &IpcClient) -> Result<()> {
    ensure_running(client)?;

    let projects = client.list_projects().await?;
    if projects.is_empty() {
        println!("No projects in the active context.");
    }
    for project in projects {
        println!("{:<50} {:>5} sessions", project.id, project.session_count);
    }
    Ok(())
}

async fn cmd_sessions(client: &IpcClient, project_id: &str) -> Result<()> {
    ensure_running(client)?;

    for session in client.list_sessions(project_id).await? {
        println!("{:<40} {:>10} bytes", session.id, session.size);
    }
    Ok(())
}

/// Stream push events, keeping the local view in step with the daemon.
async fn cmd_watch(config: &ClientConfig, client: IpcClient) -> Result<()> {
    ensure_running(&client)?;

    let mut events = client.subscribe().await.context("Failed to subscribe")?;
    let backend = Arc::new(IpcBackend::new(client));
    let store = Arc::new(ClientSnapshotStore::from_config(config));
    let orchestrator = ContextSwitchOrchestrator::attach(backend, store.clone()).await?;
    let cleanup = store.spawn_cleanup(config.cleanup_interval());

    println!(
        "Watching {} (Ctrl+C to stop)",
        orchestrator.active_context_id()
    );

    loop {
        let event = tokio::select! {
            event = events.next() => event?,
            _ = tokio::signal::ctrl_c() => break,
        };
        let Some(event) = event else {
            println!("Daemon closed the stream.");
            break;
        };

        print_event(&event);
        if let Some(outcome) = orchestrator.handle_push_event(&event).await {
            println!("  view now follows {}", outcome.context_id);
        }
    }

    cleanup.abort();
    orchestrator.settle().await;
    orchestrator.persist().await?;
    Ok(())
}

fn print_event(event: &PushEvent) {
    match event {
        PushEvent::FileChange {
            context_id,
            path,
            change_type,
            ..
        } => println!("[{}] {:?} {}", context_id, change_type, path.display()),
        PushEvent::TodoChange {
            context_id,
            path,
            change_type,
            ..
        } => println!("[{}] todo {:?} {}", context_id, change_type, path.display()),
        PushEvent::ContextChanged { context_id, .. } => {
            println!("Active context changed to {}", context_id)
        }
    }
}

fn print_connection(info: &ConnectionInfo) {
    match (&info.state, &info.host) {
        (ConnectionState::Connected, Some(host)) => {
            println!("✓ Connected to {}", host);
            if let Some(root) = &info.remote_root_path {
                println!("  Root: {}", root.display());
            }
        }
        (ConnectionState::Disconnected, _) => println!("✓ Disconnected"),
        (state, host) => {
            println!(
                "{} {}",
                state_label(*state),
                host.as_deref().unwrap_or("-")
            );
        }
    }
    if let Some(error) = &info.error {
        println!("  Error: {}", error);
    }
}

fn state_label(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Disconnected => "disconnected",
        ConnectionState::Connecting => "connecting",
        ConnectionState::Connected => "connected",
        ConnectionState::Error => "error",
    }
}

fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}
