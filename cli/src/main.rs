//! Junction, a unified MCP gateway.
//!
//! Two subcommands:
//! - `junction serve`: Streamable HTTP MCP endpoint in front of every configured server
//! - `junction stdio`: the same endpoint over this process's stdin/stdout

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use junction::{
    ConfigStore, GatewayMcpServer, GatewaySettings, LifecycleManager, ReloadStrategy,
    default_servers, run_hot_reload, serve_http, serve_stdio,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Junction, a unified MCP gateway for stdio MCP servers.
#[derive(Parser)]
#[command(
    name = "junction",
    version,
    about = "Unified MCP gateway: one endpoint, every configured MCP server under its own prefix"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the gateway as a Streamable HTTP MCP endpoint
    Serve {
        #[command(flatten)]
        gateway: GatewayArgs,
    },
    /// Serve the gateway over STDIO (for desktop MCP clients)
    Stdio {
        #[command(flatten)]
        gateway: GatewayArgs,
    },
}

#[derive(Args)]
struct GatewayArgs {
    /// Path to the mcp.json config file [default: ./mcp.json or <config dir>/junction/mcp.json]
    #[arg(short, long, env = "MCP_CONFIG")]
    config: Option<PathBuf>,
    /// Bind address, also used in list_servers endpoints
    #[arg(long, env = "HOST", default_value = "localhost")]
    host: String,
    /// HTTP port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    port: u16,
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, env = "DEBUG")]
    debug: bool,
    /// Seconds a child has to pass its readiness probe
    #[arg(long, env = "STARTUP_TIMEOUT_SECS", default_value_t = 30)]
    startup_timeout_secs: u64,
    /// Seconds a child has to complete the MCP handshake
    #[arg(long, env = "HANDSHAKE_TIMEOUT_SECS", default_value_t = 30)]
    handshake_timeout_secs: u64,
    /// Per tool call deadline in seconds
    #[arg(long, env = "TOOL_TIMEOUT_SECS", default_value_t = 60)]
    tool_timeout_secs: u64,
    /// Seconds a child gets to exit on shutdown before it is killed
    #[arg(long, env = "SHUTDOWN_GRACE_SECS", default_value_t = 5)]
    shutdown_grace_secs: u64,
    /// Extra wait after a child is ready, in milliseconds
    #[arg(long, env = "SETTLE_DELAY_MS", default_value_t = 0)]
    settle_delay_ms: u64,
    /// How reloads rebuild the mounted set: full or incremental
    #[arg(long, env = "RELOAD_STRATEGY", default_value = "full")]
    reload_strategy: ReloadStrategy,
    /// Reload automatically when the config file changes
    #[arg(long, env = "WATCH", default_value_t = true, action = ArgAction::Set)]
    watch: bool,
}

impl GatewayArgs {
    fn settings(&self) -> GatewaySettings {
        GatewaySettings {
            host: self.host.clone(),
            port: self.port,
            debug: self.debug,
            startup_timeout: Duration::from_secs(self.startup_timeout_secs),
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            call_timeout: Duration::from_secs(self.tool_timeout_secs),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            reload_strategy: self.reload_strategy,
        }
    }
}

enum Transport {
    Http,
    Stdio,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (transport, gateway) = match cli.command {
        Commands::Serve { gateway } => (Transport::Http, gateway),
        Commands::Stdio { gateway } => (Transport::Stdio, gateway),
    };

    // stdout belongs to the stdio transport, logs go to stderr
    let default_level = if gateway.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    print_banner();

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    run(transport, gateway, cancel).await
}

async fn run(transport: Transport, gateway: GatewayArgs, cancel: CancellationToken) -> Result<()> {
    let settings = gateway.settings();
    let config_path = resolve_config(gateway.config.clone());
    tracing::info!(config = %config_path.display(), "using configuration file");

    let store = ConfigStore::new(&config_path)
        .with_fallback(default_servers(|key| std::env::var(key).ok()));
    let lifecycle = Arc::new(LifecycleManager::new(
        store,
        settings.clone(),
        cancel.child_token(),
    ));

    let report = lifecycle
        .setup()
        .await
        .context("failed to set up servers")?;
    for (name, reason) in &report.failed {
        tracing::warn!(server = %name, %reason, "server not mounted");
    }

    let server = GatewayMcpServer::new(lifecycle.clone());

    if gateway.watch {
        tokio::spawn(run_hot_reload(
            config_path.clone(),
            server.clone(),
            cancel.child_token(),
        ));
    }

    let served = match transport {
        Transport::Http => serve_http(server, &settings.host, settings.port, cancel.clone())
            .await
            .with_context(|| format!("HTTP server on {}:{} failed", settings.host, settings.port)),
        Transport::Stdio => serve_stdio(server, cancel.clone())
            .await
            .context("stdio transport failed"),
    };

    cancel.cancel();
    lifecycle.shutdown().await;
    tracing::info!("Junction stopped");
    served
}

/// Cancel the root token on Ctrl-C, or SIGTERM on unix.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to install SIGTERM handler");
                    tokio::signal::ctrl_c().await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        tokio::signal::ctrl_c().await.ok();

        tracing::info!("Shutting down Junction...");
        cancel.cancel();
    });
}

/// Resolve config file path: explicit flag/env → ./mcp.json → <config dir>/junction/mcp.json.
///
/// Falls back to ./mcp.json even when it does not exist; the default server
/// set is used until the file is created.
fn resolve_config(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(path) = explicit {
        return path;
    }

    let local = Path::new("mcp.json");
    if local.exists() {
        return local.to_path_buf();
    }

    if let Some(config_dir) = dirs::config_dir() {
        let user = config_dir.join("junction").join("mcp.json");
        if user.exists() {
            return user;
        }
    }

    local.to_path_buf()
}

/// One-line startup banner on stderr. Skipped when stderr is not a terminal
/// or NO_COLOR is set.
fn print_banner() {
    use std::io::IsTerminal;

    if !std::io::stderr().is_terminal() || std::env::var_os("NO_COLOR").is_some() {
        return;
    }
    eprintln!(
        "\n    \x1b[1;38;2;90;170;200m⟜ junction\x1b[0m \x1b[2mv{}  ·  unified MCP gateway\x1b[0m\n",
        env!("CARGO_PKG_VERSION")
    );
}
