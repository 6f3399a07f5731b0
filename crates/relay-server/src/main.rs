//! relay-server: broadcast chat relay.
//!
//! Accepts WebSocket connections and relays every text message a client sends
//! to all connected clients, echoing it back to the sender with a prefix.

mod config;
mod limit;
mod server;
mod transport;

use clap::Parser;
use config::{CliOverrides, ServerConfig};
use server::RelayServer;
use std::path::PathBuf;
use tracing::{error, info};

/// relay-server — broadcast chat relay over WebSocket
#[derive(Parser, Debug)]
#[command(name = "relay-server", version, about = "Broadcast chat relay over WebSocket")]
struct Cli {
    /// Bind address [default: localhost]
    #[arg(long)]
    host: Option<String>,

    /// Listen port [default: 8080]
    #[arg(short, long)]
    port: Option<u16>,

    /// Config file path
    #[arg(long, default_value = "~/.chatrelay/config.toml")]
    config: String,

    /// Close clients idle for this many seconds (0 disables)
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Prefix for messages echoed back to their sender [default: "You: "]
    #[arg(long)]
    echo_prefix: Option<String>,

    /// Maximum concurrent clients (0 = unlimited)
    #[arg(long)]
    max_connections: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting relay-server");

    let config_path = PathBuf::from(&cli.config);
    let overrides = CliOverrides {
        host: cli.host,
        port: cli.port,
        idle_timeout: cli.idle_timeout,
        echo_prefix: cli.echo_prefix,
        max_connections: cli.max_connections,
    };
    let server_config = match ServerConfig::load(Some(&config_path), overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let bound = match RelayServer::new(server_config).bind().await {
        Ok(b) => b,
        Err(e) => {
            error!(error = %e, "failed to bind listener");
            std::process::exit(1);
        }
    };
    let hub = bound.hub();

    tokio::select! {
        result = bound.run() => {
            if let Err(e) = result {
                error!(error = %e, "server error");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
            server::shutdown(&hub).await;
        }
    }

    info!("relay-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
