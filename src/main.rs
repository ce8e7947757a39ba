//! Chess Sync Server
//!
//! Authoritative two-player chess server over WebSocket.
//!
//! Configuration comes from `CHESS_*` environment variables, overridden by
//! command-line flags. Log level is controlled by `RUST_LOG` (default `info`).

use std::net::IpAddr;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, error};
use tracing_subscriber::EnvFilter;

use chess_sync::{GameServer, ServerConfig, VERSION};

/// Authoritative two-player chess server.
#[derive(Debug, Parser)]
#[command(name = "chess-sync-server", version)]
struct Cli {
    /// Interface to bind (e.g. 0.0.0.0 or 127.0.0.1).
    #[arg(long, env = "CHESS_HOST")]
    host: Option<IpAddr>,

    /// Listening port.
    #[arg(long, short, env = "CHESS_PORT")]
    port: Option<u16>,

    /// Concurrent matches before new connections get "game_full".
    #[arg(long, env = "CHESS_MAX_MATCHES")]
    max_matches: Option<usize>,

    /// Seconds a disconnected player may take to rejoin (0 disables rejoin).
    #[arg(long, env = "CHESS_RECONNECT_GRACE_SECS")]
    reconnect_grace_secs: Option<u64>,

    /// Per-frame write timeout in milliseconds.
    #[arg(long, env = "CHESS_WRITE_TIMEOUT_MS")]
    write_timeout_ms: Option<u64>,

    /// Maximum concurrent connections.
    #[arg(long, env = "CHESS_MAX_CONNECTIONS")]
    max_connections: Option<usize>,
}

impl Cli {
    /// Apply flags on top of the environment/default configuration.
    fn into_server_config(self) -> anyhow::Result<ServerConfig> {
        let mut config = ServerConfig::from_env();

        if let Some(host) = self.host {
            config.bind_addr.set_ip(host);
        }
        if let Some(port) = self.port {
            config.bind_addr.set_port(port);
        }
        if let Some(max) = self.max_matches {
            anyhow::ensure!(max > 0, "--max-matches must be at least 1");
            config.session.max_matches = max;
        }
        if let Some(secs) = self.reconnect_grace_secs {
            config.session.match_config.reconnect_grace = Duration::from_secs(secs);
        }
        if let Some(millis) = self.write_timeout_ms {
            anyhow::ensure!(millis > 0, "--write-timeout-ms must be positive");
            config.connection.write_timeout = Duration::from_millis(millis);
        }
        if let Some(max) = self.max_connections {
            config.max_connections = max;
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_server_config()?;

    info!("Chess Sync Server v{}", VERSION);
    info!(
        "Max matches: {}, reconnect grace: {:?}",
        config.session.max_matches, config.session.match_config.reconnect_grace
    );

    let server = GameServer::bind(config)
        .await
        .context("failed to start server")?;

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down");
                shutdown.shutdown();
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    server.run().await.context("server failed")?;
    Ok(())
}
