//! WebSocket Game Server
//!
//! Binds the listening port, performs WebSocket handshakes and hands every
//! accepted connection to the session coordinator.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, broadcast};
use tokio::time::timeout;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tracing::{info, warn, error, debug, instrument};

use crate::DEFAULT_PORT;
use crate::network::connection::{spawn_websocket, ConnectionConfig, ConnectionId};
use crate::network::session::{Admit, SessionConfig, SessionCoordinator};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Time allowed for the WebSocket handshake.
    pub handshake_timeout: Duration,
    /// Per-connection settings.
    pub connection: ConnectionConfig,
    /// Pairing and match settings.
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_connections: 1000,
            handshake_timeout: Duration::from_secs(10),
            connection: ConnectionConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `CHESS_*` environment variables.
    ///
    /// Unparseable values fall back to the default, as do zero match
    /// capacity and zero write timeout.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        let host = env_parse("CHESS_HOST").unwrap_or(config.bind_addr.ip());
        let port = env_parse("CHESS_PORT").unwrap_or(config.bind_addr.port());
        config.bind_addr = SocketAddr::new(host, port);

        if let Some(max) = env_parse("CHESS_MAX_CONNECTIONS") {
            config.max_connections = max;
        }
        if let Some(max) = env_parse("CHESS_MAX_MATCHES").filter(|max: &usize| *max > 0) {
            config.session.max_matches = max;
        }
        if let Some(secs) = env_parse("CHESS_RECONNECT_GRACE_SECS") {
            config.session.match_config.reconnect_grace = Duration::from_secs(secs);
        }
        if let Some(millis) = env_parse("CHESS_WRITE_TIMEOUT_MS").filter(|millis: &u64| *millis > 0) {
            config.connection.write_timeout = Duration::from_millis(millis);
        }

        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Could not bind the listening address.
    #[error("Port unavailable: cannot bind {addr}: {source}")]
    PortUnavailable {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying bind error.
        #[source]
        source: std::io::Error,
    },

    /// Socket error after binding.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket handshake failed.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Client did not complete the handshake in time.
    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Cloneable trigger for a graceful shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    /// Stop accepting, notify every match and return from `run`.
    pub fn shutdown(&self) {
        let _ = self.tx.send(());
    }
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Bound listener.
    listener: TcpListener,
    /// Live connection count.
    connections: Arc<AtomicUsize>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Bind the listening socket.
    ///
    /// Fails with [`GameServerError::PortUnavailable`] before any
    /// connection is accepted.
    pub async fn bind(config: ServerConfig) -> Result<Self, GameServerError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|source| GameServerError::PortUnavailable {
                addr: config.bind_addr,
                source,
            })?;
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            listener,
            connections: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        })
    }

    /// Address actually bound (resolves port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, GameServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle for triggering shutdown from another task.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Run the server until shutdown.
    #[instrument(skip(self), fields(addr = %self.config.bind_addr))]
    pub async fn run(self) -> Result<(), GameServerError> {
        info!("Game server listening on {}", self.local_addr()?);

        let (admit_tx, admit_rx) = mpsc::channel::<Admit>(64);
        let coordinator = SessionCoordinator::new(self.config.session.clone());
        let coordinator_task = tokio::spawn(coordinator.run(admit_rx, self.shutdown_tx.subscribe()));

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut next_id = 1u64;

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.connection_count() >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            let id = ConnectionId(next_id);
                            next_id += 1;
                            info!("New connection from {} ({})", addr, id);
                            self.handle_connection(stream, addr, id, admit_tx.clone());
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        drop(admit_tx);
        coordinator_task
            .await
            .map_err(|e| GameServerError::Internal(format!("session coordinator failed: {}", e)))?;
        info!("Game server stopped");
        Ok(())
    }

    /// Handshake a new connection and submit it for admission.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr, id: ConnectionId, admit: mpsc::Sender<Admit>) {
        let connections = self.connections.clone();
        let connection_config = self.config.connection.clone();
        let handshake_timeout = self.config.handshake_timeout;

        connections.fetch_add(1, Ordering::Relaxed);

        tokio::spawn(async move {
            let (ws_stream, rejoin) = match handshake(stream, handshake_timeout).await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Handshake with {} failed: {}", addr, e);
                    connections.fetch_sub(1, Ordering::Relaxed);
                    return;
                }
            };

            let handle = spawn_websocket(ws_stream, id, &connection_config);
            let closed = handle.close_signal();

            if admit.send(Admit { handle, rejoin }).await.is_err() {
                debug!("{}: server stopping, connection dropped", id);
            }

            closed.await;
            connections.fetch_sub(1, Ordering::Relaxed);
            debug!("Client {} ({}) cleaned up", addr, id);
        });
    }
}

/// Upgrade a TCP stream, capturing any `?rejoin=` token from the request URI.
async fn handshake(
    stream: TcpStream,
    limit: Duration,
) -> Result<(WebSocketStream<TcpStream>, Option<String>), GameServerError> {
    let mut rejoin = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        rejoin = rejoin_token(request.uri().query());
        Ok(response)
    };

    let ws_stream = timeout(limit, accept_hdr_async(stream, callback))
        .await
        .map_err(|_| GameServerError::HandshakeTimeout(limit))??;
    Ok((ws_stream, rejoin))
}

/// Extract `rejoin=<token>` from a handshake query string.
fn rejoin_token(query: Option<&str>) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, value)| *key == "rejoin" && !value.is_empty())
        .map(|(_, value)| value.to_string())
}
