//! Connection Handles
//!
//! One [`ConnectionHandle`] per participant: an ordered inbound stream of
//! decoded frames plus an outbound text-frame queue. Two transports feed a
//! handle: a WebSocket (reader and writer task per connection) and an
//! in-memory [`MemoryPeer`] with the same semantics.
//!
//! Every inbound frame is stamped with a process-wide arrival sequence at
//! the moment it enters the handle's inbound queue. Match controllers use it
//! to order frames from the two players; a frame waiting on a full queue
//! takes its number only once there is room.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::game::piece::Side;
use crate::network::codec::{self, DecodeError};
use crate::network::protocol::{ClientMessage, ServerMessage};

// =============================================================================
// IDENTIFIERS
// =============================================================================

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Next global arrival sequence number.
pub fn next_sequence() -> u64 {
    NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

/// Connection ordinal, assigned at accept time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Public player id (`player_<ordinal>`).
    pub fn player_id(self) -> String {
        format!("player_{}", self.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// The remote end is gone (or the handle was closed locally).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("connection closed")]
pub struct ConnectionClosed;

// =============================================================================
// LIVENESS
// =============================================================================

/// Connection liveness.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Liveness {
    /// Frames flow both ways.
    Connected,
    /// Terminal.
    Disconnected,
}

/// Liveness shared between a handle and its transport tasks.
#[derive(Debug)]
struct Link {
    state: watch::Sender<Liveness>,
}

impl Link {
    fn new() -> Arc<Self> {
        let (state, _) = watch::channel(Liveness::Connected);
        Arc::new(Self { state })
    }

    fn is_connected(&self) -> bool {
        *self.state.borrow() == Liveness::Connected
    }

    /// Flip to disconnected. True only for the call that made the change.
    fn mark_disconnected(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == Liveness::Connected {
                *state = Liveness::Disconnected;
                true
            } else {
                false
            }
        })
    }

    async fn closed(&self) {
        let mut rx = self.state.subscribe();
        // Sender is owned by self, so wait_for cannot fail while we borrow it.
        let _ = rx.wait_for(|state| *state == Liveness::Disconnected).await;
    }
}

// =============================================================================
// ENVELOPE
// =============================================================================

/// One inbound frame, stamped when queued.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Global arrival sequence (0 until queued).
    pub seq: u64,
    /// Frame text (lossy for non-UTF-8 binary frames).
    pub raw: String,
    /// Decode result.
    pub message: Result<ClientMessage, DecodeError>,
}

impl Envelope {
    /// Decode a text frame.
    pub fn from_text(raw: String) -> Self {
        let message = codec::decode(raw.as_bytes());
        Self { seq: 0, raw, message }
    }

    /// Decode a binary frame.
    pub fn from_bytes(data: &[u8]) -> Self {
        let message = codec::decode(data);
        let raw = String::from_utf8_lossy(data).into_owned();
        Self { seq: 0, raw, message }
    }

    /// The request as JSON, for echoing back in an error.
    pub fn request_echo(&self) -> Option<Value> {
        serde_json::from_str(&self.raw).ok()
    }
}

// =============================================================================
// CONFIG
// =============================================================================

/// Per-connection settings.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Upper bound on a single outbound write.
    pub write_timeout: Duration,
    /// Inbound frames buffered before the reader waits.
    pub inbound_capacity: usize,
    /// Outbound frames buffered before `send` waits.
    pub outbound_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(5),
            inbound_capacity: 64,
            outbound_capacity: 64,
        }
    }
}

// =============================================================================
// HANDLE
// =============================================================================

/// Duplex message channel to one participant.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    side: Option<Side>,
    rejoin_token: Option<Uuid>,
    inbound: mpsc::Receiver<Envelope>,
    outbound: mpsc::Sender<String>,
    link: Arc<Link>,
    write_timeout: Duration,
}

impl ConnectionHandle {
    fn new(
        id: ConnectionId,
        inbound: mpsc::Receiver<Envelope>,
        outbound: mpsc::Sender<String>,
        link: Arc<Link>,
        write_timeout: Duration,
    ) -> Self {
        Self {
            id,
            side: None,
            rejoin_token: None,
            inbound,
            outbound,
            link,
            write_timeout,
        }
    }

    /// Connection ordinal.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Public player id.
    pub fn player_id(&self) -> String {
        self.id.player_id()
    }

    /// Assigned side, once paired.
    pub fn side(&self) -> Option<Side> {
        self.side
    }

    /// Fix the side. A side, once assigned, is never reassigned.
    pub fn assign_side(&mut self, side: Side) -> Side {
        *self.side.get_or_insert(side)
    }

    /// Rejoin token, if reconnection is enabled.
    pub fn rejoin_token(&self) -> Option<Uuid> {
        self.rejoin_token
    }

    /// Attach a rejoin token.
    pub fn set_rejoin_token(&mut self, token: Uuid) {
        self.rejoin_token = Some(token);
    }

    /// Is the connection still up?
    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Encode and send a message.
    pub async fn send(&self, message: &ServerMessage) -> Result<(), ConnectionClosed> {
        self.send_frame(codec::encode(message)).await
    }

    /// Queue an already-encoded frame.
    ///
    /// A frame that cannot be queued within the write timeout marks the
    /// connection disconnected.
    pub async fn send_frame(&self, frame: String) -> Result<(), ConnectionClosed> {
        if !self.is_connected() {
            return Err(ConnectionClosed);
        }

        match timeout(self.write_timeout, self.outbound.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => {
                self.link.mark_disconnected();
                Err(ConnectionClosed)
            }
            Err(_) => {
                warn!("{}: send timed out after {:?}", self.id, self.write_timeout);
                self.link.mark_disconnected();
                Err(ConnectionClosed)
            }
        }
    }

    /// Next inbound frame.
    ///
    /// Frames already buffered are returned even if the remote has gone;
    /// once the buffer is empty a closed connection yields `ConnectionClosed`.
    pub async fn receive(&mut self) -> Result<Envelope, ConnectionClosed> {
        tokio::select! {
            biased;
            envelope = self.inbound.recv() => envelope.ok_or(ConnectionClosed),
            _ = self.link.closed() => Err(ConnectionClosed),
        }
    }

    /// Next inbound frame, if one is already buffered.
    pub fn try_receive(&mut self) -> Option<Envelope> {
        self.inbound.try_recv().ok()
    }

    /// Wait until the connection is disconnected.
    pub async fn closed(&self) {
        self.link.closed().await
    }

    /// Future that resolves on disconnect and outlives the handle.
    pub fn close_signal(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let link = self.link.clone();
        async move { link.closed().await }
    }

    /// Close the connection. Queued frames are still flushed.
    pub fn close(&self) {
        if self.link.mark_disconnected() {
            debug!("{}: closed locally", self.id);
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.link.mark_disconnected();
    }
}

// =============================================================================
// WEBSOCKET TRANSPORT
// =============================================================================

/// Split a WebSocket into reader and writer tasks behind a handle.
pub fn spawn_websocket<S>(
    ws: WebSocketStream<S>,
    id: ConnectionId,
    config: &ConnectionConfig,
) -> ConnectionHandle
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws.split();
    let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity);
    let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity);
    let link = Link::new();

    tokio::spawn(read_loop(stream, inbound_tx, link.clone(), id));
    tokio::spawn(write_loop(sink, outbound_rx, link.clone(), id, config.write_timeout));

    ConnectionHandle::new(id, inbound_rx, outbound_tx, link, config.write_timeout)
}

/// Wait for queue space, then stamp and queue the frame.
async fn enqueue(inbound: &mpsc::Sender<Envelope>, mut envelope: Envelope) -> Result<(), ConnectionClosed> {
    let permit = inbound.reserve().await.map_err(|_| ConnectionClosed)?;
    envelope.seq = next_sequence();
    permit.send(envelope);
    Ok(())
}

async fn read_loop<S>(
    mut stream: S,
    inbound: mpsc::Sender<Envelope>,
    link: Arc<Link>,
    id: ConnectionId,
)
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let next = tokio::select! {
            next = stream.next() => next,
            _ = link.closed() => break,
        };

        let envelope = match next {
            Some(Ok(Message::Text(text))) => Envelope::from_text(text),
            Some(Ok(Message::Binary(data))) => Envelope::from_bytes(&data),
            Some(Ok(Message::Close(_))) | None => {
                debug!("{}: remote closed", id);
                break;
            }
            // Ping/pong are answered by tungstenite.
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!("{}: read error: {}", id, e);
                break;
            }
        };

        tokio::select! {
            queued = enqueue(&inbound, envelope) => {
                if queued.is_err() {
                    break;
                }
            }
            _ = link.closed() => break,
        }
    }

    link.mark_disconnected();
}

async fn write_loop<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<String>,
    link: Arc<Link>,
    id: ConnectionId,
    write_timeout: Duration,
)
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        // Drain what is queued before honouring a close.
        let frame = tokio::select! {
            biased;
            frame = outbound.recv() => frame,
            _ = link.closed() => None,
        };
        let Some(text) = frame else { break };

        match timeout(write_timeout, sink.send(Message::Text(text))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("{}: write error: {}", id, e);
                link.mark_disconnected();
                return;
            }
            Err(_) => {
                warn!("{}: write timed out after {:?}", id, write_timeout);
                link.mark_disconnected();
                return;
            }
        }
    }

    link.mark_disconnected();
    let _ = timeout(write_timeout, sink.close()).await;
}

// =============================================================================
// IN-MEMORY TRANSPORT
// =============================================================================

/// Remote end of an in-memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    inbound: mpsc::Sender<Envelope>,
    outbound: mpsc::Receiver<String>,
    link: Arc<Link>,
}

/// Create a connected handle and its in-memory peer.
pub fn memory_pair(id: ConnectionId, config: &ConnectionConfig) -> (ConnectionHandle, MemoryPeer) {
    let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity);
    let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity);
    let link = Link::new();

    let handle = ConnectionHandle::new(id, inbound_rx, outbound_tx, link.clone(), config.write_timeout);
    let peer = MemoryPeer {
        inbound: inbound_tx,
        outbound: outbound_rx,
        link,
    };
    (handle, peer)
}

impl MemoryPeer {
    /// Send a raw text frame to the server side.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), ConnectionClosed> {
        if !self.link.is_connected() {
            return Err(ConnectionClosed);
        }
        enqueue(&self.inbound, Envelope::from_text(text.into())).await
    }

    /// Send a client message.
    pub async fn send(&self, message: &ClientMessage) -> Result<(), ConnectionClosed> {
        let text = message.to_json().map_err(|_| ConnectionClosed)?;
        self.send_text(text).await
    }

    /// Next frame from the server; `None` once closed and drained.
    pub async fn recv(&mut self) -> Option<String> {
        tokio::select! {
            biased;
            frame = self.outbound.recv() => frame,
            _ = self.link.closed() => self.outbound.try_recv().ok(),
        }
    }

    /// Next frame from the server, parsed.
    pub async fn recv_message(&mut self) -> Option<ServerMessage> {
        let frame = self.recv().await?;
        ServerMessage::from_json(&frame).ok()
    }

    /// Is the connection still up?
    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Drop the connection from the remote side.
    pub fn disconnect(&self) {
        self.link.mark_disconnected();
    }
}

impl Drop for MemoryPeer {
    fn drop(&mut self) {
        self.link.mark_disconnected();
    }
}
