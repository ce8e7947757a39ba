//! Broadcast Dispatcher
//!
//! Fan-out of one encoded frame to every participant of a match. The frame
//! is encoded once, so both players receive byte-identical text.

use tracing::debug;

use crate::game::piece::Side;
use crate::game::state::GameState;
use crate::network::codec;
use crate::network::connection::ConnectionHandle;
use crate::network::protocol::ServerMessage;

/// Per-side outcome of one broadcast.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Delivery {
    /// White received the frame.
    pub white: bool,
    /// Black received the frame.
    pub black: bool,
}

impl Delivery {
    fn record(&mut self, side: Option<Side>, delivered: bool) {
        match side {
            Some(Side::White) => self.white = delivered,
            Some(Side::Black) => self.black = delivered,
            None => {}
        }
    }

    /// Did the frame reach `side`?
    pub fn reached(&self, side: Side) -> bool {
        match side {
            Side::White => self.white,
            Side::Black => self.black,
        }
    }

    /// Number of recipients reached.
    pub fn count(&self) -> usize {
        usize::from(self.white) + usize::from(self.black)
    }
}

/// Sends identical frames to a set of handles.
#[derive(Clone, Copy, Debug, Default)]
pub struct BroadcastDispatcher;

impl BroadcastDispatcher {
    /// Create a dispatcher.
    pub fn new() -> Self {
        Self
    }

    /// Encode `message` once and send it to every connected recipient.
    ///
    /// Disconnected recipients are skipped; a failed send marks the handle
    /// disconnected (see [`ConnectionHandle::send_frame`]).
    pub async fn broadcast<'a, I>(&self, recipients: I, message: &ServerMessage) -> Delivery
    where
        I: IntoIterator<Item = &'a ConnectionHandle>,
    {
        let frame = codec::encode(message);
        let mut delivery = Delivery::default();

        for handle in recipients {
            if !handle.is_connected() {
                continue;
            }
            let delivered = handle.send_frame(frame.clone()).await.is_ok();
            if !delivered {
                debug!("{}: dropped {} broadcast", handle.id(), message.kind());
            }
            delivery.record(handle.side(), delivered);
        }

        delivery
    }

    /// Broadcast a snapshot together with its state hash.
    pub async fn broadcast_state<'a, I>(&self, recipients: I, state: &GameState) -> Delivery
    where
        I: IntoIterator<Item = &'a ConnectionHandle>,
    {
        self.broadcast(recipients, &ServerMessage::game_state(state.clone())).await
    }
}
