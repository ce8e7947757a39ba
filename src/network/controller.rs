//! Match Controller
//!
//! Owns one game and the two connection handles playing it. Inbound frames
//! from both players are processed strictly one at a time, in global arrival
//! order, and every resulting state change is broadcast to both players
//! before the next frame is examined.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::game::piece::Side;
use crate::game::rules::{MoveLegality, OpenBoard};
use crate::game::state::{EndReason, GameStateMachine, GameStatus};
use crate::network::broadcast::BroadcastDispatcher;
use crate::network::connection::{ConnectionClosed, ConnectionHandle, Envelope};
use crate::network::protocol::{
    ClientMessage, ErrorKind, MoveExecuted, MoveRequest, ServerError, ServerMessage, WelcomeInfo,
};

/// Match identifier.
pub type MatchId = Uuid;

// =============================================================================
// CONFIG
// =============================================================================

/// Per-match settings.
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// How long a dropped player may take to rejoin. Zero ends the game on
    /// the first disconnect.
    pub reconnect_grace: Duration,
    /// Move legality policy.
    pub rules: Arc<dyn MoveLegality>,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            reconnect_grace: Duration::ZERO,
            rules: Arc::new(OpenBoard),
        }
    }
}

impl MatchConfig {
    /// Is rejoining enabled?
    pub fn allows_rejoin(&self) -> bool {
        !self.reconnect_grace.is_zero()
    }
}

/// Instructions from the session coordinator.
#[derive(Debug)]
pub enum MatchControl {
    /// A connection presented a rejoin token owned by this match.
    Rejoin {
        /// Presented token.
        token: Uuid,
        /// The new connection.
        handle: ConnectionHandle,
    },
    /// Server is going down.
    Shutdown,
}

/// Outcome of a finished match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSummary {
    /// Match identifier.
    pub id: MatchId,
    /// Winning side, if any.
    pub winner: Option<Side>,
    /// Why the game ended (None if it never ended).
    pub end_reason: Option<EndReason>,
    /// Plies played.
    pub plies: usize,
    /// Wall-clock duration.
    pub duration: Duration,
}

// =============================================================================
// CONTROLLER
// =============================================================================

/// Pending rejoin window for a dropped side.
#[derive(Clone, Copy, Debug)]
struct Grace {
    side: Side,
    deadline: Instant,
}

/// What woke the controller.
enum Input {
    Frame(Side, Envelope),
    Closed(Side),
    Control(Option<MatchControl>),
    GraceExpired,
}

enum Wake {
    Control(Option<MatchControl>),
    Seat(Side, Result<Envelope, ConnectionClosed>),
    Deadline,
}

/// Serialization point for one match.
pub struct MatchController {
    id: MatchId,
    game: GameStateMachine,
    seats: [Option<ConnectionHandle>; 2],
    tokens: [Option<Uuid>; 2],
    pending: [Option<Envelope>; 2],
    dispatcher: BroadcastDispatcher,
    config: MatchConfig,
    control: mpsc::Receiver<MatchControl>,
    control_open: bool,
    grace: Option<Grace>,
    started_at: DateTime<Utc>,
    ended: watch::Sender<bool>,
}

impl MatchController {
    /// Seat two handles. The first plays White.
    pub fn new(
        id: MatchId,
        mut white: ConnectionHandle,
        mut black: ConnectionHandle,
        config: MatchConfig,
    ) -> (Self, mpsc::Sender<MatchControl>) {
        white.assign_side(Side::White);
        black.assign_side(Side::Black);

        let (control_tx, control) = mpsc::channel(8);
        let controller = Self {
            id,
            game: GameStateMachine::with_rules(config.rules.clone()),
            tokens: [white.rejoin_token(), black.rejoin_token()],
            seats: [Some(white), Some(black)],
            pending: [None, None],
            dispatcher: BroadcastDispatcher::new(),
            config,
            control,
            control_open: true,
            grace: None,
            started_at: Utc::now(),
            ended: watch::channel(false).0,
        };
        (controller, control_tx)
    }

    /// Match identifier.
    pub fn id(&self) -> MatchId {
        self.id
    }

    /// Flips to `true` once the game has ended and the final state has been
    /// broadcast. Survivors may stay connected after that.
    pub fn ended(&self) -> watch::Receiver<bool> {
        self.ended.subscribe()
    }

    /// Play the match to completion.
    #[instrument(skip(self), fields(match_id = %self.id))]
    pub async fn run(mut self) -> MatchSummary {
        let clock = Instant::now();
        self.game.start();
        info!("Match started");

        let started = ServerMessage::GameStarted {
            match_id: self.id.to_string(),
            started_at: self.started_at,
            message: "Game started! White moves first.".to_string(),
        };
        self.broadcast(&started).await;
        self.broadcast_state().await;

        while self.seats.iter().any(Option::is_some) {
            match self.next_input().await {
                Input::Frame(side, envelope) => self.handle_frame(side, envelope).await,
                Input::Closed(side) => self.handle_disconnect(side).await,
                Input::Control(Some(MatchControl::Rejoin { token, handle })) => {
                    self.handle_rejoin(token, handle).await
                }
                Input::Control(Some(MatchControl::Shutdown)) => {
                    self.shutdown().await;
                    break;
                }
                Input::Control(None) => self.control_open = false,
                Input::GraceExpired => self.expire_grace().await,
            }
            self.publish_ended();
        }

        // Both players gone while the game was still live.
        if self.game.end(EndReason::Disconnection, None) {
            info!("Both players left, match abandoned");
        }
        self.publish_ended();

        let summary = MatchSummary {
            id: self.id,
            winner: self.game.winner(),
            end_reason: self.game.end_reason(),
            plies: self.game.history().len(),
            duration: clock.elapsed(),
        };
        info!(
            winner = ?summary.winner,
            reason = ?summary.end_reason,
            plies = summary.plies,
            "Match finished"
        );
        summary
    }

    // =========================================================================
    // INPUT ORDERING
    // =========================================================================

    /// Next input, lowest arrival sequence first.
    async fn next_input(&mut self) -> Input {
        loop {
            if self.control_open {
                match self.control.try_recv() {
                    Ok(control) => return Input::Control(Some(control)),
                    Err(TryRecvError::Disconnected) => return Input::Control(None),
                    Err(TryRecvError::Empty) => {}
                }
            }

            for side in Side::ALL {
                let i = side.index();
                if self.pending[i].is_none() {
                    if let Some(handle) = self.seats[i].as_mut() {
                        self.pending[i] = handle.try_receive();
                    }
                }
            }

            let earliest = Side::ALL
                .into_iter()
                .filter_map(|side| self.pending[side.index()].as_ref().map(|e| (e.seq, side)))
                .min();
            if let Some((_, side)) = earliest {
                if let Some(envelope) = self.pending[side.index()].take() {
                    return Input::Frame(side, envelope);
                }
            }

            let deadline = self.grace.map(|grace| grace.deadline);
            let control_open = self.control_open;
            let control = &mut self.control;
            let [white, black] = &mut self.seats;

            let wake = tokio::select! {
                control = control.recv(), if control_open => Wake::Control(control),
                result = receive_from(white) => Wake::Seat(Side::White, result),
                result = receive_from(black) => Wake::Seat(Side::Black, result),
                _ = wait_until(deadline) => Wake::Deadline,
            };

            match wake {
                Wake::Control(control) => return Input::Control(control),
                Wake::Seat(side, Ok(envelope)) => self.pending[side.index()] = Some(envelope),
                Wake::Seat(side, Err(ConnectionClosed)) => return Input::Closed(side),
                Wake::Deadline => return Input::GraceExpired,
            }
        }
    }

    // =========================================================================
    // REQUESTS
    // =========================================================================

    async fn handle_frame(&mut self, side: Side, envelope: Envelope) {
        let request = envelope.request_echo();

        match envelope.message {
            Err(e) => {
                debug!(?side, "Decode error: {}", e);
                let error = ServerError::new(ErrorKind::DecodeError, e.to_string()).with_request(request);
                self.send_to(side, &ServerMessage::Error(error)).await;
            }
            Ok(ClientMessage::Move(move_request)) => {
                self.handle_move(side, move_request, request).await;
            }
            Ok(ClientMessage::GetState) => {
                let snapshot = ServerMessage::game_state(self.game.snapshot());
                self.send_to(side, &snapshot).await;
            }
            Ok(ClientMessage::Resign) => {
                if self.game.resign(side) {
                    info!(?side, "Player resigned");
                    self.broadcast_state().await;
                } else {
                    let error = ServerError::new(ErrorKind::GameNotActive, "game is not in progress")
                        .with_request(request);
                    self.send_to(side, &ServerMessage::Error(error)).await;
                }
            }
            Ok(ClientMessage::Ping { timestamp }) => {
                let server_time = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
                self.send_to(side, &ServerMessage::Pong { timestamp, server_time }).await;
            }
        }
    }

    async fn handle_move(&mut self, side: Side, move_request: MoveRequest, request: Option<serde_json::Value>) {
        if self.grace.is_some() && self.game.is_active() {
            let error = ServerError::new(ErrorKind::GamePaused, "opponent disconnected, waiting for rejoin")
                .with_request(request);
            self.send_to(side, &ServerMessage::Error(error)).await;
            return;
        }

        let mv = move_request.into_move(side);
        match self.game.apply_move(&mv) {
            Ok(delta) => {
                debug!(
                    ?side,
                    piece = %delta.piece_id,
                    from = %delta.from,
                    to = %delta.to,
                    "Move applied"
                );
                self.broadcast(&ServerMessage::MoveExecuted(MoveExecuted::from(&delta))).await;
                self.broadcast_state().await;

                if delta.status == GameStatus::Ended {
                    info!(winner = ?self.game.winner(), "King captured");
                }
            }
            Err(e) => {
                debug!(?side, "Move rejected: {}", e);
                let error = ServerError::from(&e).with_request(request);
                self.send_to(side, &ServerMessage::Error(error)).await;
            }
        }
    }

    // =========================================================================
    // CONNECTIVITY
    // =========================================================================

    async fn handle_disconnect(&mut self, side: Side) {
        self.seats[side.index()] = None;
        self.pending[side.index()] = None;
        info!(?side, "Player disconnected");

        let grace = self.config.reconnect_grace;
        let pausing = self.game.is_active() && !grace.is_zero() && self.tokens[side.index()].is_some();

        let notice = ServerMessage::PlayerDisconnected {
            color: side,
            grace_secs: if pausing { grace.as_secs() } else { 0 },
            message: format!("{} player disconnected", side),
        };
        self.broadcast(&notice).await;

        if pausing {
            self.grace = Some(Grace {
                side,
                deadline: Instant::now() + grace,
            });
            info!(?side, ?grace, "Game paused for rejoin");
        } else if self.game.forfeit(side) {
            self.broadcast_state().await;
        }
    }

    async fn expire_grace(&mut self) {
        let Some(grace) = self.grace.take() else {
            return;
        };
        info!(side = ?grace.side, "Rejoin window expired");
        if self.game.forfeit(grace.side) {
            self.broadcast_state().await;
        }
    }

    async fn handle_rejoin(&mut self, token: Uuid, mut handle: ConnectionHandle) {
        let side = Side::ALL
            .into_iter()
            .find(|side| self.tokens[side.index()] == Some(token));

        let accepted = match (side, self.grace) {
            (Some(side), Some(grace)) => grace.side == side && self.seats[side.index()].is_none(),
            _ => false,
        };

        let Some(side) = side.filter(|_| accepted) else {
            warn!("{}: rejoin refused", handle.id());
            let _ = handle
                .send(&ServerMessage::error(ErrorKind::RejoinRejected, "rejoin not possible"))
                .await;
            handle.close();
            return;
        };

        handle.assign_side(side);
        handle.set_rejoin_token(token);
        self.grace = None;

        let welcome = ServerMessage::Welcome(WelcomeInfo {
            player_id: handle.player_id(),
            color: side,
            message: format!("Rejoined as {}", side),
            rejoin_token: Some(token.to_string()),
        });
        let _ = handle.send(&welcome).await;
        info!(?side, "{}: player rejoined", handle.id());

        self.seats[side.index()] = Some(handle);
        self.broadcast(&ServerMessage::PlayerReconnected { color: side }).await;
        self.send_to(side, &ServerMessage::game_state(self.game.snapshot())).await;
    }

    async fn shutdown(&mut self) {
        self.game.end(EndReason::ServerShutdown, None);
        self.broadcast(&ServerMessage::Shutdown {
            reason: "Server shutting down".to_string(),
        })
        .await;
        for seat in self.seats.iter_mut() {
            if let Some(handle) = seat.take() {
                handle.close();
            }
        }
    }

    fn publish_ended(&self) {
        let ended = self.game.is_ended();
        self.ended.send_if_modified(|flag| {
            let changed = *flag != ended;
            *flag = ended;
            changed
        });
    }

    // =========================================================================
    // OUTPUT
    // =========================================================================

    async fn send_to(&self, side: Side, message: &ServerMessage) {
        if let Some(handle) = &self.seats[side.index()] {
            // A failed send marks the handle disconnected; the next receive
            // reports it.
            let _ = handle.send(message).await;
        }
    }

    async fn broadcast(&self, message: &ServerMessage) {
        self.dispatcher.broadcast(self.seats.iter().flatten(), message).await;
    }

    async fn broadcast_state(&self) {
        let snapshot = self.game.snapshot();
        self.dispatcher.broadcast_state(self.seats.iter().flatten(), &snapshot).await;
    }
}

async fn receive_from(seat: &mut Option<ConnectionHandle>) -> Result<Envelope, ConnectionClosed> {
    match seat {
        Some(handle) => handle.receive().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::coord::Coord;
    use crate::network::connection::{memory_pair, ConnectionConfig, ConnectionId, MemoryPeer};
    use tokio::task::JoinHandle;

    const WAIT: Duration = Duration::from_secs(2);

    struct Harness {
        task: JoinHandle<MatchSummary>,
        control: mpsc::Sender<MatchControl>,
        white: MemoryPeer,
        black: MemoryPeer,
        tokens: [Uuid; 2],
    }

    /// A seated match that has not started running yet.
    struct Seated {
        controller: MatchController,
        control: mpsc::Sender<MatchControl>,
        white: MemoryPeer,
        black: MemoryPeer,
        tokens: [Uuid; 2],
    }

    impl Seated {
        fn new(config: MatchConfig) -> Self {
            let tokens = [Uuid::new_v4(), Uuid::new_v4()];
            let (white, white_peer) = seat(1, tokens[0]);
            let (black, black_peer) = seat(2, tokens[1]);
            let (controller, control) = MatchController::new(Uuid::new_v4(), white, black, config);
            Self {
                controller,
                control,
                white: white_peer,
                black: black_peer,
                tokens,
            }
        }

        async fn launch(self) -> Harness {
            let mut harness = Harness {
                task: tokio::spawn(self.controller.run()),
                control: self.control,
                white: self.white,
                black: self.black,
                tokens: self.tokens,
            };
            skip_intro(&mut harness).await;
            harness
        }
    }

    fn seat(id: u64, token: Uuid) -> (ConnectionHandle, MemoryPeer) {
        let (mut handle, peer) = memory_pair(ConnectionId(id), &ConnectionConfig::default());
        handle.set_rejoin_token(token);
        (handle, peer)
    }

    async fn start(config: MatchConfig) -> Harness {
        Seated::new(config).launch().await
    }

    async fn skip_intro(harness: &mut Harness) {
        for peer in [&mut harness.white, &mut harness.black] {
            assert!(matches!(next(peer).await, ServerMessage::GameStarted { .. }));
            assert!(matches!(next(peer).await, ServerMessage::GameState { .. }));
        }
    }

    async fn next(peer: &mut MemoryPeer) -> ServerMessage {
        tokio::time::timeout(WAIT, peer.recv_message())
            .await
            .expect("timed out waiting for server frame")
            .expect("connection closed")
    }

    async fn next_state(peer: &mut MemoryPeer) -> crate::game::state::GameState {
        match next(peer).await {
            ServerMessage::GameState { state, .. } => state,
            other => panic!("expected game_state, got {:?}", other),
        }
    }

    async fn next_error(peer: &mut MemoryPeer) -> ServerError {
        match next(peer).await {
            ServerMessage::Error(error) => error,
            other => panic!("expected error, got {:?}", other),
        }
    }

    const OPENING: &str = r#"{"type":"move","piece_id":"PW1","from":[6,0],"to":[4,0]}"#;

    #[tokio::test]
    async fn test_move_is_broadcast_identically() {
        let mut h = start(MatchConfig::default()).await;
        h.white.send_text(OPENING).await.unwrap();

        let white_frames = [h.white.recv().await.unwrap(), h.white.recv().await.unwrap()];
        let black_frames = [h.black.recv().await.unwrap(), h.black.recv().await.unwrap()];
        assert_eq!(white_frames, black_frames);

        let ServerMessage::MoveExecuted(executed) = ServerMessage::from_json(&white_frames[0]).unwrap() else {
            panic!("expected move_executed");
        };
        assert_eq!(executed.player, Side::White);
        assert_eq!(executed.to, Coord::new(4, 0));

        let ServerMessage::GameState { state, .. } = ServerMessage::from_json(&white_frames[1]).unwrap() else {
            panic!("expected game_state");
        };
        assert_eq!(state.current_turn, Side::Black);
        assert_eq!(state.piece_at(Coord::new(4, 0)).unwrap().id.as_str(), "PW1");
    }

    #[tokio::test]
    async fn test_out_of_turn_goes_to_sender_only() {
        let mut h = start(MatchConfig::default()).await;
        h.white.send_text(OPENING).await.unwrap();
        for peer in [&mut h.white, &mut h.black] {
            next(peer).await;
            next(peer).await;
        }

        let foreign = r#"{"type":"move","piece_id":"PW2","from":[6,1],"to":[4,1]}"#;
        h.black.send_text(foreign).await.unwrap();
        let error = next_error(&mut h.black).await;
        assert_eq!(error.kind, ErrorKind::OutOfTurn);
        assert_eq!(error.request.unwrap()["piece_id"], "PW2");

        h.white.send_text(r#"{"type":"get_state"}"#).await.unwrap();
        let state = next_state(&mut h.white).await;
        assert_eq!(state.current_turn, Side::Black);
        assert_eq!(state.piece_at(Coord::new(6, 1)).unwrap().id.as_str(), "PW2");
    }

    #[tokio::test]
    async fn test_decode_error_goes_to_sender_only() {
        let mut h = start(MatchConfig::default()).await;
        h.black.send_text("{oops").await.unwrap();
        let error = next_error(&mut h.black).await;
        assert_eq!(error.kind, ErrorKind::DecodeError);

        h.white.send_text(r#"{"type":"ping","timestamp":7}"#).await.unwrap();
        assert!(matches!(next(&mut h.white).await, ServerMessage::Pong { timestamp: 7, .. }));
    }

    #[tokio::test]
    async fn test_frames_processed_in_arrival_order() {
        let seated = Seated::new(MatchConfig::default());
        // Black's frame arrives first and is rejected before White moves.
        seated
            .black
            .send_text(r#"{"type":"move","piece_id":"PB1","from":[1,0],"to":[3,0]}"#)
            .await
            .unwrap();
        seated.white.send_text(OPENING).await.unwrap();
        let mut h = seated.launch().await;

        assert_eq!(next_error(&mut h.black).await.kind, ErrorKind::OutOfTurn);
        assert!(matches!(next(&mut h.black).await, ServerMessage::MoveExecuted(_)));
        let state = next_state(&mut h.black).await;
        assert_eq!(state.current_turn, Side::Black);
        assert_eq!(state.piece_at(Coord::new(1, 0)).unwrap().id.as_str(), "PB1");
    }

    #[tokio::test]
    async fn test_disconnect_ends_game_without_grace() {
        let mut h = start(MatchConfig::default()).await;
        h.black.disconnect();

        assert!(matches!(
            next(&mut h.white).await,
            ServerMessage::PlayerDisconnected { color: Side::Black, grace_secs: 0, .. }
        ));
        let state = next_state(&mut h.white).await;
        assert_eq!(state.game_status, GameStatus::Ended);
        assert_eq!(state.winner, Some(Side::White));

        h.white.send_text(OPENING).await.unwrap();
        assert_eq!(next_error(&mut h.white).await.kind, ErrorKind::GameNotActive);

        h.white.disconnect();
        let summary = tokio::time::timeout(WAIT, h.task).await.unwrap().unwrap();
        assert_eq!(summary.end_reason, Some(EndReason::Disconnection));
        assert_eq!(summary.winner, Some(Side::White));
        assert_eq!(summary.plies, 0);
    }

    #[tokio::test]
    async fn test_resign_hands_win_to_opponent() {
        let mut h = start(MatchConfig::default()).await;
        h.white.send_text(r#"{"type":"resign"}"#).await.unwrap();

        for peer in [&mut h.white, &mut h.black] {
            let state = next_state(peer).await;
            assert_eq!(state.game_status, GameStatus::Ended);
            assert_eq!(state.winner, Some(Side::Black));
            assert_eq!(state.end_reason, Some(EndReason::Resignation));
        }
    }

    #[tokio::test]
    async fn test_ended_flag_flips_after_final_state() {
        let seated = Seated::new(MatchConfig::default());
        let mut ended = seated.controller.ended();
        let mut h = seated.launch().await;
        assert!(!*ended.borrow());

        h.black.send_text(r#"{"type":"resign"}"#).await.unwrap();
        assert_eq!(next_state(&mut h.white).await.game_status, GameStatus::Ended);
        tokio::time::timeout(WAIT, ended.wait_for(|flag| *flag)).await.unwrap().unwrap();

        // Still serving the survivors.
        h.white.send_text(r#"{"type":"get_state"}"#).await.unwrap();
        assert_eq!(next_state(&mut h.white).await.game_status, GameStatus::Ended);
        assert!(!h.task.is_finished());
    }

    #[tokio::test]
    async fn test_rejoin_within_grace() {
        let config = MatchConfig {
            reconnect_grace: Duration::from_secs(30),
            ..Default::default()
        };
        let mut h = start(config).await;
        h.black.disconnect();

        assert!(matches!(
            next(&mut h.white).await,
            ServerMessage::PlayerDisconnected { color: Side::Black, grace_secs: 30, .. }
        ));

        h.white.send_text(OPENING).await.unwrap();
        assert_eq!(next_error(&mut h.white).await.kind, ErrorKind::GamePaused);

        let (handle, mut rejoined) = memory_pair(ConnectionId(3), &ConnectionConfig::default());
        h.control
            .send(MatchControl::Rejoin { token: h.tokens[1], handle })
            .await
            .unwrap();

        let ServerMessage::Welcome(welcome) = next(&mut rejoined).await else {
            panic!("expected welcome");
        };
        assert_eq!(welcome.color, Side::Black);
        assert!(matches!(next(&mut rejoined).await, ServerMessage::PlayerReconnected { color: Side::Black }));
        assert_eq!(next_state(&mut rejoined).await.game_status, GameStatus::InProgress);
        assert!(matches!(next(&mut h.white).await, ServerMessage::PlayerReconnected { color: Side::Black }));

        h.white.send_text(OPENING).await.unwrap();
        assert!(matches!(next(&mut rejoined).await, ServerMessage::MoveExecuted(_)));
    }

    #[tokio::test]
    async fn test_rejoin_with_wrong_token_is_rejected() {
        let config = MatchConfig {
            reconnect_grace: Duration::from_secs(30),
            ..Default::default()
        };
        let mut h = start(config).await;
        h.black.disconnect();
        next(&mut h.white).await;

        let (handle, mut stranger) = memory_pair(ConnectionId(4), &ConnectionConfig::default());
        h.control
            .send(MatchControl::Rejoin { token: h.tokens[0], handle })
            .await
            .unwrap();

        assert_eq!(next_error(&mut stranger).await.kind, ErrorKind::RejoinRejected);
        assert!(stranger.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_grace_expiry_ends_game() {
        let config = MatchConfig {
            reconnect_grace: Duration::from_millis(50),
            ..Default::default()
        };
        let mut h = start(config).await;
        h.white.disconnect();

        assert!(matches!(next(&mut h.black).await, ServerMessage::PlayerDisconnected { .. }));
        let state = next_state(&mut h.black).await;
        assert_eq!(state.game_status, GameStatus::Ended);
        assert_eq!(state.winner, Some(Side::Black));
        assert_eq!(state.end_reason, Some(EndReason::Disconnection));
    }

    #[tokio::test]
    async fn test_shutdown_notifies_and_closes() {
        let mut h = start(MatchConfig::default()).await;
        h.control.send(MatchControl::Shutdown).await.unwrap();

        for peer in [&mut h.white, &mut h.black] {
            assert!(matches!(next(peer).await, ServerMessage::Shutdown { .. }));
            assert!(peer.recv().await.is_none());
        }

        let summary = tokio::time::timeout(WAIT, h.task).await.unwrap().unwrap();
        assert_eq!(summary.end_reason, Some(EndReason::ServerShutdown));
        assert_eq!(summary.winner, None);
    }
}
