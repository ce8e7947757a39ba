//! Session Coordination
//!
//! The single admission point for new connections. Holds the waiting pool,
//! pairs the first two waiting connections into a match, turns away
//! connections beyond the configured match capacity and routes rejoin
//! tokens to the match that issued them.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use futures_util::future::select_all;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::game::piece::Side;
use crate::game::state::{GameState, GameStateMachine};
use crate::network::connection::{ConnectionClosed, ConnectionHandle, Envelope};
use crate::network::controller::{MatchConfig, MatchControl, MatchController, MatchId, MatchSummary};
use crate::network::protocol::{ClientMessage, ErrorKind, ServerError, ServerMessage, WelcomeInfo};

/// Configuration for session coordination.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Concurrent matches before new connections are turned away.
    pub max_matches: usize,
    /// Settings handed to every match.
    pub match_config: MatchConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_matches: 1,
            match_config: MatchConfig::default(),
        }
    }
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Match capacity reached.
    #[error("Game is full")]
    GameFull,

    /// Token unknown, malformed, or its match no longer accepts it.
    #[error("Rejoin rejected")]
    RejoinRejected,

    /// The connection dropped before it could be admitted.
    #[error("Connection lost during admission")]
    ConnectionLost,
}

/// Result of admitting a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// In the waiting pool.
    Waiting,
    /// Paired; a match was started.
    Paired(MatchId),
    /// Handed to the match owning the rejoin token.
    Rejoining(MatchId),
    /// Turned away and closed.
    Rejected(SessionError),
}

/// A connection asking to be admitted.
#[derive(Debug)]
pub struct Admit {
    /// The connection.
    pub handle: ConnectionHandle,
    /// `?rejoin=` value from the handshake, if any.
    pub rejoin: Option<String>,
}

/// A running match as seen by the coordinator.
struct ActiveMatch {
    control: mpsc::Sender<MatchControl>,
    tokens: Vec<Uuid>,
    ended: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl ActiveMatch {
    fn is_live(&self) -> bool {
        !*self.ended.borrow()
    }
}

/// What woke the coordinator loop.
enum Wake {
    Admit(Option<Admit>),
    Finished(Option<MatchSummary>),
    Waiting(usize, Result<Envelope, ConnectionClosed>),
    Shutdown,
}

/// Pairs connections into matches and tracks running matches.
pub struct SessionCoordinator {
    config: SessionConfig,
    waiting: VecDeque<ConnectionHandle>,
    matches: BTreeMap<MatchId, ActiveMatch>,
    tokens: BTreeMap<Uuid, MatchId>,
    finished_tx: mpsc::Sender<MatchSummary>,
    finished_rx: mpsc::Receiver<MatchSummary>,
}

impl SessionCoordinator {
    /// Create a coordinator.
    pub fn new(config: SessionConfig) -> Self {
        let (finished_tx, finished_rx) = mpsc::channel(16);
        Self {
            config,
            waiting: VecDeque::new(),
            matches: BTreeMap::new(),
            tokens: BTreeMap::new(),
            finished_tx,
            finished_rx,
        }
    }

    /// Connections in the waiting pool.
    pub fn waiting_count(&self) -> usize {
        self.waiting.len()
    }

    /// Matches whose controller is still running, ended or not.
    pub fn match_count(&self) -> usize {
        self.matches.len()
    }

    /// Matches still being played. Only these count against `max_matches`;
    /// an ended match keeps serving its survivors without holding a slot.
    pub fn live_match_count(&self) -> usize {
        self.matches.values().filter(|active| active.is_live()).count()
    }

    /// Snapshot shown to connections that are still waiting for an opponent.
    pub fn waiting_snapshot(&self) -> GameState {
        GameStateMachine::with_rules(self.config.match_config.rules.clone()).snapshot()
    }

    // =========================================================================
    // ADMISSION
    // =========================================================================

    /// Admit a connection.
    pub async fn admit(&mut self, mut handle: ConnectionHandle, rejoin: Option<String>) -> Admission {
        if let Some(token) = rejoin {
            return self.route_rejoin(handle, &token).await;
        }

        self.reap_finished();
        self.waiting.retain(ConnectionHandle::is_connected);

        let live = self.live_match_count();
        if live >= self.config.max_matches {
            info!("{}: at capacity ({} matches), turning away", handle.id(), live);
            let _ = handle.send(&ServerMessage::error(ErrorKind::GameFull, "Game is full")).await;
            handle.close();
            return Admission::Rejected(SessionError::GameFull);
        }

        let color = if self.waiting.is_empty() { Side::White } else { Side::Black };
        let rejoin_token = self.config.match_config.allows_rejoin().then(Uuid::new_v4);
        if let Some(token) = rejoin_token {
            handle.set_rejoin_token(token);
        }

        let welcome = ServerMessage::Welcome(WelcomeInfo {
            player_id: handle.player_id(),
            color,
            message: format!("Welcome! You are playing {}", color),
            rejoin_token: rejoin_token.map(|token| token.to_string()),
        });
        if handle.send(&welcome).await.is_err() {
            return Admission::Rejected(SessionError::ConnectionLost);
        }
        info!("{}: admitted as {}", handle.id(), color);

        self.waiting.push_back(handle);
        if self.waiting.len() < 2 {
            return Admission::Waiting;
        }

        match (self.waiting.pop_front(), self.waiting.pop_front()) {
            (Some(white), Some(black)) => Admission::Paired(self.start_match(white, black)),
            _ => Admission::Waiting,
        }
    }

    async fn route_rejoin(&mut self, handle: ConnectionHandle, token: &str) -> Admission {
        let route = Uuid::parse_str(token)
            .ok()
            .and_then(|token| self.tokens.get(&token).map(|id| (token, *id)));

        let Some((token, match_id)) = route else {
            return reject_rejoin(handle).await;
        };
        let Some(active) = self.matches.get(&match_id) else {
            return reject_rejoin(handle).await;
        };

        info!("{}: rejoining match {}", handle.id(), match_id);
        match active.control.send(MatchControl::Rejoin { token, handle }).await {
            Ok(()) => Admission::Rejoining(match_id),
            Err(mpsc::error::SendError(control)) => match control {
                MatchControl::Rejoin { handle, .. } => reject_rejoin(handle).await,
                MatchControl::Shutdown => Admission::Rejected(SessionError::RejoinRejected),
            },
        }
    }

    fn start_match(&mut self, white: ConnectionHandle, black: ConnectionHandle) -> MatchId {
        let id = Uuid::new_v4();
        let tokens: Vec<Uuid> = [white.rejoin_token(), black.rejoin_token()]
            .into_iter()
            .flatten()
            .collect();
        info!("Match {}: {} (white) vs {} (black)", id, white.id(), black.id());

        let (controller, control) = MatchController::new(id, white, black, self.config.match_config.clone());
        let ended = controller.ended();
        let finished = self.finished_tx.clone();
        let task = tokio::spawn(async move {
            let summary = controller.run().await;
            let _ = finished.send(summary).await;
        });

        for token in &tokens {
            self.tokens.insert(*token, id);
        }
        self.matches.insert(id, ActiveMatch { control, tokens, ended, task });
        id
    }

    fn reap_finished(&mut self) {
        while let Ok(summary) = self.finished_rx.try_recv() {
            self.on_finished(summary);
        }
    }

    fn on_finished(&mut self, summary: MatchSummary) {
        if let Some(active) = self.matches.remove(&summary.id) {
            for token in &active.tokens {
                self.tokens.remove(token);
            }
        }
        info!(
            "Match {} finished after {} plies in {:?} ({:?}, winner {:?})",
            summary.id, summary.plies, summary.duration, summary.end_reason, summary.winner
        );
    }

    // =========================================================================
    // WAITING POOL
    // =========================================================================

    async fn serve_waiting(&mut self, index: usize, result: Result<Envelope, ConnectionClosed>) {
        let envelope = match result {
            Ok(envelope) => envelope,
            Err(ConnectionClosed) => {
                if let Some(handle) = self.waiting.remove(index) {
                    info!("{}: left the waiting pool", handle.id());
                }
                return;
            }
        };

        let reply = match envelope.message {
            Ok(ClientMessage::GetState) => ServerMessage::game_state(self.waiting_snapshot()),
            Ok(ClientMessage::Ping { timestamp }) => ServerMessage::Pong {
                timestamp,
                server_time: u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default(),
            },
            Ok(ClientMessage::Move(_)) | Ok(ClientMessage::Resign) => ServerMessage::Error(
                ServerError::new(ErrorKind::GameNotActive, "waiting for an opponent")
                    .with_request(envelope.request_echo()),
            ),
            Err(ref e) => ServerMessage::Error(
                ServerError::new(ErrorKind::DecodeError, e.to_string()).with_request(envelope.request_echo()),
            ),
        };

        if let Some(handle) = self.waiting.get(index) {
            let _ = handle.send(&reply).await;
        }
    }

    // =========================================================================
    // LOOP
    // =========================================================================

    /// Run until shutdown or until the admission channel closes.
    #[instrument(skip_all)]
    pub async fn run(mut self, mut admissions: mpsc::Receiver<Admit>, mut shutdown: broadcast::Receiver<()>) {
        info!("Session coordinator started (max {} matches)", self.config.max_matches);

        loop {
            let wake = {
                let waiting = &mut self.waiting;
                let finished = &mut self.finished_rx;
                tokio::select! {
                    admit = admissions.recv() => Wake::Admit(admit),
                    summary = finished.recv() => Wake::Finished(summary),
                    (index, result) = next_waiting(waiting) => Wake::Waiting(index, result),
                    _ = shutdown.recv() => Wake::Shutdown,
                }
            };

            match wake {
                Wake::Admit(Some(Admit { handle, rejoin })) => {
                    let admission = self.admit(handle, rejoin).await;
                    debug!(?admission, "Admission");
                }
                Wake::Finished(Some(summary)) => self.on_finished(summary),
                Wake::Finished(None) => {}
                Wake::Waiting(index, result) => self.serve_waiting(index, result).await,
                Wake::Admit(None) | Wake::Shutdown => break,
            }
        }

        self.shutdown().await;
    }

    /// Tell every match and waiting connection that the server is going down.
    pub async fn shutdown(&mut self) {
        info!("Shutting down {} matches", self.matches.len());
        let notice = ServerMessage::Shutdown {
            reason: "Server shutting down".to_string(),
        };

        for handle in self.waiting.drain(..) {
            let _ = handle.send(&notice).await;
            handle.close();
        }

        for active in self.matches.values() {
            let _ = active.control.send(MatchControl::Shutdown).await;
        }
        for (id, active) in std::mem::take(&mut self.matches) {
            if timeout(Duration::from_secs(5), active.task).await.is_err() {
                warn!("Match {} did not stop in time", id);
            }
        }
        self.tokens.clear();
    }
}

async fn reject_rejoin(handle: ConnectionHandle) -> Admission {
    warn!("{}: rejoin rejected", handle.id());
    let _ = handle
        .send(&ServerMessage::error(ErrorKind::RejoinRejected, "Unknown or expired rejoin token"))
        .await;
    handle.close();
    Admission::Rejected(SessionError::RejoinRejected)
}

/// Next frame (or closure) from any waiting connection.
async fn next_waiting(waiting: &mut VecDeque<ConnectionHandle>) -> (usize, Result<Envelope, ConnectionClosed>) {
    if waiting.is_empty() {
        return std::future::pending().await;
    }
    let (result, index, _) = select_all(waiting.iter_mut().map(|handle| Box::pin(handle.receive()))).await;
    (index, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::GameStatus;
    use crate::network::connection::{memory_pair, ConnectionConfig, ConnectionId, MemoryPeer};

    const WAIT: Duration = Duration::from_secs(2);

    fn connect(id: u64) -> (ConnectionHandle, MemoryPeer) {
        memory_pair(ConnectionId(id), &ConnectionConfig::default())
    }

    async fn next(peer: &mut MemoryPeer) -> ServerMessage {
        tokio::time::timeout(WAIT, peer.recv_message())
            .await
            .expect("timed out waiting for server frame")
            .expect("connection closed")
    }

    async fn welcome(peer: &mut MemoryPeer) -> WelcomeInfo {
        match next(peer).await {
            ServerMessage::Welcome(info) => info,
            other => panic!("expected welcome, got {:?}", other),
        }
    }

    #[test]
    fn test_session_config_default() {
        let config = SessionConfig::default();
        assert_eq!(config.max_matches, 1);
        assert!(!config.match_config.allows_rejoin());
    }

    #[tokio::test]
    async fn test_first_two_are_paired_white_then_black() {
        let mut coordinator = SessionCoordinator::new(SessionConfig::default());
        let (c1, mut p1) = connect(1);
        let (c2, mut p2) = connect(2);

        assert_eq!(coordinator.admit(c1, None).await, Admission::Waiting);
        assert!(matches!(coordinator.admit(c2, None).await, Admission::Paired(_)));
        assert_eq!(coordinator.waiting_count(), 0);
        assert_eq!(coordinator.match_count(), 1);

        let w1 = welcome(&mut p1).await;
        let w2 = welcome(&mut p2).await;
        assert_eq!((w1.player_id.as_str(), w1.color), ("player_1", Side::White));
        assert_eq!((w2.player_id.as_str(), w2.color), ("player_2", Side::Black));
        assert!(w1.rejoin_token.is_none());

        assert!(matches!(next(&mut p1).await, ServerMessage::GameStarted { .. }));
        assert!(matches!(next(&mut p2).await, ServerMessage::GameStarted { .. }));
    }

    #[tokio::test]
    async fn test_third_connection_is_turned_away() {
        let mut coordinator = SessionCoordinator::new(SessionConfig::default());
        let (c1, _p1) = connect(1);
        let (c2, _p2) = connect(2);
        let (c3, mut p3) = connect(3);

        coordinator.admit(c1, None).await;
        coordinator.admit(c2, None).await;
        assert_eq!(
            coordinator.admit(c3, None).await,
            Admission::Rejected(SessionError::GameFull)
        );

        let ServerMessage::Error(error) = next(&mut p3).await else {
            panic!("expected error");
        };
        assert_eq!(error.kind, ErrorKind::GameFull);
        assert!(p3.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_disconnected_waiter_is_dropped() {
        let mut coordinator = SessionCoordinator::new(SessionConfig::default());
        let (c1, p1) = connect(1);
        coordinator.admit(c1, None).await;
        p1.disconnect();

        let (c2, mut p2) = connect(2);
        assert_eq!(coordinator.admit(c2, None).await, Admission::Waiting);
        assert_eq!(welcome(&mut p2).await.color, Side::White);
        assert_eq!(coordinator.waiting_count(), 1);
        assert_eq!(coordinator.match_count(), 0);
    }

    #[tokio::test]
    async fn test_independent_matches_up_to_capacity() {
        let config = SessionConfig {
            max_matches: 2,
            ..Default::default()
        };
        let mut coordinator = SessionCoordinator::new(config);
        let mut peers = Vec::new();
        for id in 1..=4 {
            let (handle, peer) = connect(id);
            coordinator.admit(handle, None).await;
            peers.push(peer);
        }
        assert_eq!(coordinator.match_count(), 2);

        let (c5, _p5) = connect(5);
        assert_eq!(coordinator.admit(c5, None).await, Admission::Rejected(SessionError::GameFull));
    }

    #[tokio::test]
    async fn test_unknown_rejoin_token_is_rejected() {
        let mut coordinator = SessionCoordinator::new(SessionConfig::default());
        let (c1, mut p1) = connect(1);

        let admission = coordinator.admit(c1, Some(Uuid::new_v4().to_string())).await;
        assert_eq!(admission, Admission::Rejected(SessionError::RejoinRejected));

        let ServerMessage::Error(error) = next(&mut p1).await else {
            panic!("expected error");
        };
        assert_eq!(error.kind, ErrorKind::RejoinRejected);

        let (c2, _p2) = connect(2);
        let admission = coordinator.admit(c2, Some("not-a-uuid".to_string())).await;
        assert_eq!(admission, Admission::Rejected(SessionError::RejoinRejected));
    }

    #[tokio::test]
    async fn test_rejoin_token_routes_to_match() {
        let config = SessionConfig {
            match_config: MatchConfig {
                reconnect_grace: Duration::from_secs(30),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut coordinator = SessionCoordinator::new(config);
        let (c1, mut p1) = connect(1);
        let (c2, mut p2) = connect(2);
        coordinator.admit(c1, None).await;
        let Admission::Paired(match_id) = coordinator.admit(c2, None).await else {
            panic!("expected pairing");
        };

        welcome(&mut p1).await;
        let token = welcome(&mut p2).await.rejoin_token.expect("token issued");
        p2.disconnect();

        // White sees the intro and then the disconnect notice.
        next(&mut p1).await;
        next(&mut p1).await;
        assert!(matches!(
            next(&mut p1).await,
            ServerMessage::PlayerDisconnected { color: Side::Black, grace_secs: 30, .. }
        ));

        let (c3, mut p3) = connect(3);
        assert_eq!(coordinator.admit(c3, Some(token)).await, Admission::Rejoining(match_id));
        assert_eq!(welcome(&mut p3).await.color, Side::Black);
    }

    #[tokio::test]
    async fn test_waiting_connection_gets_waiting_snapshot() {
        let coordinator = SessionCoordinator::new(SessionConfig::default());
        let (admit_tx, admit_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(coordinator.run(admit_rx, shutdown_rx));

        let (c1, mut p1) = connect(1);
        admit_tx.send(Admit { handle: c1, rejoin: None }).await.unwrap();
        welcome(&mut p1).await;

        p1.send_text(r#"{"type":"get_state"}"#).await.unwrap();
        let ServerMessage::GameState { state, .. } = next(&mut p1).await else {
            panic!("expected game_state");
        };
        assert_eq!(state.game_status, GameStatus::WaitingForPlayers);

        p1.send_text(r#"{"type":"move","piece_id":"PW1","from":[6,0],"to":[4,0]}"#).await.unwrap();
        let ServerMessage::Error(error) = next(&mut p1).await else {
            panic!("expected error");
        };
        assert_eq!(error.kind, ErrorKind::GameNotActive);

        shutdown_tx.send(()).unwrap();
        assert!(matches!(next(&mut p1).await, ServerMessage::Shutdown { .. }));
        tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_ended_match_frees_its_slot() {
        let mut coordinator = SessionCoordinator::new(SessionConfig::default());
        let (c1, mut p1) = connect(1);
        let (c2, _p2) = connect(2);
        coordinator.admit(c1, None).await;
        coordinator.admit(c2, None).await;

        welcome(&mut p1).await;
        next(&mut p1).await;
        next(&mut p1).await;
        p1.send_text(r#"{"type":"resign"}"#).await.unwrap();
        let ServerMessage::GameState { state, .. } = next(&mut p1).await else {
            panic!("expected final game_state");
        };
        assert_eq!(state.game_status, GameStatus::Ended);

        // Both players are still connected; the slot is free anyway.
        let deadline = tokio::time::Instant::now() + WAIT;
        let mut next_id = 3;
        let mut p3 = loop {
            let (handle, peer) = connect(next_id);
            next_id += 1;
            match coordinator.admit(handle, None).await {
                Admission::Waiting => break peer,
                Admission::Rejected(SessionError::GameFull) => {
                    assert!(tokio::time::Instant::now() < deadline, "ended match kept its slot");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                other => panic!("unexpected admission {:?}", other),
            }
        };
        assert_eq!(welcome(&mut p3).await.color, Side::White);
        assert_eq!(coordinator.match_count(), 1);
        assert_eq!(coordinator.live_match_count(), 0);

        // The survivor can still look at the final board.
        p1.send_text(r#"{"type":"get_state"}"#).await.unwrap();
        let ServerMessage::GameState { state, .. } = next(&mut p1).await else {
            panic!("expected game_state");
        };
        assert_eq!(state.game_status, GameStatus::Ended);
    }

    #[tokio::test]
    async fn test_capacity_frees_when_match_finishes() {
        let coordinator = SessionCoordinator::new(SessionConfig::default());
        let (admit_tx, admit_rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(coordinator.run(admit_rx, shutdown_rx));

        let (c1, p1) = connect(1);
        let (c2, p2) = connect(2);
        admit_tx.send(Admit { handle: c1, rejoin: None }).await.unwrap();
        admit_tx.send(Admit { handle: c2, rejoin: None }).await.unwrap();
        p1.disconnect();
        p2.disconnect();

        // Retry until the finished match has been reaped.
        let deadline = tokio::time::Instant::now() + WAIT;
        let mut next_id = 3;
        loop {
            let (handle, mut peer) = connect(next_id);
            next_id += 1;
            admit_tx.send(Admit { handle, rejoin: None }).await.unwrap();
            if let ServerMessage::Welcome(info) = next(&mut peer).await {
                assert_eq!(info.color, Side::White);
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "capacity never freed");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}
