//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! All messages are JSON text frames tagged by a `type` field.

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::core::coord::Coord;
use crate::game::piece::{PieceId, Side};
use crate::game::state::{GameState, Move, MoveError, StateDelta};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Move a piece. Captures use the same request.
    #[serde(alias = "capture")]
    Move(MoveRequest),

    /// Request the current snapshot.
    GetState,

    /// Concede the game.
    Resign,

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back in the pong.
        timestamp: u64,
    },
}

impl ClientMessage {
    /// Every accepted `type` value, aliases included.
    pub const TYPES: &'static [&'static str] = &["move", "capture", "get_state", "resign", "ping"];
}

/// Move request payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRequest {
    /// Piece to move.
    pub piece_id: PieceId,
    /// Square the client believes the piece is on.
    pub from: Coord,
    /// Destination square.
    pub to: Coord,
}

impl MoveRequest {
    /// Bind the request to the side of the connection it arrived on.
    pub fn into_move(self, side: Side) -> Move {
        Move::new(self.piece_id, self.from, self.to, side)
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First message on every admitted connection.
    Welcome(WelcomeInfo),

    /// Both players are connected; the game is on.
    GameStarted {
        /// Match identifier.
        match_id: String,
        /// When the match was created.
        started_at: DateTime<Utc>,
        /// Human-readable notice.
        message: String,
    },

    /// Full snapshot with its fingerprint.
    GameState {
        /// The snapshot.
        state: GameState,
        /// Hex SHA-256 of the snapshot.
        state_hash: String,
    },

    /// A move was applied.
    MoveExecuted(MoveExecuted),

    /// A request was refused.
    Error(ServerError),

    /// The opponent's connection dropped.
    PlayerDisconnected {
        /// Side that dropped.
        color: Side,
        /// Seconds the opponent has to rejoin (0 when rejoin is disabled).
        grace_secs: u64,
        /// Human-readable notice.
        message: String,
    },

    /// The opponent rejoined within the grace period.
    PlayerReconnected {
        /// Side that came back.
        color: Side,
    },

    /// Pong response.
    Pong {
        /// Echo of the ping timestamp.
        timestamp: u64,
        /// Server clock, Unix milliseconds.
        server_time: u64,
    },

    /// Server is shutting down.
    Shutdown {
        /// Why the server is stopping.
        reason: String,
    },
}

/// Welcome payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WelcomeInfo {
    /// `player_<ordinal>`.
    pub player_id: String,
    /// Assigned side.
    pub color: Side,
    /// Human-readable greeting.
    pub message: String,
    /// Token for `?rejoin=`; present only when rejoin is enabled.
    pub rejoin_token: Option<String>,
}

/// Applied move, as broadcast to both players.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveExecuted {
    /// Piece that moved.
    pub piece_id: PieceId,
    /// Source square.
    pub from: Coord,
    /// Destination square.
    pub to: Coord,
    /// Side that moved.
    pub player: Side,
    /// Piece taken, if any.
    pub captured: Option<PieceId>,
}

impl From<&StateDelta> for MoveExecuted {
    fn from(delta: &StateDelta) -> Self {
        Self {
            piece_id: delta.piece_id.clone(),
            from: delta.from,
            to: delta.to,
            player: delta.mover,
            captured: delta.captured.clone(),
        }
    }
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error kind.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Echo of the offending request, when it parsed as JSON.
    pub request: Option<serde_json::Value>,
}

impl ServerError {
    /// Error without a request echo.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            request: None,
        }
    }

    /// Attach the offending request.
    pub fn with_request(mut self, request: Option<serde_json::Value>) -> Self {
        self.request = request;
        self
    }
}

impl From<&MoveError> for ServerError {
    fn from(err: &MoveError) -> Self {
        Self::new(ErrorKind::from(err), err.to_string())
    }
}

/// Error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Frame could not be decoded.
    DecodeError,
    /// Not the sender's turn.
    OutOfTurn,
    /// Piece missing, misplaced or not the sender's.
    InvalidPiece,
    /// Destination refused by the rules.
    IllegalDestination,
    /// Game not in progress.
    GameNotActive,
    /// Opponent disconnected; waiting for rejoin.
    GamePaused,
    /// Server at match capacity.
    GameFull,
    /// Unknown or expired rejoin token.
    RejoinRejected,
}

impl From<&MoveError> for ErrorKind {
    fn from(err: &MoveError) -> Self {
        match err {
            MoveError::GameNotActive => ErrorKind::GameNotActive,
            MoveError::OutOfTurn { .. } => ErrorKind::OutOfTurn,
            MoveError::InvalidPiece { .. } => ErrorKind::InvalidPiece,
            MoveError::IllegalDestination { .. } => ErrorKind::IllegalDestination,
        }
    }
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

impl ServerMessage {
    /// Snapshot message with its hex state hash.
    pub fn game_state(state: GameState) -> Self {
        let state_hash = hex::encode(state.state_hash());
        ServerMessage::GameState { state, state_hash }
    }

    /// Error message.
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError::new(kind, message))
    }

    /// Message kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Welcome(_) => "welcome",
            ServerMessage::GameStarted { .. } => "game_started",
            ServerMessage::GameState { .. } => "game_state",
            ServerMessage::MoveExecuted(_) => "move_executed",
            ServerMessage::Error(_) => "error",
            ServerMessage::PlayerDisconnected { .. } => "player_disconnected",
            ServerMessage::PlayerReconnected { .. } => "player_reconnected",
            ServerMessage::Pong { .. } => "pong",
            ServerMessage::Shutdown { .. } => "shutdown",
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::GameStateMachine;

    #[test]
    fn test_move_request_wire_form() {
        let json = r#"{"type":"move","piece_id":"PW1","from":[6,0],"to":[4,0]}"#;
        let parsed = ClientMessage::from_json(json).unwrap();

        let ClientMessage::Move(request) = parsed else {
            panic!("Wrong message type");
        };
        assert_eq!(request.piece_id.as_str(), "PW1");
        assert_eq!(request.from, Coord::new(6, 0));
        assert_eq!(request.to, Coord::new(4, 0));

        let mv = request.into_move(Side::White);
        assert_eq!(mv.side(), Side::White);
    }

    #[test]
    fn test_capture_alias() {
        let json = r#"{"type":"capture","piece_id":"QW1","from":[7,3],"to":[1,3]}"#;
        assert!(matches!(ClientMessage::from_json(json), Ok(ClientMessage::Move(_))));
    }

    #[test]
    fn test_unit_requests() {
        assert_eq!(ClientMessage::from_json(r#"{"type":"get_state"}"#).unwrap(), ClientMessage::GetState);
        assert_eq!(ClientMessage::from_json(r#"{"type":"resign"}"#).unwrap(), ClientMessage::Resign);
        assert_eq!(
            ClientMessage::from_json(r#"{"type":"ping","timestamp":42}"#).unwrap(),
            ClientMessage::Ping { timestamp: 42 }
        );
    }

    #[test]
    fn test_welcome_wire_form() {
        let msg = ServerMessage::Welcome(WelcomeInfo {
            player_id: "player_1".to_string(),
            color: Side::White,
            message: "You are white".to_string(),
            rejoin_token: None,
        });

        let json: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "welcome");
        assert_eq!(json["player_id"], "player_1");
        assert_eq!(json["color"], "white");
        assert!(json["rejoin_token"].is_null());
    }

    #[test]
    fn test_game_state_carries_hash() {
        let state = GameStateMachine::new().snapshot();
        let expected = hex::encode(state.state_hash());

        let msg = ServerMessage::game_state(state);
        let json = msg.to_json().unwrap();
        let parsed = ServerMessage::from_json(&json).unwrap();

        let ServerMessage::GameState { state, state_hash } = parsed else {
            panic!("Wrong message type");
        };
        assert_eq!(state_hash, expected);
        assert_eq!(state.pieces.len(), 32);
    }

    #[test]
    fn test_error_kinds() {
        let err = MoveError::OutOfTurn { turn: Side::White };
        let msg = ServerMessage::Error(
            ServerError::from(&err).with_request(Some(serde_json::json!({"type": "move"}))),
        );

        let json: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["kind"], "out_of_turn");
        assert_eq!(json["request"]["type"], "move");

        assert_eq!(ErrorKind::from(&MoveError::GameNotActive), ErrorKind::GameNotActive);
        let full = ServerMessage::error(ErrorKind::GameFull, "Game is full").to_json().unwrap();
        assert!(full.contains("game_full"));
    }

    #[test]
    fn test_game_started_timestamp_is_rfc3339() {
        let msg = ServerMessage::GameStarted {
            match_id: "m".to_string(),
            started_at: Utc::now(),
            message: "Game started".to_string(),
        };
        let json: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        let started_at = json["started_at"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(started_at).is_ok());
    }
}
