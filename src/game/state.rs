//! Game State Machine
//!
//! Authoritative board, turn and status for one match. Pure state
//! transitions: no networking, no clocks. Every successful transition bumps
//! `version`; a rejected move leaves the machine untouched.

use std::sync::Arc;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::coord::Coord;
use crate::core::hash::{StateHash, compute_state_hash};
use crate::game::board::Board;
use crate::game::history::{MoveHistory, MoveRecord, Scores};
use crate::game::piece::{Piece, PieceId, PieceKind, Side};
use crate::game::rules::{MoveLegality, OpenBoard};

// =============================================================================
// STATUS
// =============================================================================

/// Lifecycle of a game. Only ever moves forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Default)]
pub enum GameStatus {
    /// Fewer than two players connected.
    #[default]
    #[serde(rename = "waiting")]
    WaitingForPlayers,
    /// Both players connected, moves accepted.
    #[serde(rename = "playing")]
    InProgress,
    /// Terminal.
    #[serde(rename = "ended")]
    Ended,
}

/// Why a game ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// A player resigned.
    Resignation,
    /// A player's connection was lost (past any grace period).
    Disconnection,
    /// A king was taken.
    KingCaptured,
    /// The server is going down.
    ServerShutdown,
}

// =============================================================================
// MOVE
// =============================================================================

/// A move request from one side. Not yet validated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Move {
    piece_id: PieceId,
    from: Coord,
    to: Coord,
    side: Side,
}

impl Move {
    /// Build a move request.
    pub fn new(piece_id: PieceId, from: Coord, to: Coord, side: Side) -> Self {
        Self { piece_id, from, to, side }
    }

    /// Piece being moved.
    pub fn piece_id(&self) -> &PieceId {
        &self.piece_id
    }

    /// Claimed source square.
    pub fn from(&self) -> Coord {
        self.from
    }

    /// Destination square.
    pub fn to(&self) -> Coord {
        self.to
    }

    /// Submitting side.
    pub fn side(&self) -> Side {
        self.side
    }
}

/// Move rejection. The state is unchanged whenever one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoveError {
    /// The game is not in progress.
    #[error("game is not in progress")]
    GameNotActive,

    /// The submitting side does not hold the turn.
    #[error("it is {turn}'s turn")]
    OutOfTurn {
        /// Side currently holding the turn.
        turn: Side,
    },

    /// No such piece at the claimed source, or not the submitter's piece.
    #[error("piece {piece_id} is not at {from} or does not belong to {side}")]
    InvalidPiece {
        /// Requested piece.
        piece_id: PieceId,
        /// Claimed source.
        from: Coord,
        /// Submitting side.
        side: Side,
    },

    /// Destination rejected by the legality policy.
    #[error("{piece_id} cannot move to {to}")]
    IllegalDestination {
        /// Requested piece.
        piece_id: PieceId,
        /// Requested destination.
        to: Coord,
    },
}

/// Result of an applied move.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateDelta {
    /// Piece that moved.
    pub piece_id: PieceId,
    /// Source square.
    pub from: Coord,
    /// Destination square.
    pub to: Coord,
    /// Side that moved.
    pub mover: Side,
    /// Piece removed from the destination.
    pub captured: Option<PieceId>,
    /// Side holding the turn after the move.
    pub next_turn: Side,
    /// Status after the move.
    pub status: GameStatus,
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Detached, owned copy of the game at one version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    /// All pieces in id order.
    pub pieces: Vec<Piece>,
    /// Side holding the turn.
    pub current_turn: Side,
    /// Lifecycle status.
    pub game_status: GameStatus,
    /// Winning side, once decided.
    pub winner: Option<Side>,
    /// Why the game ended.
    pub end_reason: Option<EndReason>,
    /// Monotonic state version.
    pub version: u64,
    /// Capture scores.
    pub scores: Scores,
    /// Most recent applied move.
    pub last_move: Option<MoveRecord>,
}

impl GameState {
    /// Deterministic fingerprint of this snapshot.
    pub fn state_hash(&self) -> StateHash {
        compute_state_hash(self.version, |hasher| {
            hasher.update_u32(self.pieces.len() as u32);
            for piece in &self.pieces {
                hasher.update_str(piece.id.as_str());
                hasher.update_u8(piece.kind as u8);
                hasher.update_u8(piece.owner.index() as u8);
                hasher.update_coord(piece.position);
            }

            hasher.update_u8(self.current_turn.index() as u8);
            hasher.update_u8(self.game_status as u8);
            hasher.update_tag(self.winner.map(|side| side.index() as u8));
            hasher.update_tag(self.end_reason.map(|reason| reason as u8));
            hasher.update_u32(self.scores.white);
            hasher.update_u32(self.scores.black);
        })
    }

    /// Piece at a coordinate.
    pub fn piece_at(&self, coord: Coord) -> Option<&Piece> {
        self.pieces.iter().find(|piece| piece.position == coord)
    }
}

// =============================================================================
// STATE MACHINE
// =============================================================================

/// Authoritative game state for one match.
#[derive(Clone, Debug)]
pub struct GameStateMachine {
    board: Board,
    turn: Side,
    status: GameStatus,
    winner: Option<Side>,
    end_reason: Option<EndReason>,
    version: u64,
    history: MoveHistory,
    scores: Scores,
    rules: Arc<dyn MoveLegality>,
}

impl GameStateMachine {
    /// Standard layout, waiting for players, `OpenBoard` legality.
    pub fn new() -> Self {
        Self::with_rules(Arc::new(OpenBoard))
    }

    /// Standard layout with a custom legality policy.
    pub fn with_rules(rules: Arc<dyn MoveLegality>) -> Self {
        Self::from_board(Board::standard(), rules)
    }

    /// Arbitrary starting board.
    pub fn from_board(board: Board, rules: Arc<dyn MoveLegality>) -> Self {
        Self {
            board,
            turn: Side::White,
            status: GameStatus::WaitingForPlayers,
            winner: None,
            end_reason: None,
            version: 0,
            history: MoveHistory::default(),
            scores: Scores::default(),
            rules,
        }
    }

    /// Board (read-only).
    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Side holding the turn.
    pub fn turn(&self) -> Side {
        self.turn
    }

    /// Lifecycle status.
    pub fn status(&self) -> GameStatus {
        self.status
    }

    /// Winner, if decided.
    pub fn winner(&self) -> Option<Side> {
        self.winner
    }

    /// End reason, if ended.
    pub fn end_reason(&self) -> Option<EndReason> {
        self.end_reason
    }

    /// State version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Applied moves.
    pub fn history(&self) -> &MoveHistory {
        &self.history
    }

    /// Capture scores.
    pub fn scores(&self) -> Scores {
        self.scores
    }

    /// Is the game accepting moves?
    pub fn is_active(&self) -> bool {
        self.status == GameStatus::InProgress
    }

    /// Is the game over?
    pub fn is_ended(&self) -> bool {
        self.status == GameStatus::Ended
    }

    /// Waiting -> in progress. Returns false if not waiting.
    pub fn start(&mut self) -> bool {
        if self.status != GameStatus::WaitingForPlayers {
            return false;
        }
        self.status = GameStatus::InProgress;
        self.version += 1;
        true
    }

    /// In progress -> ended. Returns false if the game was not in progress.
    pub fn end(&mut self, reason: EndReason, winner: Option<Side>) -> bool {
        if self.status != GameStatus::InProgress {
            return false;
        }
        self.status = GameStatus::Ended;
        self.end_reason = Some(reason);
        self.winner = winner;
        self.version += 1;
        true
    }

    /// `side` resigns; the opponent wins.
    pub fn resign(&mut self, side: Side) -> bool {
        self.end(EndReason::Resignation, Some(side.opponent()))
    }

    /// `side` is gone for good; the opponent wins.
    pub fn forfeit(&mut self, side: Side) -> bool {
        self.end(EndReason::Disconnection, Some(side.opponent()))
    }

    /// Validate and apply a move.
    pub fn apply_move(&mut self, mv: &Move) -> Result<StateDelta, MoveError> {
        let piece = self.validate(mv)?.clone();

        let captured = self.board.remove(mv.to);
        let moved = self.board.relocate(&piece.id, mv.to);
        debug_assert!(moved, "validated move failed to relocate {}", piece.id);

        if let Some(taken) = &captured {
            self.scores.credit(piece.owner, taken.kind);
        }

        let ply = self.history.len() as u32 + 1;
        self.history.push(MoveRecord {
            ply,
            side: piece.owner,
            piece_id: piece.id.clone(),
            kind: piece.kind,
            from: mv.from,
            to: mv.to,
            captured: captured.as_ref().map(|p| p.id.clone()),
        });

        self.turn = self.turn.opponent();
        self.version += 1;

        if captured.as_ref().is_some_and(|p| p.kind == PieceKind::King) {
            self.end(EndReason::KingCaptured, Some(piece.owner));
        }

        Ok(StateDelta {
            piece_id: piece.id,
            from: mv.from,
            to: mv.to,
            mover: piece.owner,
            captured: captured.map(|p| p.id),
            next_turn: self.turn,
            status: self.status,
        })
    }

    /// Run every check `apply_move` makes without touching state.
    pub fn validate(&self, mv: &Move) -> Result<&Piece, MoveError> {
        if self.status != GameStatus::InProgress {
            return Err(MoveError::GameNotActive);
        }

        let piece = self.board.piece(&mv.piece_id);

        if mv.side != self.turn || piece.is_some_and(|p| p.owner != self.turn) {
            return Err(MoveError::OutOfTurn { turn: self.turn });
        }

        let piece = match piece {
            Some(p) if p.position == mv.from && p.owner == mv.side => p,
            _ => {
                return Err(MoveError::InvalidPiece {
                    piece_id: mv.piece_id.clone(),
                    from: mv.from,
                    side: mv.side,
                })
            }
        };

        // Board invariants hold whatever the policy says.
        let own_square = self
            .board
            .piece_at(mv.to)
            .is_some_and(|occupant| occupant.owner == piece.owner);
        if !mv.to.is_on_board()
            || mv.to == mv.from
            || own_square
            || !self.rules.is_reachable(&self.board, piece, mv.to)
        {
            return Err(MoveError::IllegalDestination {
                piece_id: mv.piece_id.clone(),
                to: mv.to,
            });
        }

        Ok(piece)
    }

    /// Owned snapshot of the current state.
    pub fn snapshot(&self) -> GameState {
        GameState {
            pieces: self.board.pieces().cloned().collect(),
            current_turn: self.turn,
            game_status: self.status,
            winner: self.winner,
            end_reason: self.end_reason,
            version: self.version,
            scores: self.scores,
            last_move: self.history.last().cloned(),
        }
    }
}

impl Default for GameStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// TESTS
// =============================================================================
