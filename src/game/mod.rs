//! Game Logic Module
//!
//! Authoritative chess state. No networking, no clocks.
//!
//! ## Module Structure
//!
//! - `piece`: Sides, piece kinds and identifiers
//! - `board`: 8x8 grid and piece set
//! - `rules`: Pluggable move legality
//! - `history`: Move records and capture scores
//! - `state`: Game state machine and snapshots

pub mod piece;
pub mod board;
pub mod rules;
pub mod history;
pub mod state;

// Re-export key types
pub use piece::{Piece, PieceId, PieceKind, Side};
pub use board::Board;
pub use rules::{MoveLegality, OpenBoard};
pub use history::{MoveRecord, Scores};
pub use state::{EndReason, GameState, GameStateMachine, GameStatus, Move, MoveError, StateDelta};
