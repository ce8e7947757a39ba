//! # Chess Sync Server
//!
//! Authoritative two-player chess server. Pairs incoming WebSocket
//! connections into matches, serializes their moves into one turn order and
//! broadcasts an identical view of the board to both players.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    CHESS SYNC SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/            - Primitives                               │
//! │  ├── coord.rs     - Board coordinates, algebraic notation    │
//! │  └── hash.rs      - State hashing for verification           │
//! │                                                              │
//! │  game/            - Game logic (no I/O)                      │
//! │  ├── piece.rs     - Sides, piece kinds, piece ids            │
//! │  ├── board.rs     - 8x8 grid and piece set                   │
//! │  ├── rules.rs     - Pluggable move legality                  │
//! │  ├── history.rs   - Move records and scores                  │
//! │  └── state.rs     - Game state machine, snapshots            │
//! │                                                              │
//! │  network/         - Networking                               │
//! │  ├── protocol.rs  - Message types                            │
//! │  ├── codec.rs     - Frame encode/decode                      │
//! │  ├── connection.rs- Connection handles and transports        │
//! │  ├── broadcast.rs - Identical fan-out to both players        │
//! │  ├── controller.rs- Per-match serialization point            │
//! │  ├── session.rs   - Admission, pairing, match registry       │
//! │  └── server.rs    - WebSocket listener                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ordering Guarantee
//!
//! Every inbound frame is stamped with a process-wide arrival sequence.
//! A match processes frames one at a time in that order, and every state
//! change is broadcast to both players before the next frame is looked at.
//! Both players therefore observe the same sequence of states.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::coord::Coord;
pub use game::state::{GameState, GameStateMachine, GameStatus, Move, MoveError};
pub use game::piece::{Piece, PieceId, PieceKind, Side};
pub use network::server::{GameServer, GameServerError, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Board edge length.
pub const BOARD_SIZE: usize = 8;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 8765;
