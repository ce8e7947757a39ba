//! Network Layer
//!
//! WebSocket server, connection handles, pairing and per-match
//! serialization. All game rules live in `game/`.

pub mod protocol;
pub mod codec;
pub mod connection;
pub mod broadcast;
pub mod controller;
pub mod session;
pub mod server;

pub use protocol::{ClientMessage, ServerMessage, ErrorKind, MoveRequest, ServerError};
pub use codec::{decode, encode, DecodeError};
pub use connection::{memory_pair, ConnectionClosed, ConnectionConfig, ConnectionHandle, ConnectionId, Envelope, MemoryPeer};
pub use broadcast::{BroadcastDispatcher, Delivery};
pub use controller::{MatchConfig, MatchControl, MatchController, MatchId, MatchSummary};
pub use session::{Admission, SessionConfig, SessionCoordinator, SessionError};
pub use server::{GameServer, GameServerError, ServerConfig, ShutdownHandle};
