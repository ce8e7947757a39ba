//! Pieces, Sides and Piece Identifiers

use std::fmt;
use serde::{Serialize, Deserialize};

use crate::core::coord::Coord;

// =============================================================================
// SIDE
// =============================================================================

/// One of the two players. White is side A (first paired), Black is side B.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Moves first; assigned to the first paired connection.
    White,
    /// Assigned to the second paired connection.
    Black,
}

impl Side {
    /// Both sides, in seat order.
    pub const ALL: [Side; 2] = [Side::White, Side::Black];

    /// The other side.
    #[inline]
    pub fn opponent(self) -> Side {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }

    /// Seat index (White = 0, Black = 1).
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Single-letter tag used inside piece ids (`W` / `B`).
    pub fn letter(self) -> char {
        match self {
            Side::White => 'W',
            Side::Black => 'B',
        }
    }

    /// Lowercase name as used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Side::White => "white",
            Side::Black => "black",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// PIECE KIND
// =============================================================================

/// Closed set of piece kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PieceKind {
    /// Pawn (`P`).
    Pawn = 0,
    /// Knight (`N`).
    Knight = 1,
    /// Bishop (`B`).
    Bishop = 2,
    /// Rook (`R`).
    Rook = 3,
    /// Queen (`Q`).
    Queen = 4,
    /// King (`K`). Capturing it ends the game.
    King = 5,
}

impl PieceKind {
    /// Letter used as the first character of a piece id.
    pub fn letter(self) -> char {
        match self {
            PieceKind::Pawn => 'P',
            PieceKind::Knight => 'N',
            PieceKind::Bishop => 'B',
            PieceKind::Rook => 'R',
            PieceKind::Queen => 'Q',
            PieceKind::King => 'K',
        }
    }

    /// English name, capitalized.
    pub fn name(self) -> &'static str {
        match self {
            PieceKind::Pawn => "Pawn",
            PieceKind::Knight => "Knight",
            PieceKind::Bishop => "Bishop",
            PieceKind::Rook => "Rook",
            PieceKind::Queen => "Queen",
            PieceKind::King => "King",
        }
    }

    /// Points awarded to the capturing side.
    ///
    /// Capturing the king ends the game, so it carries no points.
    pub fn value(self) -> u32 {
        match self {
            PieceKind::Pawn => 1,
            PieceKind::Knight => 3,
            PieceKind::Bishop => 3,
            PieceKind::Rook => 5,
            PieceKind::Queen => 9,
            PieceKind::King => 0,
        }
    }

    /// Back-rank order from file `a` to file `h`.
    pub const BACK_RANK: [PieceKind; 8] = [
        PieceKind::Rook,
        PieceKind::Knight,
        PieceKind::Bishop,
        PieceKind::Queen,
        PieceKind::King,
        PieceKind::Bishop,
        PieceKind::Knight,
        PieceKind::Rook,
    ];
}

// =============================================================================
// PIECE ID
// =============================================================================

/// Stable piece identifier, e.g. `PW1` (kind letter, side letter, ordinal).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PieceId(String);

impl PieceId {
    /// Wrap an arbitrary id string (as received from a client).
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Build the canonical id for a piece of the standard layout.
    pub fn compose(kind: PieceKind, side: Side, ordinal: u8) -> Self {
        Self(format!("{}{}{}", kind.letter(), side.letter(), ordinal))
    }

    /// Borrow as str.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PieceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PieceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// =============================================================================
// PIECE
// =============================================================================

/// A piece on the board.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Piece {
    /// Stable identifier.
    pub id: PieceId,
    /// Piece kind.
    #[serde(rename = "type")]
    pub kind: PieceKind,
    /// Owning side.
    #[serde(rename = "color")]
    pub owner: Side,
    /// Current coordinate.
    pub position: Coord,
}

impl Piece {
    /// Create a piece.
    pub fn new(id: PieceId, kind: PieceKind, owner: Side, position: Coord) -> Self {
        Self { id, kind, owner, position }
    }
}
