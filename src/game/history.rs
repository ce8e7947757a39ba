//! Move History and Capture Scores

use serde::{Serialize, Deserialize};

use crate::core::coord::Coord;
use crate::game::piece::{PieceId, PieceKind, Side};

/// One applied move.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRecord {
    /// 1-based ply number.
    pub ply: u32,
    /// Side that moved.
    pub side: Side,
    /// Moving piece.
    pub piece_id: PieceId,
    /// Kind of the moving piece.
    pub kind: PieceKind,
    /// Source square.
    pub from: Coord,
    /// Destination square.
    pub to: Coord,
    /// Piece removed from the destination, if any.
    pub captured: Option<PieceId>,
}

impl MoveRecord {
    /// Human notation, e.g. `W-Pawn a2 to a4` or `B-Queen d8 captures at d2`.
    pub fn notation(&self) -> String {
        let square = |c: Coord| c.notation().unwrap_or_else(|| c.to_string());
        let verb = if self.captured.is_some() { "captures at" } else { "to" };
        format!(
            "{}-{} {} {} {}",
            self.side.letter(),
            self.kind.name(),
            square(self.from),
            verb,
            square(self.to),
        )
    }
}

/// Points from captured material, per side.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scores {
    /// White's score.
    pub white: u32,
    /// Black's score.
    pub black: u32,
}

impl Scores {
    /// Credit `side` for capturing a piece of `kind`.
    pub fn credit(&mut self, side: Side, kind: PieceKind) {
        match side {
            Side::White => self.white += kind.value(),
            Side::Black => self.black += kind.value(),
        }
    }

    /// Score of one side.
    pub fn of(&self, side: Side) -> u32 {
        match side {
            Side::White => self.white,
            Side::Black => self.black,
        }
    }
}

/// Ordered list of applied moves.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MoveHistory {
    records: Vec<MoveRecord>,
}

impl MoveHistory {
    /// Append a record.
    pub fn push(&mut self, record: MoveRecord) {
        self.records.push(record);
    }

    /// Number of plies played.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// No moves yet.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Most recent move.
    pub fn last(&self) -> Option<&MoveRecord> {
        self.records.last()
    }

    /// All records in order.
    pub fn records(&self) -> &[MoveRecord] {
        &self.records
    }
}
