//! Board Coordinates
//!
//! `(row, col)` addressing for the 8x8 board. Row 0 is Black's back rank,
//! row 7 is White's. Off-board values are representable so that a request
//! naming them can be rejected by the game rules instead of the decoder.

use std::fmt;
use serde::{Serialize, Deserialize};

use crate::BOARD_SIZE;

/// A board coordinate. Serialized on the wire as `[row, col]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "[i32; 2]", into = "[i32; 2]")]
pub struct Coord {
    /// Row index (0 = top, Black's back rank).
    pub row: i32,
    /// Column index (0 = file `a`).
    pub col: i32,
}

impl Coord {
    /// Create a coordinate.
    pub const fn new(row: i32, col: i32) -> Self {
        Self { row, col }
    }

    /// Check if the coordinate lies on the board.
    #[inline]
    pub fn is_on_board(self) -> bool {
        let size = BOARD_SIZE as i32;
        (0..size).contains(&self.row) && (0..size).contains(&self.col)
    }

    /// Grid indices, if on board.
    pub fn index(self) -> Option<(usize, usize)> {
        if self.is_on_board() {
            Some((self.row as usize, self.col as usize))
        } else {
            None
        }
    }

    /// Algebraic square name (`[7, 4]` -> `e1`).
    pub fn notation(self) -> Option<String> {
        let (row, col) = self.index()?;
        let file = (b'a' + col as u8) as char;
        Some(format!("{}{}", file, BOARD_SIZE - row))
    }

    /// Iterate over every on-board coordinate, row-major.
    pub fn all() -> impl Iterator<Item = Coord> {
        let size = BOARD_SIZE as i32;
        (0..size).flat_map(move |row| (0..size).map(move |col| Coord::new(row, col)))
    }
}

impl From<[i32; 2]> for Coord {
    fn from([row, col]: [i32; 2]) -> Self {
        Self::new(row, col)
    }
}

impl From<Coord> for [i32; 2] {
    fn from(coord: Coord) -> Self {
        [coord.row, coord.col]
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.row, self.col)
    }
}
