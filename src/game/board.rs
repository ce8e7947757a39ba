//! Board Grid and Piece Set
//!
//! The grid maps each square to an optional piece id; the piece set owns
//! the pieces themselves. Both are kept in lockstep by `relocate`/`remove`,
//! the only mutating operations.

use std::collections::BTreeMap;

use crate::BOARD_SIZE;
use crate::core::coord::Coord;
use crate::game::piece::{Piece, PieceId, PieceKind, Side};

/// 8x8 board with its piece set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Board {
    cells: [[Option<PieceId>; BOARD_SIZE]; BOARD_SIZE],
    /// BTreeMap for deterministic iteration (snapshots, hashing).
    pieces: BTreeMap<PieceId, Piece>,
}

impl Board {
    /// Empty board.
    pub fn empty() -> Self {
        Self {
            cells: Default::default(),
            pieces: BTreeMap::new(),
        }
    }

    /// Standard starting layout. White pawns are `PW1`..`PW8` on row 6.
    pub fn standard() -> Self {
        let mut board = Self::empty();

        for side in Side::ALL {
            let (back_row, pawn_row) = match side {
                Side::White => (7, 6),
                Side::Black => (0, 1),
            };

            let mut ordinals: BTreeMap<PieceKind, u8> = BTreeMap::new();
            for (col, kind) in PieceKind::BACK_RANK.iter().enumerate() {
                let ordinal = ordinals.entry(*kind).or_insert(0);
                *ordinal += 1;
                let id = PieceId::compose(*kind, side, *ordinal);
                board.place(Piece::new(id, *kind, side, Coord::new(back_row, col as i32)));
            }

            for col in 0..BOARD_SIZE {
                let id = PieceId::compose(PieceKind::Pawn, side, col as u8 + 1);
                board.place(Piece::new(id, PieceKind::Pawn, side, Coord::new(pawn_row, col as i32)));
            }
        }

        board
    }

    /// Place a piece on an empty, on-board square.
    ///
    /// Returns false (and leaves the board untouched) if the square is
    /// off-board, occupied, or the id is already in use.
    pub fn place(&mut self, piece: Piece) -> bool {
        let Some((row, col)) = piece.position.index() else {
            return false;
        };
        if self.cells[row][col].is_some() || self.pieces.contains_key(&piece.id) {
            return false;
        }

        self.cells[row][col] = Some(piece.id.clone());
        self.pieces.insert(piece.id.clone(), piece);
        true
    }

    /// Piece id at a coordinate.
    pub fn id_at(&self, coord: Coord) -> Option<&PieceId> {
        let (row, col) = coord.index()?;
        self.cells[row][col].as_ref()
    }

    /// Piece at a coordinate.
    pub fn piece_at(&self, coord: Coord) -> Option<&Piece> {
        self.id_at(coord).and_then(|id| self.pieces.get(id))
    }

    /// Piece by id.
    pub fn piece(&self, id: &PieceId) -> Option<&Piece> {
        self.pieces.get(id)
    }

    /// All pieces in id order.
    pub fn pieces(&self) -> impl Iterator<Item = &Piece> {
        self.pieces.values()
    }

    /// Number of pieces on the board.
    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// Remove the piece at a coordinate.
    pub fn remove(&mut self, coord: Coord) -> Option<Piece> {
        let (row, col) = coord.index()?;
        let id = self.cells[row][col].take()?;
        self.pieces.remove(&id)
    }

    /// Move a piece to an empty on-board square.
    ///
    /// Callers clear the destination first; a relocation onto an occupied
    /// square is refused.
    pub fn relocate(&mut self, id: &PieceId, to: Coord) -> bool {
        let Some((to_row, to_col)) = to.index() else {
            return false;
        };
        if self.cells[to_row][to_col].is_some() {
            return false;
        }
        let Some(piece) = self.pieces.get_mut(id) else {
            return false;
        };
        let Some((from_row, from_col)) = piece.position.index() else {
            return false;
        };

        self.cells[from_row][from_col] = None;
        self.cells[to_row][to_col] = Some(id.clone());
        piece.position = to;
        true
    }

    /// Check the grid/piece-set invariants.
    ///
    /// Every occupied cell names a piece in the set whose position is that
    /// cell, and every piece in the set is on exactly one cell.
    pub fn is_consistent(&self) -> bool {
        let mut seen = 0usize;
        for coord in Coord::all() {
            if let Some(id) = self.id_at(coord) {
                match self.pieces.get(id) {
                    Some(piece) if piece.position == coord => seen += 1,
                    _ => return false,
                }
            }
        }
        seen == self.pieces.len()
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_layout() {
        let board = Board::standard();
        assert_eq!(board.piece_count(), 32);
        assert!(board.is_consistent());

        let pawn = board.piece_at(Coord::new(6, 0)).unwrap();
        assert_eq!(pawn.id.as_str(), "PW1");
        assert_eq!(pawn.owner, Side::White);

        let king = board.piece_at(Coord::new(7, 4)).unwrap();
        assert_eq!(king.id.as_str(), "KW1");

        let black_rook = board.piece_at(Coord::new(0, 7)).unwrap();
        assert_eq!(black_rook.id.as_str(), "RB2");

        assert!(board.piece_at(Coord::new(4, 4)).is_none());
    }

    #[test]
    fn test_relocate_keeps_grid_in_sync() {
        let mut board = Board::standard();
        let id = PieceId::from("PW1");

        assert!(board.relocate(&id, Coord::new(4, 0)));
        assert!(board.id_at(Coord::new(6, 0)).is_none());
        assert_eq!(board.id_at(Coord::new(4, 0)), Some(&id));
        assert_eq!(board.piece(&id).unwrap().position, Coord::new(4, 0));
        assert!(board.is_consistent());
    }

    #[test]
    fn test_relocate_refuses_occupied_or_off_board() {
        let mut board = Board::standard();
        let id = PieceId::from("RW1");

        assert!(!board.relocate(&id, Coord::new(6, 0)));
        assert!(!board.relocate(&id, Coord::new(8, 0)));
        assert_eq!(board.piece(&id).unwrap().position, Coord::new(7, 0));
    }

    #[test]
    fn test_remove() {
        let mut board = Board::standard();
        let removed = board.remove(Coord::new(1, 3)).unwrap();
        assert_eq!(removed.id.as_str(), "PB4");
        assert_eq!(board.piece_count(), 31);
        assert!(board.is_consistent());
        assert!(board.remove(Coord::new(4, 4)).is_none());
    }

    #[test]
    fn test_place_rejects_duplicates() {
        let mut board = Board::empty();
        let piece = Piece::new(PieceId::from("KW1"), PieceKind::King, Side::White, Coord::new(7, 4));
        assert!(board.place(piece.clone()));
        assert!(!board.place(piece));

        let other = Piece::new(PieceId::from("KB1"), PieceKind::King, Side::Black, Coord::new(7, 4));
        assert!(!board.place(other));
    }
}
