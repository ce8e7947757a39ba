//! Move Legality
//!
//! The state machine asks a [`MoveLegality`] policy whether a destination is
//! reachable. Piece-specific movement (check, castling, promotion) is a
//! policy concern and is not decided here.

use std::fmt::Debug;

use crate::core::coord::Coord;
use crate::game::board::Board;
use crate::game::piece::Piece;

/// Decides whether a piece may travel to a destination.
///
/// Implementations must be pure: no board mutation, same answer for the
/// same inputs. Only asked about on-board destinations other than the
/// source that the mover's own side does not hold; the state machine
/// rejects the rest itself.
pub trait MoveLegality: Send + Sync + Debug {
    /// Is `to` reachable for `piece` on `board`?
    fn is_reachable(&self, board: &Board, piece: &Piece, to: Coord) -> bool;
}

/// Permissive policy: any on-board square other than the source that is not
/// held by the mover's own side.
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenBoard;

impl MoveLegality for OpenBoard {
    fn is_reachable(&self, board: &Board, piece: &Piece, to: Coord) -> bool {
        if !to.is_on_board() || to == piece.position {
            return false;
        }

        match board.piece_at(to) {
            Some(occupant) => occupant.owner != piece.owner,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::piece::PieceId;

    fn piece(board: &Board, id: &str) -> Piece {
        board.piece(&PieceId::from(id)).cloned().unwrap()
    }

    #[test]
    fn test_open_board_accepts_empty_square() {
        let board = Board::standard();
        let pawn = piece(&board, "PW1");
        assert!(OpenBoard.is_reachable(&board, &pawn, Coord::new(4, 0)));
    }

    #[test]
    fn test_open_board_accepts_enemy_square() {
        let board = Board::standard();
        let pawn = piece(&board, "PW1");
        assert!(OpenBoard.is_reachable(&board, &pawn, Coord::new(1, 0)));
    }

    #[test]
    fn test_open_board_rejects_own_square() {
        let board = Board::standard();
        let rook = piece(&board, "RW1");
        assert!(!OpenBoard.is_reachable(&board, &rook, Coord::new(6, 0)));
    }

    #[test]
    fn test_open_board_rejects_off_board_and_null_move() {
        let board = Board::standard();
        let pawn = piece(&board, "PW1");
        assert!(!OpenBoard.is_reachable(&board, &pawn, Coord::new(-1, 0)));
        assert!(!OpenBoard.is_reachable(&board, &pawn, Coord::new(6, 8)));
        assert!(!OpenBoard.is_reachable(&board, &pawn, Coord::new(6, 0)));
    }
}
