//! UCI move conversion.
//!
//! `cozy_chess` encodes castling as king-takes-rook (`e1h1`); standard UCI
//! wants the king's two-file hop (`e1g1`). Both directions are converted
//! here so the rest of the engine only ever sees board-native moves.

use cozy_chess::{Board, File, Move, Piece, Square};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MoveParseError {
    #[error("unparseable move `{0}`")]
    Unparseable(String),
    #[error("move `{0}` is not legal in this position")]
    Illegal(String),
}

/// Board-native move to standard UCI text.
pub fn move_to_uci(board: &Board, mv: Move) -> String {
    let stm = board.side_to_move();
    let is_castle = board.piece_on(mv.from) == Some(Piece::King)
        && board.color_on(mv.to) == Some(stm)
        && board.piece_on(mv.to) == Some(Piece::Rook);
    if is_castle {
        let file = if (mv.to.file() as usize) > (mv.from.file() as usize) {
            File::G
        } else {
            File::C
        };
        return format!("{}{}", mv.from, Square::new(file, mv.from.rank()));
    }
    mv.to_string()
}

/// Standard UCI text to a board-native move, checked for legality.
pub fn move_from_uci(board: &Board, s: &str) -> Result<Move, MoveParseError> {
    let mut mv: Move = s
        .parse()
        .map_err(|_| MoveParseError::Unparseable(s.to_string()))?;

    // A king hop from the e-file to g/c is standard-UCI castling; rewrite it
    // to the king-takes-rook form the board understands.
    if board.piece_on(mv.from) == Some(Piece::King) && mv.from.file() == File::E {
        let rights = board.castle_rights(board.side_to_move());
        let rank = mv.from.rank();
        if mv.to.rank() == rank {
            if mv.to.file() == File::G {
                if let Some(rook) = rights.short {
                    mv = Move {
                        from: mv.from,
                        to: Square::new(rook, rank),
                        promotion: None,
                    };
                }
            } else if mv.to.file() == File::C {
                if let Some(rook) = rights.long {
                    mv = Move {
                        from: mv.from,
                        to: Square::new(rook, rank),
                        promotion: None,
                    };
                }
            }
        }
    }

    let mut legal = false;
    board.generate_moves(|mvs| {
        if mvs.into_iter().any(|m| m == mv) {
            legal = true;
            return true;
        }
        false
    });
    if legal {
        Ok(mv)
    } else {
        Err(MoveParseError::Illegal(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cozy_chess::Board;

    #[test]
    fn plain_moves_round_trip() {
        let board = Board::default();
        let mv = move_from_uci(&board, "e2e4").unwrap();
        assert_eq!(move_to_uci(&board, mv), "e2e4");
    }

    #[test]
    fn castling_converts_both_ways() {
        let board = Board::from_fen(
            "r3k2r/pppppppp/8/8/8/8/PPPPPPPP/R3K2R w KQkq - 0 1",
            false,
        )
        .unwrap();
        let short = move_from_uci(&board, "e1g1").unwrap();
        // Board-native form targets the rook square.
        assert_eq!(short.to.to_string(), "h1");
        assert_eq!(move_to_uci(&board, short), "e1g1");

        let long = move_from_uci(&board, "e1c1").unwrap();
        assert_eq!(long.to.to_string(), "a1");
        assert_eq!(move_to_uci(&board, long), "e1c1");
    }

    #[test]
    fn illegal_move_is_rejected() {
        let board = Board::default();
        assert!(move_from_uci(&board, "e2e5").is_err());
        assert!(move_from_uci(&board, "zz99").is_err());
    }

    #[test]
    fn promotion_parses() {
        let board = Board::from_fen("8/5P1k/8/8/8/8/8/6K1 w - - 0 1", false).unwrap();
        let mv = move_from_uci(&board, "f7f8q").unwrap();
        assert_eq!(move_to_uci(&board, mv), "f7f8q");
    }
}
