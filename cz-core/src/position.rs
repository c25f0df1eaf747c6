//! Position wrapper: board state plus the hash history needed for
//! repetition detection and ply-depth seeding.

use cozy_chess::{Board, Color, GameStatus, Move};
use thiserror::Error;

use crate::moves::move_to_uci;

#[derive(Debug, Error)]
pub enum PositionError {
    #[error("invalid FEN `{fen}`: {reason}")]
    InvalidFen { fen: String, reason: String },
    #[error("illegal move `{0}`")]
    IllegalMove(String),
}

/// Game outcome from the perspective of the side to move.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Ongoing,
    /// The side to move is checkmated.
    SideToMoveMated,
    /// Stalemate, fifty-move rule, threefold repetition, or bare kings.
    Draw,
}

/// A chess position with the move-path context the search core needs.
///
/// The board itself is a `cozy_chess::Board`; `history` holds the zobrist
/// hashes of every earlier position on the path from the game start, which
/// gives us threefold detection and the root ply for depth seeding.
#[derive(Clone, Debug)]
pub struct Position {
    board: Board,
    history: Vec<u64>,
}

impl Position {
    pub fn startpos() -> Self {
        Self {
            board: Board::default(),
            history: Vec::new(),
        }
    }

    pub fn from_fen(fen: &str) -> Result<Self, PositionError> {
        let board = Board::from_fen(fen, false).map_err(|e| PositionError::InvalidFen {
            fen: fen.to_string(),
            reason: format!("{e:?}"),
        })?;
        Ok(Self {
            board,
            history: Vec::new(),
        })
    }

    /// Startpos followed by a sequence of UCI moves, as in `position startpos moves ...`.
    pub fn from_start_and_moves(moves: &[String]) -> Result<Self, PositionError> {
        let mut pos = Self::startpos();
        for m in moves {
            let mv = crate::moves::move_from_uci(&pos.board, m)
                .map_err(|_| PositionError::IllegalMove(m.clone()))?;
            pos.play(mv)?;
        }
        Ok(pos)
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn hash(&self) -> u64 {
        self.board.hash()
    }

    pub fn side_to_move(&self) -> Color {
        self.board.side_to_move()
    }

    /// Plies played before this position was reached.
    pub fn ply(&self) -> usize {
        self.history.len()
    }

    pub fn legal_moves(&self) -> Vec<Move> {
        let mut out = Vec::with_capacity(48);
        self.board.generate_moves(|mvs| {
            out.extend(mvs);
            false
        });
        out
    }

    /// Play `mv` in place, recording the outgoing position in the history.
    pub fn play(&mut self, mv: Move) -> Result<(), PositionError> {
        let hash = self.board.hash();
        self.board
            .try_play(mv)
            .map_err(|_| PositionError::IllegalMove(move_to_uci(&self.board, mv)))?;
        self.history.push(hash);
        Ok(())
    }

    /// The position after `mv`, leaving `self` untouched.
    pub fn child(&self, mv: Move) -> Result<Position, PositionError> {
        let mut next = self.clone();
        next.play(mv)?;
        Ok(next)
    }

    /// Terminal state of this position, repetition-aware.
    pub fn outcome(&self) -> Outcome {
        match self.board.status() {
            GameStatus::Won => return Outcome::SideToMoveMated,
            GameStatus::Drawn => return Outcome::Draw,
            GameStatus::Ongoing => {}
        }
        if self.board.halfmove_clock() >= 100 {
            return Outcome::Draw;
        }
        if self.board.occupied().len() == 2 {
            // Bare kings.
            return Outcome::Draw;
        }
        let here = self.board.hash();
        let repeats = 1 + self.history.iter().filter(|&&h| h == here).count();
        if repeats >= 3 {
            return Outcome::Draw;
        }
        Outcome::Ongoing
    }
}
