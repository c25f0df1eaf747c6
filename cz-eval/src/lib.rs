//! cz-eval: the neural evaluator boundary.
//!
//! The search core never runs network inference itself; it hands batches of
//! positions to an [`Evaluator`] and gets back a win/draw/loss head, a
//! moves-left head, and policy priors per position. Real backends live
//! outside this workspace; the stubs here exist for tests, benches, and the
//! CLI driver.

use cz_core::{Move, Position};
use thiserror::Error;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("evaluator backend failure: {0}")]
    Backend(String),
    #[error("malformed evaluator output: {0}")]
    Malformed(String),
}

/// Evaluator output for one position.
///
/// `win_p`/`draw_p`/`loss_p` are from the perspective of the side to move;
/// `moves_left` is the predicted remaining game length in plies. `priors`
/// need not be normalized or complete; the core sorts, truncates, and
/// renormalizes over the legal moves it keeps.
#[derive(Clone, Debug)]
pub struct PositionEval {
    pub win_p: f32,
    pub draw_p: f32,
    pub loss_p: f32,
    pub moves_left: f32,
    pub priors: Vec<(Move, f32)>,
}

impl PositionEval {
    /// Scalar value in [-1, 1] from the side to move's perspective.
    pub fn value(&self) -> f32 {
        (self.win_p - self.loss_p).clamp(-1.0, 1.0)
    }
}

/// Batched evaluation contract.
///
/// Implementations must return exactly one [`PositionEval`] per input
/// position, in order. Any shortfall or surplus is treated by the core as a
/// fatal evaluator failure for the current step.
pub trait Evaluator {
    fn evaluate(&self, batch: &[Position]) -> Result<Vec<PositionEval>, EvalError>;
}

/// Uniform priors over legal moves with a fixed WDL head.
///
/// The default is value-symmetric (`win_p == loss_p`), which makes every
/// evaluation worth exactly 0 and keeps accounting tests simple.
#[derive(Clone, Debug)]
pub struct UniformEvaluator {
    pub win_p: f32,
    pub draw_p: f32,
    pub loss_p: f32,
    pub moves_left: f32,
}

impl Default for UniformEvaluator {
    fn default() -> Self {
        Self {
            win_p: 0.25,
            draw_p: 0.5,
            loss_p: 0.25,
            moves_left: 40.0,
        }
    }
}

impl Evaluator for UniformEvaluator {
    fn evaluate(&self, batch: &[Position]) -> Result<Vec<PositionEval>, EvalError> {
        Ok(batch
            .iter()
            .map(|pos| {
                let moves = pos.legal_moves();
                let p = if moves.is_empty() {
                    0.0
                } else {
                    1.0 / moves.len() as f32
                };
                PositionEval {
                    win_p: self.win_p,
                    draw_p: self.draw_p,
                    loss_p: self.loss_p,
                    moves_left: self.moves_left,
                    priors: moves.into_iter().map(|m| (m, p)).collect(),
                }
            })
            .collect())
    }
}
