//! Search resource limits.
//!
//! A `SearchLimit` is a value object describing when the driver should stop
//! a search: a node or time budget, per move or for the whole game. The
//! driver projects per-game budgets onto the current move and derives a
//! node-count estimate for store pre-sizing.

use std::fmt;
use std::ops::Mul;

use cz_core::Move;

use crate::SearchError;

/// Default moves-to-go horizon when a per-game budget carries none.
pub const GAME_HORIZON_MOVES: u32 = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LimitKind {
    NodesPerMove,
    SecondsPerMove,
    NodesForAllMoves,
    SecondsForAllMoves,
}

impl LimitKind {
    pub fn is_per_game(self) -> bool {
        matches!(self, LimitKind::NodesForAllMoves | LimitKind::SecondsForAllMoves)
    }

    pub fn is_time(self) -> bool {
        matches!(self, LimitKind::SecondsPerMove | LimitKind::SecondsForAllMoves)
    }

    /// Per-move counterpart of a per-game kind.
    fn per_move(self) -> LimitKind {
        match self {
            LimitKind::NodesForAllMoves => LimitKind::NodesPerMove,
            LimitKind::SecondsForAllMoves => LimitKind::SecondsPerMove,
            k => k,
        }
    }

    fn tag(self) -> &'static str {
        match self {
            LimitKind::NodesPerMove => "NM",
            LimitKind::SecondsPerMove => "SM",
            LimitKind::NodesForAllMoves => "NG",
            LimitKind::SecondsForAllMoves => "SG",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SearchLimit {
    pub kind: LimitKind,
    /// Nodes or seconds, depending on `kind`.
    pub value: f64,
    /// Per-move gain for per-game kinds; must be 0 otherwise.
    pub value_increment: f64,
    pub max_moves_to_go: Option<u32>,
    /// Whether the node store may grow past its pre-sized capacity.
    pub search_can_be_expanded: bool,
    /// Restriction of the root move set, when present.
    pub search_moves: Option<Vec<Move>>,
}

impl SearchLimit {
    pub fn new(kind: LimitKind, value: f64) -> Result<Self, SearchError> {
        Self::with_increment(kind, value, 0.0)
    }

    pub fn with_increment(
        kind: LimitKind,
        value: f64,
        value_increment: f64,
    ) -> Result<Self, SearchError> {
        let limit = Self {
            kind,
            value,
            value_increment,
            max_moves_to_go: None,
            search_can_be_expanded: false,
            search_moves: None,
        };
        limit.validate()?;
        Ok(limit)
    }

    pub fn nodes_per_move(value: f64) -> Result<Self, SearchError> {
        Self::new(LimitKind::NodesPerMove, value)
    }

    pub fn seconds_per_move(value: f64) -> Result<Self, SearchError> {
        Self::new(LimitKind::SecondsPerMove, value)
    }

    pub fn nodes_for_all_moves(value: f64, increment: f64) -> Result<Self, SearchError> {
        Self::with_increment(LimitKind::NodesForAllMoves, value, increment)
    }

    pub fn seconds_for_all_moves(value: f64, increment: f64) -> Result<Self, SearchError> {
        Self::with_increment(LimitKind::SecondsForAllMoves, value, increment)
    }

    pub fn with_search_moves(mut self, moves: Vec<Move>) -> Self {
        self.search_moves = Some(moves);
        self
    }

    pub fn with_max_moves_to_go(mut self, moves: u32) -> Self {
        self.max_moves_to_go = Some(moves);
        self
    }

    pub fn expandable(mut self, yes: bool) -> Self {
        self.search_can_be_expanded = yes;
        self
    }

    pub fn validate(&self) -> Result<(), SearchError> {
        if !self.value.is_finite() || self.value < 0.0 {
            return Err(SearchError::InvalidLimit(format!(
                "limit value must be finite and >= 0, got {}",
                self.value
            )));
        }
        if !self.value_increment.is_finite() || self.value_increment < 0.0 {
            return Err(SearchError::InvalidLimit(format!(
                "limit increment must be finite and >= 0, got {}",
                self.value_increment
            )));
        }
        if self.value_increment > 0.0 && !self.kind.is_per_game() {
            return Err(SearchError::InvalidLimit(
                "increment is only meaningful for per-game limits".to_string(),
            ));
        }
        Ok(())
    }

    /// Add the per-move increment to a per-game budget; per-move limits are
    /// returned unchanged.
    pub fn with_increment_applied(&self) -> Self {
        let mut out = self.clone();
        if self.kind.is_per_game() {
            out.value += self.value_increment;
        }
        out
    }

    /// Project a per-game budget onto the current move: remaining budget
    /// spread over the moves-to-go horizon, plus the increment. Per-move
    /// limits pass through untouched, which makes this idempotent.
    pub fn converted_game_to_move_limit(&self) -> Self {
        if !self.kind.is_per_game() {
            return self.clone();
        }
        let horizon = self.max_moves_to_go.unwrap_or(GAME_HORIZON_MOVES).max(1) as f64;
        let mut out = self.clone();
        out.kind = self.kind.per_move();
        out.value = self.value / horizon + self.value_increment;
        out.value_increment = 0.0;
        out
    }

    /// Heuristic node-count estimate for store pre-sizing. `observed_nps`
    /// says whether `nps` is measured throughput or a prior guess; short
    /// time slices against a guess are scaled down, since the first batches
    /// dominate and run well under steady-state speed.
    pub fn estimate_nodes(&self, nps: f64, observed_nps: bool) -> u64 {
        let horizon = self.max_moves_to_go.unwrap_or(GAME_HORIZON_MOVES).max(1) as f64;
        match self.kind {
            LimitKind::NodesPerMove => self.value as u64,
            LimitKind::NodesForAllMoves => (self.value / horizon) as u64,
            LimitKind::SecondsPerMove | LimitKind::SecondsForAllMoves => {
                let secs = if self.kind.is_per_game() {
                    self.value / horizon
                } else {
                    self.value
                };
                let mut est = secs * nps;
                if secs < 0.1 && !observed_nps {
                    est *= 0.3;
                }
                est.max(1.0) as u64
            }
        }
    }
}

impl Mul<f64> for SearchLimit {
    type Output = SearchLimit;

    fn mul(self, factor: f64) -> SearchLimit {
        debug_assert!(factor.is_finite() && factor > 0.0);
        let mut out = self;
        out.value *= factor;
        out.value_increment *= factor;
        out
    }
}

impl fmt::Display for SearchLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}, {}", self.kind.tag(), self.value)?;
        if self.value_increment > 0.0 {
            write!(f, " + {}", self.value_increment)?;
        }
        if let Some(moves) = self.max_moves_to_go {
            write!(f, " Moves {moves}")?;
        }
        if let Some(search_moves) = &self.search_moves {
            write!(f, " searchmoves")?;
            for mv in search_moves {
                write!(f, " {mv}")?;
            }
        }
        write!(f, ">")
    }
}
