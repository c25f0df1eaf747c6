//! Node records and child-edge slots for the arena tree.
//!
//! A node is a fixed-size record addressed by a `NodeId`; its child edges
//! live as a contiguous block in a parallel arena (see `store`). Index 0 of
//! both arenas is reserved as the null sentinel.

use cz_core::{Move, Square};

pub type NodeId = u32;

/// Reserved null index in the node arena.
pub const NULL_NODE: NodeId = 0;

/// Number of concurrent selectors reserving visits on the tree.
pub const SELECTOR_COUNT: usize = 2;

/// `child_start` sentinel: policy not yet written.
pub const CHILD_UNINIT: i32 = 0;
/// `child_start` sentinel: proven to have no children.
pub const CHILD_NONE: i32 = -1;

/// Terminal classification from the perspective of the node's side to move.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Terminal {
    NonTerminal,
    Win,
    Loss,
    Draw,
}

impl Terminal {
    pub fn is_terminal(self) -> bool {
        self != Terminal::NonTerminal
    }

    /// Backup value of the terminal state for its own side to move.
    pub fn value(self) -> f32 {
        match self {
            Terminal::Win => 1.0,
            Terminal::Loss => -1.0,
            Terminal::NonTerminal | Terminal::Draw => 0.0,
        }
    }

    pub fn from_outcome(outcome: cz_core::Outcome) -> Self {
        match outcome {
            cz_core::Outcome::Ongoing => Terminal::NonTerminal,
            cz_core::Outcome::SideToMoveMated => Terminal::Loss,
            cz_core::Outcome::Draw => Terminal::Draw,
        }
    }
}

/// One slot in the child-edge arena.
#[derive(Clone, Copy, Debug)]
pub struct EdgeSlot {
    pub mv: Move,
    pub p: f32,
    /// 0 until the child node record is allocated.
    pub child: NodeId,
}

impl EdgeSlot {
    /// Placeholder used for the reserved slot 0 and freshly reserved blocks.
    pub fn null() -> Self {
        Self {
            mv: Move {
                from: Square::A1,
                to: Square::A1,
                promotion: None,
            },
            p: 0.0,
            child: NULL_NODE,
        }
    }
}

/// Fixed-size node record. See the field walk-through on each group.
#[derive(Clone, Debug)]
pub struct NodeRecord {
    pub parent: NodeId,
    /// Move that reached this node; `None` at a search root.
    pub prior_move: Option<Move>,
    /// Policy prior of the edge that reached this node.
    pub p: f32,

    // Own evaluation (written once, at expansion or terminal detection).
    pub v: f32,
    pub win_p: f32,
    pub draw_p: f32,
    pub loss_p: f32,
    pub m_position: f32,

    // Visit statistics.
    pub n: u32,
    /// Completed visits resolved at this node itself: its own evaluation,
    /// repeat visits to a terminal, and values drawn over a transposition
    /// link. Keeps `n == n_self + sum(child.n)` exact for every node shape.
    pub n_self: u32,
    /// Sum of backed-up values, side-to-move-oriented.
    pub w: f64,

    // Subtree aggregates (running means over backed-up samples).
    pub w_avg: f32,
    pub d_avg: f32,
    pub l_avg: f32,
    pub m_avg: f32,
    pub v_variance: f32,

    /// Speculative visit reservations, one counter per selector.
    pub n_in_flight: [u32; SELECTOR_COUNT],

    // Child-edge block.
    pub child_start: i32,
    pub num_policy_moves: u8,
    pub num_children_visited: u8,
    pub num_children_expanded: u8,
    /// Policy mass of children visited at least once.
    pub sum_p_visited: f32,

    pub terminal: Terminal,

    // Transposition linkage.
    pub transposition_root: NodeId,
    pub num_tx_extracted: u32,

    pub depth: u16,
}

impl NodeRecord {
    pub fn new(parent: NodeId, prior_move: Option<Move>, p: f32, depth: u16) -> Self {
        Self {
            parent,
            prior_move,
            p,
            v: 0.0,
            win_p: 0.0,
            draw_p: 0.0,
            loss_p: 0.0,
            m_position: 0.0,
            n: 0,
            n_self: 0,
            w: 0.0,
            w_avg: 0.0,
            d_avg: 0.0,
            l_avg: 0.0,
            m_avg: 0.0,
            v_variance: 0.0,
            n_in_flight: [0; SELECTOR_COUNT],
            child_start: CHILD_UNINIT,
            num_policy_moves: 0,
            num_children_visited: 0,
            num_children_expanded: 0,
            sum_p_visited: 0.0,
            terminal: Terminal::NonTerminal,
            transposition_root: NULL_NODE,
            num_tx_extracted: 0,
            depth,
        }
    }

    /// Sentinel record stored at index 0.
    pub fn null() -> Self {
        Self::new(NULL_NODE, None, 0.0, 0)
    }

    /// Mean value from this node's side to move.
    pub fn q(&self) -> f32 {
        if self.n == 0 {
            0.0
        } else {
            (self.w / self.n as f64) as f32
        }
    }

    pub fn in_flight_total(&self) -> u32 {
        self.n_in_flight.iter().sum()
    }

    /// Visit count including reservations, as seen by PUCT.
    pub fn n_effective(&self) -> u32 {
        self.n + self.in_flight_total()
    }

    /// Q with every reserved visit counted as a loss, pulling concurrent
    /// selectors away from paths that are already being evaluated.
    pub fn q_with_virtual_loss(&self) -> f32 {
        let vl = self.in_flight_total();
        let n_eff = self.n + vl;
        if n_eff == 0 {
            0.0
        } else {
            ((self.w - vl as f64) / n_eff as f64) as f32
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal.is_terminal()
    }

    pub fn is_transposition_linked(&self) -> bool {
        self.transposition_root != NULL_NODE
    }

    /// Whether the policy head has been written (edge block allocated).
    pub fn has_policy(&self) -> bool {
        self.child_start > 0
    }

    /// Fold one backed-up sample (weight `visits`) into `w` and the running
    /// aggregates. `n` must already include `visits`.
    pub fn accumulate(&mut self, sample: &ValueSample, visits: u32) {
        debug_assert!(self.n >= visits);
        let k = visits as f32;
        let n_new = self.n as f32;
        let n_old = n_new - k;

        let q_old = if n_old > 0.0 {
            (self.w / n_old as f64) as f32
        } else {
            0.0
        };
        self.w += sample.v as f64 * visits as f64;
        let q_new = (self.w / self.n as f64) as f32;

        self.w_avg += (sample.w - self.w_avg) * k / n_new;
        self.d_avg += (sample.d - self.d_avg) * k / n_new;
        self.l_avg += (sample.l - self.l_avg) * k / n_new;
        self.m_avg += (sample.m - self.m_avg) * k / n_new;
        self.v_variance = if n_old == 0.0 {
            0.0
        } else {
            (self.v_variance * n_old + k * (sample.v - q_old) * (sample.v - q_new)) / n_new
        };
    }
}

/// One backed-up evaluation, re-oriented at every step up the tree.
#[derive(Clone, Copy, Debug)]
pub struct ValueSample {
    pub v: f32,
    pub w: f32,
    pub d: f32,
    pub l: f32,
    pub m: f32,
}

impl ValueSample {
    pub fn from_wdl(win_p: f32, draw_p: f32, loss_p: f32, m: f32) -> Self {
        Self {
            v: (win_p - loss_p).clamp(-1.0, 1.0),
            w: win_p,
            d: draw_p,
            l: loss_p,
            m,
        }
    }

    pub fn from_terminal(t: Terminal) -> Self {
        match t {
            Terminal::Win => Self::from_wdl(1.0, 0.0, 0.0, 0.0),
            Terminal::Loss => Self::from_wdl(0.0, 0.0, 1.0, 0.0),
            Terminal::Draw | Terminal::NonTerminal => Self::from_wdl(0.0, 1.0, 0.0, 0.0),
        }
    }

    /// Re-orient for the parent: value negates, win/loss swap, the predicted
    /// game length grows by one ply.
    pub fn flipped(self) -> Self {
        Self {
            v: -self.v,
            w: self.l,
            d: self.d,
            l: self.w,
            m: self.m + 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn q_with_virtual_loss_pulls_toward_loss() {
        let mut rec = NodeRecord::new(NULL_NODE, None, 0.5, 0);
        rec.n = 4;
        rec.w = 2.0;
        assert!((rec.q() - 0.5).abs() < 1e-6);
        rec.n_in_flight[0] = 4;
        assert!(rec.q_with_virtual_loss() < rec.q());
    }

    #[test]
    fn sample_flip_is_an_involution() {
        let s = ValueSample::from_wdl(0.6, 0.3, 0.1, 12.0);
        let back = s.flipped().flipped();
        assert!((back.v - s.v).abs() < 1e-6);
        assert!((back.w - s.w).abs() < 1e-6);
        assert!((back.m - (s.m + 2.0)).abs() < 1e-6);
    }

    #[test]
    fn accumulate_tracks_mean_and_variance() {
        let mut rec = NodeRecord::new(NULL_NODE, None, 0.0, 0);
        for &v in &[1.0f32, -1.0, 1.0, -1.0] {
            rec.n += 1;
            let s = ValueSample {
                v,
                w: 0.0,
                d: 0.0,
                l: 0.0,
                m: 0.0,
            };
            rec.accumulate(&s, 1);
        }
        assert!(rec.q().abs() < 1e-6);
        assert!((rec.v_variance - 1.0).abs() < 1e-5);
    }
}
