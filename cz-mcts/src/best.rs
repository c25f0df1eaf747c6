//! Best-move selection at search end.

use cz_core::Move;

use crate::node::{NodeId, NULL_NODE};
use crate::params::SearchParams;
use crate::tree::Tree;

/// The chosen root move plus the ranking context it was chosen in.
#[derive(Clone, Debug)]
pub struct BestMoveInfo {
    pub best_move_node: NodeId,
    pub best_move: Move,
    /// Visits of the chosen child.
    pub n: u32,
    /// Q of the chosen child from the root's perspective.
    pub q: f32,
    /// Stats of the pure visit-count winner (differs from the chosen child
    /// only when the moves-left bonus overrode it).
    pub best_n: u32,
    pub best_q: f32,
    /// Visits of the top child over the runner-up; infinite when unique.
    pub top_moves_n_ratio: f32,
    /// Moves-left bonus credited to the chosen child (0 when disabled or
    /// not engaged).
    pub mlh_bonus_applied: f32,
}

/// One visited root child, as exposed for logging.
#[derive(Clone, Copy, Debug)]
struct Candidate {
    node: NodeId,
    mv: Move,
    n: u32,
    q: f32,
    m_avg: f32,
}

/// Rank the root's visited children: visits first, Q as the tie-break, and
/// optionally a moves-left bonus that prefers shorter wins and longer
/// losses once Q is near decisive.
pub fn choose_best_move(tree: &Tree, params: &SearchParams) -> Option<BestMoveInfo> {
    let root = tree.root();
    if root == NULL_NODE {
        return None;
    }

    let mut candidates: Vec<Candidate> = tree
        .edges(root)
        .iter()
        .filter(|e| e.child != NULL_NODE)
        .filter_map(|e| {
            let child = tree.node(e.child);
            if child.n == 0 {
                return None;
            }
            Some(Candidate {
                node: e.child,
                mv: e.mv,
                n: child.n,
                q: -child.q(),
                m_avg: child.m_avg,
            })
        })
        .collect();
    if candidates.is_empty() {
        return None;
    }

    candidates.sort_by(|a, b| {
        b.n.cmp(&a.n)
            .then(b.q.partial_cmp(&a.q).unwrap_or(std::cmp::Ordering::Equal))
    });

    let top = candidates[0];
    let top_moves_n_ratio = match candidates.get(1) {
        Some(second) if second.n > 0 => top.n as f32 / second.n as f32,
        _ => f32::INFINITY,
    };

    // Children within the visit-tie window compete on Q plus the bonus.
    let floor = (top.n as f32 * (1.0 - params.n_tie_tolerance)).ceil() as u32;
    let mut chosen = top;
    let mut chosen_bonus = mlh_bonus(params, top, top.m_avg);
    let mut chosen_score = top.q + chosen_bonus;
    for cand in candidates.iter().skip(1).take_while(|c| c.n >= floor) {
        let bonus = mlh_bonus(params, *cand, top.m_avg);
        let score = cand.q + bonus;
        if score > chosen_score {
            chosen = *cand;
            chosen_bonus = bonus;
            chosen_score = score;
        }
    }

    Some(BestMoveInfo {
        best_move_node: chosen.node,
        best_move: chosen.mv,
        n: chosen.n,
        q: chosen.q,
        best_n: top.n,
        best_q: top.q,
        top_moves_n_ratio,
        mlh_bonus_applied: chosen_bonus,
    })
}

/// Moves-left bonus relative to the visit leader's expected length: when
/// winning, fewer expected moves score higher; when losing, more do.
fn mlh_bonus(params: &SearchParams, cand: Candidate, reference_m: f32) -> f32 {
    if params.mlh_bonus_factor == 0.0 || cand.q.abs() < params.mlh_q_threshold {
        return 0.0;
    }
    let shorter_by = (reference_m - cand.m_avg) / params.mlh_move_horizon.max(1.0);
    params.mlh_bonus_factor * cand.q.signum() * shorter_by.clamp(-1.0, 1.0)
}

/// Per-root-child summary rows for logs and the CLI verbose mode, sorted
/// by visits descending.
pub fn root_distribution(tree: &Tree) -> Vec<(Move, u32, f32, f32)> {
    let root = tree.root();
    if root == NULL_NODE {
        return Vec::new();
    }
    let mut rows: Vec<(Move, u32, f32, f32)> = tree
        .edges(root)
        .iter()
        .map(|e| {
            if e.child != NULL_NODE {
                let child = tree.node(e.child);
                (e.mv, child.n, -child.q(), e.p)
            } else {
                (e.mv, 0, 0.0, e.p)
            }
        })
        .collect();
    rows.sort_by(|a, b| b.1.cmp(&a.1));
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeRecord;
    use cz_core::Position;

    fn mv(s: &str) -> Move {
        s.parse().unwrap()
    }

    /// Root with two visited children: (visits, q from root's view, m_avg).
    fn two_child_root(a: (u32, f32, f32), b: (u32, f32, f32)) -> Tree {
        let mut tree = Tree::new(16, false);
        let root = tree.attach_root(&Position::startpos()).unwrap();
        let offset = tree.store_mut().allocate_children(2).unwrap();
        for (i, (m, p)) in [("e2e4", 0.5f32), ("d2d4", 0.5f32)].iter().enumerate() {
            let slot = tree.store_mut().edge_mut(offset + i as u32);
            slot.mv = mv(m);
            slot.p = *p;
        }
        {
            let rec = tree.node_mut(root);
            rec.child_start = offset as i32;
            rec.num_policy_moves = 2;
            rec.num_children_expanded = 2;
            rec.num_children_visited = 2;
            rec.sum_p_visited = 1.0;
        }
        for (i, (n, q, m_avg)) in [a, b].into_iter().enumerate() {
            let edge = tree.edges(root)[i];
            let mut rec = NodeRecord::new(root, Some(edge.mv), edge.p, 1);
            rec.n = n;
            rec.n_self = n;
            rec.w = -(q as f64) * n as f64;
            rec.m_avg = m_avg;
            let id = tree.store_mut().allocate_node(rec).unwrap();
            let o = tree.node(root).child_start as u32 + i as u32;
            tree.store_mut().edge_mut(o).child = id;
        }
        let total: u32 = a.0 + b.0;
        tree.node_mut(root).n = total;
        tree
    }

    #[test]
    fn ranks_by_visits_with_q_tiebreak() {
        let tree = two_child_root((100, 0.1, 40.0), (80, 0.5, 40.0));
        let info = choose_best_move(&tree, &SearchParams::default()).unwrap();
        assert_eq!(info.best_move, mv("e2e4"));
        assert_eq!(info.n, 100);
        assert_eq!(info.best_n, 100);
        assert!((info.top_moves_n_ratio - 100.0 / 80.0).abs() < 1e-6);
        assert_eq!(info.mlh_bonus_applied, 0.0);
    }

    #[test]
    fn near_tied_visits_fall_back_to_q() {
        let tree = two_child_root((1000, 0.10, 40.0), (995, 0.30, 40.0));
        let info = choose_best_move(&tree, &SearchParams::default()).unwrap();
        assert_eq!(info.best_move, mv("d2d4"));
        assert_eq!(info.best_n, 1000, "pure visit winner is still reported");
    }

    #[test]
    fn unique_candidate_reports_infinite_ratio() {
        let tree = two_child_root((50, 0.2, 40.0), (0, 0.0, 0.0));
        let info = choose_best_move(&tree, &SearchParams::default()).unwrap();
        assert!(info.top_moves_n_ratio.is_infinite());
    }

    #[test]
    fn mlh_bonus_prefers_the_shorter_win() {
        // Visits within 1%, both clearly winning, but d2d4 mates much
        // sooner.
        let long_win = (1000, 0.90, 60.0);
        let short_win = (995, 0.90, 12.0);

        let mut params = SearchParams::default();
        params.mlh_bonus_factor = 0.5;
        let tree = two_child_root(long_win, short_win);
        let info = choose_best_move(&tree, &params).unwrap();
        assert_eq!(info.best_move, mv("d2d4"));
        assert!(info.mlh_bonus_applied > 0.0);
        assert_eq!(info.best_n, 1000);

        // Disabled, the visit leader wins.
        params.mlh_bonus_factor = 0.0;
        let info = choose_best_move(&tree, &params).unwrap();
        assert_eq!(info.best_move, mv("e2e4"));
        assert_eq!(info.mlh_bonus_applied, 0.0);
    }

    #[test]
    fn mlh_bonus_prefers_the_longer_loss() {
        let quick_loss = (1000, -0.92, 10.0);
        let slow_loss = (995, -0.92, 55.0);
        let mut params = SearchParams::default();
        params.mlh_bonus_factor = 0.5;
        let tree = two_child_root(quick_loss, slow_loss);
        let info = choose_best_move(&tree, &params).unwrap();
        assert_eq!(info.best_move, mv("d2d4"));
    }
}
