//! Evaluator dispatch and value backup.
//!
//! A gathered batch is resolved in two moves: one evaluator call for every
//! pending slot, then a walk from each emitted leaf to the root adding the
//! (re-oriented) value, bumping `N`, and releasing the selector's in-flight
//! reservations. Both paths, success and evaluator failure, leave no
//! reservation behind.

use std::cmp::Ordering;

use cz_core::Move;
use cz_eval::{Evaluator, PositionEval};

use crate::node::{NodeId, ValueSample, CHILD_NONE, NULL_NODE};
use crate::params::SearchParams;
use crate::select::{EvalBatch, LeafValue};
use crate::stats::SearchStats;
use crate::store::StoreError;
use crate::tree::Tree;
use crate::SearchError;

/// Evaluate every pending slot and write the results into the tree.
/// On any failure the batch's reservations are released and the tree is
/// left exactly as consistent as before the step.
pub(crate) fn dispatch(
    tree: &mut Tree,
    params: &SearchParams,
    batch: &mut EvalBatch,
    evaluator: &dyn Evaluator,
    stats: &mut SearchStats,
) -> Result<(), SearchError> {
    if batch.positions.is_empty() {
        return Ok(());
    }

    let results = match evaluator.evaluate(&batch.positions) {
        Ok(r) => r,
        Err(e) => {
            release_reservations(tree, batch);
            return Err(SearchError::EvaluatorFailure(e.to_string()));
        }
    };
    if results.len() != batch.positions.len() {
        release_reservations(tree, batch);
        return Err(SearchError::EvaluatorFailure(format!(
            "expected {} results, got {}",
            batch.positions.len(),
            results.len()
        )));
    }

    stats.evaluator_calls += 1;
    stats.evaluated_positions += results.len() as u64;
    stats.max_batch_fill = stats.max_batch_fill.max(results.len());

    for (slot, eval) in results.into_iter().enumerate() {
        let node = batch.slot_nodes[slot];
        if let Err(e) = apply_eval(tree, params, node, &eval, None) {
            release_reservations(tree, batch);
            return Err(e.into());
        }
        tree.record_position(batch.slot_hashes[slot], node);
    }
    Ok(())
}

/// Write one evaluator result onto a leaf: value heads plus the sorted,
/// truncated policy edge block. `restrict` filters the kept moves (root
/// `searchmoves`).
pub(crate) fn apply_eval(
    tree: &mut Tree,
    params: &SearchParams,
    node: NodeId,
    eval: &PositionEval,
    restrict: Option<&[Move]>,
) -> Result<(), StoreError> {
    let mut priors: Vec<(Move, f32)> = eval
        .priors
        .iter()
        .filter(|(mv, _)| restrict.map_or(true, |allowed| allowed.contains(mv)))
        .map(|&(mv, p)| (mv, p.max(0.0)))
        .collect();

    let sum: f32 = priors.iter().map(|(_, p)| p).sum();
    if sum.is_finite() && sum > 0.0 {
        for (_, p) in &mut priors {
            *p /= sum;
        }
    } else if !priors.is_empty() {
        // Degenerate policy head; fall back to uniform over what we kept.
        let u = 1.0 / priors.len() as f32;
        for (_, p) in &mut priors {
            *p = u;
        }
    }

    priors.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    priors.truncate(params.policy_cap);
    let kept: f32 = priors.iter().map(|(_, p)| p).sum();
    if kept > 0.0 {
        for (_, p) in &mut priors {
            *p /= kept;
        }
    }

    let child_start = if priors.is_empty() {
        CHILD_NONE
    } else {
        let offset = tree.store_mut().allocate_children(priors.len())?;
        for (i, (mv, p)) in priors.iter().enumerate() {
            let slot = tree.store_mut().edge_mut(offset + i as u32);
            slot.mv = *mv;
            slot.p = *p;
            slot.child = NULL_NODE;
        }
        offset as i32
    };

    let rec = tree.node_mut(node);
    rec.win_p = eval.win_p.clamp(0.0, 1.0);
    rec.draw_p = eval.draw_p.clamp(0.0, 1.0);
    rec.loss_p = eval.loss_p.clamp(0.0, 1.0);
    rec.v = eval.value();
    rec.m_position = eval.moves_left.max(0.0);
    rec.child_start = child_start;
    rec.num_policy_moves = priors.len().min(u8::MAX as usize) as u8;
    Ok(())
}

/// Walk every emission from leaf to root: add the value, complete the
/// reserved visits, release the in-flight counters.
pub(crate) fn backup(tree: &mut Tree, batch: &mut EvalBatch) {
    let root = tree.root();
    let emissions = std::mem::take(&mut batch.emissions);
    for emission in &emissions {
        let leaf = emission.node;
        let sel = emission.selector.index();
        let visits = emission.visits;

        let sample = match emission.value {
            LeafValue::Terminal(t) => ValueSample::from_terminal(t),
            LeafValue::Draw(dv) => {
                let rec = tree.node_mut(leaf);
                rec.num_tx_extracted += visits;
                ValueSample::from_wdl(dv.win_p, dv.draw_p, dv.loss_p, dv.m)
            }
            LeafValue::PendingEval { slot } => {
                // Shared slots (both selectors on one leaf) read the same
                // written result.
                let rec = tree.node(batch.slot_nodes[slot]);
                ValueSample::from_wdl(rec.win_p, rec.draw_p, rec.loss_p, rec.m_position)
            }
            LeafValue::PairedEval { source_slot } => {
                let src = batch.slot_nodes[source_slot];
                let (w, d, l, m) = {
                    let s = tree.node(src);
                    (s.win_p, s.draw_p, s.loss_p, s.m_position)
                };
                let rec = tree.node_mut(leaf);
                rec.transposition_root = src;
                rec.num_tx_extracted = 1;
                ValueSample::from_wdl(w, d, l, m)
            }
        };

        tree.node_mut(leaf).n_self += visits;

        let mut node = leaf;
        let mut s = sample;
        loop {
            let (parent, first_visit, p) = {
                let rec = tree.node_mut(node);
                rec.n += visits;
                debug_assert!(rec.n_in_flight[sel] >= visits);
                rec.n_in_flight[sel] = rec.n_in_flight[sel].saturating_sub(visits);
                rec.accumulate(&s, visits);
                (rec.parent, rec.n == visits, rec.p)
            };

            if first_visit && parent != NULL_NODE {
                record_child_visited(tree, parent, node, p);
            }

            if node == root || parent == NULL_NODE {
                break;
            }
            node = parent;
            s = s.flipped();
        }
    }
    batch.clear();
}

/// First completed visit of a child: maintain the parent's visited-children
/// counter and visited policy mass. Visits land in slot order under plain
/// PUCT, so the counter normally just increments; an out-of-order visit
/// (possible after external tree surgery) takes the max instead.
fn record_child_visited(tree: &mut Tree, parent: NodeId, child: NodeId, child_p: f32) {
    let slot = tree
        .edges(parent)
        .iter()
        .position(|e| e.child == child)
        .unwrap_or(0);
    let rec = tree.node_mut(parent);
    debug_assert_eq!(rec.num_children_visited as usize, slot);
    rec.num_children_visited = rec.num_children_visited.max(slot as u8 + 1);
    rec.sum_p_visited += child_p;
}

/// Drop a batch without completing it: every emission's reservations are
/// walked back from leaf to root. Used on evaluator failure and store
/// exhaustion.
pub(crate) fn release_reservations(tree: &mut Tree, batch: &mut EvalBatch) {
    let root = tree.root();
    let emissions = std::mem::take(&mut batch.emissions);
    for emission in &emissions {
        let sel = emission.selector.index();
        let visits = emission.visits;
        let mut node = emission.node;
        loop {
            let rec = tree.node_mut(node);
            rec.n_in_flight[sel] = rec.n_in_flight[sel].saturating_sub(visits);
            let parent = rec.parent;
            if node == root || parent == NULL_NODE {
                break;
            }
            node = parent;
        }
    }
    batch.clear();
}
