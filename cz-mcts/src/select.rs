//! PUCT descent with per-selector visit reservation.
//!
//! Two selectors walk the tree in lockstep, each reserving a budget of
//! visits per batch. Every node crossed gets an in-flight increment for the
//! reserving selector, which pulls the Q seen by the other selector toward
//! a loss and keeps the pair off each other's paths.

use rustc_hash::FxHashMap;

use cz_core::Position;

use crate::node::{NodeId, NodeRecord, Terminal, CHILD_NONE, NULL_NODE, SELECTOR_COUNT};
use crate::params::SearchParams;
use crate::store::StoreError;
use crate::stats::SearchStats;
use crate::tree::{DrawnValue, Tree};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectorId {
    Primary,
    Secondary,
}

impl SelectorId {
    pub const ALL: [SelectorId; SELECTOR_COUNT] = [SelectorId::Primary, SelectorId::Secondary];

    pub fn index(self) -> usize {
        match self {
            SelectorId::Primary => 0,
            SelectorId::Secondary => 1,
        }
    }
}

/// How an emitted leaf resolves to a value at backup time.
#[derive(Clone, Copy, Debug)]
pub(crate) enum LeafValue {
    /// Waits for the evaluator result written to this batch slot.
    PendingEval { slot: usize },
    /// Same position as an earlier slot in this batch; copies its result
    /// and becomes transposition-linked to that node.
    PairedEval { source_slot: usize },
    Terminal(Terminal),
    /// Drawn from a transposition root's subtree during selection.
    Draw(DrawnValue),
}

/// One leaf emission: `(leaf, selector, reserved visits, value source)`.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Emission {
    pub node: NodeId,
    pub selector: SelectorId,
    pub visits: u32,
    pub value: LeafValue,
}

/// Per-batch selection scratch. Lives outside the node records and is
/// cleared once the batch has been backed up.
#[derive(Default)]
pub(crate) struct EvalBatch {
    pub emissions: Vec<Emission>,
    /// Positions needing an evaluator call, densely packed.
    pub positions: Vec<Position>,
    /// Node receiving each slot's result.
    pub slot_nodes: Vec<NodeId>,
    pub slot_hashes: Vec<u64>,
    /// `(leaf, selector)` -> emission index, for batch-aware multi-visit
    /// bumps. Keyed per selector so each emission releases exactly the
    /// reservations its own selector placed.
    by_node: FxHashMap<(NodeId, usize), usize>,
    /// Pending position hash -> slot, for deferred-link pairing.
    by_hash: FxHashMap<u64, usize>,
    /// Linked node -> values already drawn within this batch.
    pending_draws: FxHashMap<NodeId, u32>,
}

impl EvalBatch {
    pub fn clear(&mut self) {
        self.emissions.clear();
        self.positions.clear();
        self.slot_nodes.clear();
        self.slot_hashes.clear();
        self.by_node.clear();
        self.by_hash.clear();
        self.pending_draws.clear();
    }
}

/// Descend from the root until `budget` visits are reserved for `selector`,
/// appending emissions to `batch`. Returns the number of visits actually
/// reserved (short on store exhaustion or a pairing collision).
pub(crate) fn gather(
    tree: &mut Tree,
    params: &SearchParams,
    root_pos: &Position,
    selector: SelectorId,
    budget: u32,
    batch: &mut EvalBatch,
    stats: &mut SearchStats,
) -> Result<u32, StoreError> {
    let root = tree.root();
    let sel = selector.index();
    let mut reserved = 0u32;
    let mut path: Vec<NodeId> = Vec::with_capacity(64);

    'descents: while reserved < budget {
        path.clear();
        let mut pos = root_pos.clone();
        let mut node = root;
        tree.node_mut(root).n_in_flight[sel] += 1;
        path.push(root);

        loop {
            if tree.node(node).is_terminal() {
                let t = tree.node(node).terminal;
                if let Some(&idx) = batch.by_node.get(&(node, sel)) {
                    batch.emissions[idx].visits += 1;
                } else {
                    batch.by_node.insert((node, sel), batch.emissions.len());
                    batch.emissions.push(Emission {
                        node,
                        selector,
                        visits: 1,
                        value: LeafValue::Terminal(t),
                    });
                }
                reserved += 1;
                continue 'descents;
            }

            if tree.node(node).is_transposition_linked() {
                let src = tree.node(node).transposition_root;
                let taken = batch.pending_draws.get(&node).copied().unwrap_or(0);
                let cursor = tree.node(node).num_tx_extracted + taken;
                if let Some(value) = tree.extract_nth(src, cursor) {
                    *batch.pending_draws.entry(node).or_insert(0) += 1;
                    batch.emissions.push(Emission {
                        node,
                        selector,
                        visits: 1,
                        value: LeafValue::Draw(value),
                    });
                    stats.transposition_draws += 1;
                    reserved += 1;
                    continue 'descents;
                }
                // The link can no longer supply values; make the node
                // independent and re-examine it.
                if let Err(e) = tree.materialize(node) {
                    unwind(tree, sel, &path);
                    return Err(e);
                }
                stats.materializations += 1;
                continue;
            }

            if !tree.node(node).has_policy() {
                if let Some(&idx) = batch.by_node.get(&(node, sel)) {
                    batch.emissions[idx].visits += 1;
                } else {
                    let hash = pos.hash();
                    let value = if let Some(&source_slot) = batch.by_hash.get(&hash) {
                        if batch.slot_nodes[source_slot] == node {
                            // Same leaf, reserved by the other selector:
                            // share its evaluator slot.
                            LeafValue::PendingEval { slot: source_slot }
                        } else {
                            stats.deferred_pairings += 1;
                            LeafValue::PairedEval { source_slot }
                        }
                    } else {
                        let slot = batch.positions.len();
                        batch.slot_nodes.push(node);
                        batch.slot_hashes.push(hash);
                        batch.by_hash.insert(hash, slot);
                        batch.positions.push(pos);
                        LeafValue::PendingEval { slot }
                    };
                    batch.by_node.insert((node, sel), batch.emissions.len());
                    batch.emissions.push(Emission {
                        node,
                        selector,
                        visits: 1,
                        value,
                    });
                }
                reserved += 1;
                continue 'descents;
            }

            // Interior node: pick the PUCT-best child, expanding its record
            // on first touch.
            let slot = select_child(tree, params, node, node == root);
            let edge = tree.edges(node)[slot];
            let child = if edge.child == NULL_NODE {
                match create_child(tree, node, slot, &pos, stats) {
                    Ok(c) => c,
                    Err(e) => {
                        unwind(tree, sel, &path);
                        return Err(e);
                    }
                }
            } else {
                edge.child
            };
            pos.play(edge.mv)
                .expect("edge moves are generated from this position");
            tree.node_mut(child).n_in_flight[sel] += 1;
            path.push(child);
            node = child;
        }
    }

    Ok(reserved)
}

/// Release the in-flight reservations of one aborted descent.
fn unwind(tree: &mut Tree, sel: usize, path: &[NodeId]) {
    for &node in path {
        let rec = tree.node_mut(node);
        rec.n_in_flight[sel] = rec.n_in_flight[sel].saturating_sub(1);
    }
}

/// PUCT argmax over the node's edge block. Returns the chosen slot.
pub(crate) fn select_child(
    tree: &Tree,
    params: &SearchParams,
    node: NodeId,
    at_root: bool,
) -> usize {
    let rec = tree.node(node);
    let n_parent = rec.n_effective();
    let cpuct = params.cpuct(n_parent, at_root);
    let parent_term = if params.parent_term_exponent == 1.0 {
        (n_parent as f32).sqrt()
    } else {
        (n_parent as f32).powf(params.parent_term_exponent).sqrt()
    };
    let denom_exp = if at_root {
        params.root_denominator_exponent
    } else {
        1.0
    };
    let fpu = params.fpu_value(rec.q(), rec.sum_p_visited);

    let mut best_slot = 0usize;
    let mut best_score = f32::NEG_INFINITY;
    for (slot, edge) in tree.edges(node).iter().enumerate() {
        let (q, n_child) = if edge.child != NULL_NODE {
            let child = tree.node(edge.child);
            (-child.q_with_virtual_loss(), child.n_effective())
        } else {
            (fpu, 0)
        };
        let denom = if denom_exp == 1.0 {
            n_child as f32 + 1.0
        } else {
            (n_child as f32 + 1.0).powf(denom_exp)
        };
        let score = q + cpuct * edge.p * parent_term / denom;
        if score > best_score {
            best_score = score;
            best_slot = slot;
        }
    }
    best_slot
}

/// Allocate the node record for `(parent, slot)` and wire up the edge.
/// Terminal children are classified immediately; ongoing children are
/// checked against the transposition table and linked on a hit.
pub(crate) fn create_child(
    tree: &mut Tree,
    parent: NodeId,
    slot: usize,
    parent_pos: &Position,
    stats: &mut SearchStats,
) -> Result<NodeId, StoreError> {
    let edge = tree.edges(parent)[slot];
    debug_assert_eq!(edge.child, NULL_NODE);
    let child_pos = parent_pos
        .child(edge.mv)
        .expect("edge moves are generated from this position");
    let depth = tree.node(parent).depth.saturating_add(1);

    let mut rec = NodeRecord::new(parent, Some(edge.mv), edge.p, depth);
    rec.terminal = Terminal::from_outcome(child_pos.outcome());
    if rec.terminal.is_terminal() {
        rec.child_start = CHILD_NONE;
        rec.v = rec.terminal.value();
        match rec.terminal {
            Terminal::Win => rec.win_p = 1.0,
            Terminal::Loss => rec.loss_p = 1.0,
            _ => rec.draw_p = 1.0,
        }
    } else if let Some(canonical) = tree.lookup_position(child_pos.hash()) {
        rec.transposition_root = canonical;
        stats.transposition_links += 1;
    }

    let id = tree.store_mut().allocate_node(rec)?;
    let parent_rec = tree.node(parent);
    let offset = parent_rec.child_start as u32 + slot as u32;
    debug_assert_eq!(parent_rec.num_children_expanded as usize, slot);
    tree.store_mut().edge_mut(offset).child = id;
    tree.node_mut(parent).num_children_expanded += 1;
    Ok(id)
}
