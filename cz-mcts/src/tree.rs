//! Tree index over the node store: navigation helpers, the position-hash
//! transposition table, linked-value extraction, and materialization.

use rustc_hash::FxHashMap;

use cz_core::Position;

use crate::node::{
    EdgeSlot, NodeId, NodeRecord, Terminal, CHILD_NONE, CHILD_UNINIT, NULL_NODE,
};
use crate::store::{NodeStore, StoreError};

/// A value drawn from a transposition root's subtree, already re-oriented
/// to the borrowing node's perspective.
#[derive(Clone, Copy, Debug)]
pub struct DrawnValue {
    pub v: f32,
    pub m: f32,
    pub win_p: f32,
    pub draw_p: f32,
    pub loss_p: f32,
}

pub struct Tree {
    store: NodeStore,
    root: NodeId,
    /// Position hash -> canonical subtree root. Insert-once; the first
    /// recorded entry wins on collision.
    by_hash: FxHashMap<u64, NodeId>,
}

impl Tree {
    pub fn new(capacity: usize, expandable: bool) -> Self {
        Self {
            store: NodeStore::new(capacity, expandable),
            root: NULL_NODE,
            by_hash: FxHashMap::default(),
        }
    }

    /// Allocate a fresh root for a search over `pos`. Any previous search's
    /// nodes stay in the arena and remain reachable through the
    /// transposition table.
    pub fn attach_root(&mut self, pos: &Position) -> Result<NodeId, StoreError> {
        let depth = pos.ply().min(u16::MAX as usize) as u16;
        let rec = NodeRecord::new(NULL_NODE, None, 1.0, depth);
        let id = self.store.allocate_node(rec)?;
        self.root = id;
        Ok(id)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node_count(&self) -> usize {
        self.store.len()
    }

    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut NodeStore {
        &mut self.store
    }

    pub fn node(&self, id: NodeId) -> &NodeRecord {
        self.store.node(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut NodeRecord {
        self.store.node_mut(id)
    }

    /// The node's child-edge block; empty when the policy is unwritten or
    /// the node is proven childless.
    pub fn edges(&self, id: NodeId) -> &[EdgeSlot] {
        let rec = self.store.node(id);
        if rec.child_start <= 0 {
            return &[];
        }
        self.store
            .edge_block(rec.child_start as u32, rec.num_policy_moves as usize)
    }

    pub fn edges_mut(&mut self, id: NodeId) -> &mut [EdgeSlot] {
        let rec = self.store.node(id);
        let (start, count) = (rec.child_start, rec.num_policy_moves as usize);
        if start <= 0 {
            return &mut [];
        }
        self.store.edge_block_mut(start as u32, count)
    }

    /// Record `id` as the canonical node for `hash` unless one exists.
    /// Returns the canonical entry (which may be an earlier node).
    pub fn record_position(&mut self, hash: u64, id: NodeId) -> NodeId {
        *self.by_hash.entry(hash).or_insert(id)
    }

    pub fn lookup_position(&self, hash: u64) -> Option<NodeId> {
        self.by_hash.get(&hash).copied()
    }

    /// Number of values the subtree rooted at `id` can supply over a
    /// transposition link: nodes that own a value (policy written or
    /// terminal; linked borrowers are skipped).
    pub fn extractable_count(&self, id: NodeId) -> u32 {
        let mut count = 0u32;
        self.walk_extractable(id, |_, _| {
            count += 1;
            true
        });
        count
    }

    /// The `k`-th (0-based) value of the deterministic traversal of `id`'s
    /// subtree: preorder depth-first, children left-to-right by edge slot.
    /// The value is re-oriented to `id`'s side to move (negated at odd
    /// depths) and the moves-left estimate grows with the depth.
    pub fn extract_nth(&self, id: NodeId, k: u32) -> Option<DrawnValue> {
        let mut seen = 0u32;
        let mut found = None;
        self.walk_extractable(id, |node, depth| {
            if seen == k {
                found = Some(self.drawn_value(node, depth));
                false
            } else {
                seen += 1;
                true
            }
        });
        found
    }

    fn drawn_value(&self, id: NodeId, depth: u16) -> DrawnValue {
        let rec = self.store.node(id);
        let (v, w, d, l) = if rec.is_terminal() {
            let t = rec.terminal;
            match t {
                Terminal::Win => (1.0, 1.0, 0.0, 0.0),
                Terminal::Loss => (-1.0, 0.0, 0.0, 1.0),
                _ => (0.0, 0.0, 1.0, 0.0),
            }
        } else {
            (rec.v, rec.win_p, rec.draw_p, rec.loss_p)
        };
        let m = rec.m_position + depth as f32;
        if depth % 2 == 1 {
            DrawnValue {
                v: -v,
                m,
                win_p: l,
                draw_p: d,
                loss_p: w,
            }
        } else {
            DrawnValue {
                v,
                m,
                win_p: w,
                draw_p: d,
                loss_p: l,
            }
        }
    }

    /// Preorder DFS over own-value nodes. `f` returns false to stop early.
    fn walk_extractable(&self, id: NodeId, mut f: impl FnMut(NodeId, u16) -> bool) {
        let mut stack: Vec<(NodeId, u16)> = vec![(id, 0)];
        while let Some((node, depth)) = stack.pop() {
            let rec = self.store.node(node);
            if rec.is_transposition_linked() {
                continue;
            }
            let owns_value = rec.is_terminal() || rec.has_policy();
            if owns_value && !f(node, depth) {
                return;
            }
            let edges = self.edges(node);
            for edge in edges.iter().rev() {
                if edge.child != NULL_NODE {
                    stack.push((edge.child, depth + 1));
                }
            }
        }
    }

    /// Turn a transposition-linked node into an independent subtree root:
    /// copy the link target's evaluation and its move/prior list (all
    /// children unexpanded), then clear the link. Idempotent.
    pub fn materialize(&mut self, id: NodeId) -> Result<(), StoreError> {
        let src = self.store.node(id).transposition_root;
        if src == NULL_NODE {
            return Ok(());
        }
        debug_assert!(self.store.node(src).has_policy());

        let (v, win_p, draw_p, loss_p, m_position) = {
            let s = self.store.node(src);
            (s.v, s.win_p, s.draw_p, s.loss_p, s.m_position)
        };
        let moves: Vec<(cz_core::Move, f32)> = self
            .edges(src)
            .iter()
            .map(|e| (e.mv, e.p))
            .collect();

        let child_start = if moves.is_empty() {
            CHILD_NONE
        } else {
            let offset = self.store.allocate_children(moves.len())?;
            for (i, (mv, p)) in moves.iter().enumerate() {
                let slot = self.store.edge_mut(offset + i as u32);
                slot.mv = *mv;
                slot.p = *p;
                slot.child = NULL_NODE;
            }
            offset as i32
        };

        let rec = self.store.node_mut(id);
        rec.v = v;
        rec.win_p = win_p;
        rec.draw_p = draw_p;
        rec.loss_p = loss_p;
        rec.m_position = m_position;
        rec.child_start = child_start;
        rec.num_policy_moves = moves.len().min(u8::MAX as usize) as u8;
        rec.transposition_root = NULL_NODE;
        Ok(())
    }

    /// Materialize every linked node in the arena. Returns how many links
    /// were dissolved.
    pub fn materialize_all_transposition_links(&mut self) -> Result<usize, StoreError> {
        let mut dissolved = 0usize;
        for idx in 1..=self.store.len() {
            let id = idx as NodeId;
            if self.store.node(id).is_transposition_linked() {
                self.materialize(id)?;
                dissolved += 1;
            }
        }
        Ok(dissolved)
    }

    pub fn any_transposition_linked(&self) -> bool {
        (1..=self.store.len()).any(|idx| self.store.node(idx as NodeId).is_transposition_linked())
    }

    /// Check the structural invariants over the whole arena. Intended for
    /// quiescent points (no batch outstanding); meant to be driven by tests
    /// and debug builds.
    pub fn verify(&self) -> Result<(), String> {
        for idx in 1..=self.store.len() {
            let id = idx as NodeId;
            let rec = self.store.node(id);

            for (sel, &inf) in rec.n_in_flight.iter().enumerate() {
                if inf != 0 {
                    return Err(format!("node {id}: selector {sel} in-flight {inf} != 0"));
                }
            }

            if rec.child_start == CHILD_UNINIT || rec.child_start == CHILD_NONE {
                if rec.child_start == CHILD_NONE
                    && !rec.is_terminal()
                    && rec.num_policy_moves > 0
                {
                    return Err(format!("node {id}: childless but has policy moves"));
                }
            } else {
                if rec.num_policy_moves == 0 || rec.is_terminal() {
                    return Err(format!(
                        "node {id}: edge block present on terminal/empty node"
                    ));
                }
                let edges = self.edges(id);

                // Expanded children form a prefix.
                let expanded = edges.iter().take_while(|e| e.child != NULL_NODE).count();
                if edges[expanded..].iter().any(|e| e.child != NULL_NODE) {
                    return Err(format!("node {id}: expanded children are not a prefix"));
                }
                if expanded != rec.num_children_expanded as usize {
                    return Err(format!(
                        "node {id}: num_children_expanded {} != {}",
                        rec.num_children_expanded, expanded
                    ));
                }

                // Unexpanded tail sorted by prior, descending.
                let tail = &edges[expanded..];
                if tail.windows(2).any(|w| w[0].p < w[1].p) {
                    return Err(format!("node {id}: unexpanded edges not sorted by prior"));
                }

                if rec.num_children_visited > rec.num_policy_moves {
                    return Err(format!("node {id}: visited count exceeds policy moves"));
                }
            }

            // Visit accounting: n == n_self + sum over children (exact for
            // leaves, terminals, and linked borrowers alike).
            let child_sum: u64 = self
                .edges(id)
                .iter()
                .filter(|e| e.child != NULL_NODE)
                .map(|e| self.store.node(e.child).n as u64)
                .sum();
            if rec.n as u64 != rec.n_self as u64 + child_sum {
                return Err(format!(
                    "node {id}: n {} != n_self {} + children {}",
                    rec.n, rec.n_self, child_sum
                ));
            }

            if rec.is_transposition_linked() {
                if rec.num_children_expanded != 0 {
                    return Err(format!("node {id}: linked node has expanded children"));
                }
                let avail = self.extractable_count(rec.transposition_root);
                if rec.num_tx_extracted > avail {
                    return Err(format!(
                        "node {id}: extracted {} > available {}",
                        rec.num_tx_extracted, avail
                    ));
                }
                if rec.n != rec.n_self {
                    return Err(format!("node {id}: linked node has child visits"));
                }
            }
        }
        Ok(())
    }
}
