//! The search driver: owns the tree for one search, advances it one batch
//! per `step`, and decides when the configured limit is spent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Gamma};

use cz_core::{Outcome, Position};
use cz_eval::Evaluator;

use crate::backup::{apply_eval, backup, dispatch};
use crate::best::{choose_best_move, root_distribution, BestMoveInfo};
use crate::limits::{LimitKind, SearchLimit};
use crate::node::NodeId;
use crate::params::{RootNoise, SearchParams};
use crate::select::{gather, EvalBatch, SelectorId};
use crate::stats::SearchStats;
use crate::tree::Tree;
use crate::SearchError;

/// Assumed throughput used to pre-size the store for time limits before any
/// NPS has been observed.
const PRIOR_NPS: f64 = 20_000.0;
/// Headroom multiplier between the node estimate and the arena capacity.
const CAPACITY_HEADROOM: u64 = 2;
const MIN_CAPACITY: usize = 1 << 12;
const MAX_PRESIZED_CAPACITY: usize = 1 << 24;

/// Why a search stopped advancing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    NodeLimit,
    TimeLimit,
    StopRequested,
    RootTerminal,
    StoreFull,
    EvaluatorFailed,
}

/// Snapshot returned by every `step`.
#[derive(Clone, Copy, Debug)]
pub struct SearchProgress {
    pub batches: u64,
    pub tree_nodes: usize,
    pub root_n: u32,
    pub root_q: f32,
    pub elapsed: Duration,
    pub done: bool,
    pub stop_reason: Option<StopReason>,
    pub stats: SearchStats,
}

/// One search over one root position. Construct with [`Search::new`], drive
/// with [`Search::step`] until `done`, then read [`Search::best`].
pub struct Search {
    tree: Tree,
    root_pos: Position,
    limit: SearchLimit,
    /// Per-move projection of `limit`, used for stopping and pre-sizing.
    move_limit: SearchLimit,
    params: SearchParams,
    stop: Arc<AtomicBool>,
    scratch: EvalBatch,
    started: Option<Instant>,
    batches: u64,
    stats: SearchStats,
    root_ready: bool,
    finished: Option<StopReason>,
}

impl Search {
    pub fn new(
        root_pos: Position,
        limit: SearchLimit,
        params: SearchParams,
    ) -> Result<Self, SearchError> {
        limit.validate()?;
        let move_limit = limit.converted_game_to_move_limit();
        let estimate = move_limit.estimate_nodes(PRIOR_NPS, false);
        let capacity = (estimate.saturating_mul(CAPACITY_HEADROOM) as usize)
            .clamp(MIN_CAPACITY, MAX_PRESIZED_CAPACITY);
        let tree = Tree::new(capacity, limit.search_can_be_expanded);
        Self::with_tree(tree, root_pos, limit, params)
    }

    /// Run a new search over an existing tree, keeping its nodes and
    /// transposition table. A fresh root is allocated; prior subtrees stay
    /// reachable as transposition link targets.
    pub fn with_tree(
        mut tree: Tree,
        root_pos: Position,
        limit: SearchLimit,
        params: SearchParams,
    ) -> Result<Self, SearchError> {
        limit.validate()?;
        let move_limit = limit.converted_game_to_move_limit();
        tree.attach_root(&root_pos)?;
        Ok(Self {
            tree,
            root_pos,
            limit,
            move_limit,
            params,
            stop: Arc::new(AtomicBool::new(false)),
            scratch: EvalBatch::default(),
            started: None,
            batches: 0,
            stats: SearchStats::default(),
            root_ready: false,
            finished: None,
        })
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Release the tree for reuse by a later search.
    pub fn into_tree(self) -> Tree {
        self.tree
    }

    pub fn limit(&self) -> &SearchLimit {
        &self.limit
    }

    pub fn stats(&self) -> &SearchStats {
        &self.stats
    }

    /// Request cooperative termination. In-flight work completes and backs
    /// up before the search reports done.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Shareable stop flag for an external time manager.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn best(&self) -> Option<BestMoveInfo> {
        choose_best_move(&self.tree, &self.params)
    }

    /// `(move, N, Q, P)` rows over the root children, most visited first.
    pub fn root_distribution(&self) -> Vec<(cz_core::Move, u32, f32, f32)> {
        root_distribution(&self.tree)
    }

    pub fn materialize_all_transposition_links(&mut self) -> Result<usize, SearchError> {
        let dissolved = self.tree.materialize_all_transposition_links()?;
        self.stats.materializations += dissolved as u64;
        Ok(dissolved)
    }

    /// Advance the search by one batch: both selectors reserve their visit
    /// budgets, the evaluator resolves the pending leaves, and every
    /// emission backs up. Returns the post-batch progress snapshot.
    pub fn step(&mut self, evaluator: &dyn Evaluator) -> Result<SearchProgress, SearchError> {
        if self.finished.is_some() {
            return Ok(self.progress());
        }
        let started = *self.started.get_or_insert_with(Instant::now);

        if self.stop.load(Ordering::Relaxed) {
            self.finished = Some(StopReason::StopRequested);
            return Ok(self.progress());
        }
        if self.root_pos.outcome() != Outcome::Ongoing {
            self.finished = Some(StopReason::RootTerminal);
            return Ok(self.progress());
        }

        if !self.root_ready {
            self.bootstrap_root(evaluator)?;
            self.root_ready = true;
        } else {
            if !self.tree.node(self.tree.root()).has_policy() {
                // No expandable root moves (e.g. searchmoves filtered them
                // all away); nothing to search.
                self.finished = Some(StopReason::RootTerminal);
                return Ok(self.progress());
            }
            let mut batch = std::mem::take(&mut self.scratch);
            let mut store_full: Option<SearchError> = None;
            for selector in SelectorId::ALL {
                match gather(
                    &mut self.tree,
                    &self.params,
                    &self.root_pos,
                    selector,
                    self.params.batch_size,
                    &mut batch,
                    &mut self.stats,
                ) {
                    Ok(_) => {}
                    Err(e) => {
                        store_full = Some(e.into());
                        break;
                    }
                }
            }

            // Resolve whatever was gathered either way so no reservation
            // outlives the step.
            match dispatch(
                &mut self.tree,
                &self.params,
                &mut batch,
                evaluator,
                &mut self.stats,
            ) {
                Ok(()) => {
                    backup(&mut self.tree, &mut batch);
                    self.scratch = batch;
                }
                Err(e) => {
                    self.finished = Some(match e {
                        SearchError::StoreExhausted(_) => StopReason::StoreFull,
                        _ => StopReason::EvaluatorFailed,
                    });
                    return Err(e);
                }
            }

            if let Some(e) = store_full {
                self.finished = Some(StopReason::StoreFull);
                return Err(e);
            }
        }

        self.batches += 1;

        if cfg!(debug_assertions) {
            if let Err(msg) = self.tree.verify() {
                return Err(SearchError::Inconsistent(msg));
            }
        }

        self.check_limits(started);
        Ok(self.progress())
    }

    /// Evaluate the root by itself so its policy (and any root noise) is in
    /// place before the selectors run. The root's own evaluation primes the
    /// tree but does not count as a reserved visit.
    fn bootstrap_root(&mut self, evaluator: &dyn Evaluator) -> Result<(), SearchError> {
        let root = self.tree.root();
        let evals = evaluator
            .evaluate(std::slice::from_ref(&self.root_pos))
            .map_err(|e| {
                self.finished = Some(StopReason::EvaluatorFailed);
                SearchError::EvaluatorFailure(e.to_string())
            })?;
        if evals.len() != 1 {
            self.finished = Some(StopReason::EvaluatorFailed);
            return Err(SearchError::EvaluatorFailure(format!(
                "expected 1 result for the root, got {}",
                evals.len()
            )));
        }
        self.stats.evaluator_calls += 1;
        self.stats.evaluated_positions += 1;

        if let Err(e) = apply_eval(
            &mut self.tree,
            &self.params,
            root,
            &evals[0],
            self.move_limit.search_moves.as_deref(),
        ) {
            self.finished = Some(StopReason::StoreFull);
            return Err(e.into());
        }
        if let Some(noise) = self.params.root_noise {
            apply_root_noise(&mut self.tree, root, noise);
        }
        // The root is a canonical position like any other; later searches
        // over the same tree may link against it.
        if self.tree.node(root).has_policy() {
            self.tree.record_position(self.root_pos.hash(), root);
        }
        Ok(())
    }

    fn check_limits(&mut self, started: Instant) {
        if self.finished.is_some() {
            return;
        }
        let root_n = self.tree.node(self.tree.root()).n as f64;
        match self.move_limit.kind {
            LimitKind::NodesPerMove | LimitKind::NodesForAllMoves => {
                if root_n >= self.move_limit.value {
                    self.finished = Some(StopReason::NodeLimit);
                }
            }
            LimitKind::SecondsPerMove | LimitKind::SecondsForAllMoves => {
                if started.elapsed().as_secs_f64() >= self.move_limit.value {
                    self.finished = Some(StopReason::TimeLimit);
                }
            }
        }
    }

    fn progress(&self) -> SearchProgress {
        let root = self.tree.root();
        let (root_n, root_q) = if root == crate::node::NULL_NODE {
            (0, 0.0)
        } else {
            let rec = self.tree.node(root);
            (rec.n, rec.q())
        };
        SearchProgress {
            batches: self.batches,
            tree_nodes: self.tree.node_count(),
            root_n,
            root_q,
            elapsed: self.started.map(|t| t.elapsed()).unwrap_or_default(),
            done: self.finished.is_some(),
            stop_reason: self.finished,
            stats: self.stats,
        }
    }
}

/// Mix Dirichlet noise into the root priors and restore the prior-sorted
/// edge order (all root children are unexpanded at bootstrap time).
fn apply_root_noise(tree: &mut Tree, root: NodeId, noise: RootNoise) {
    if !(noise.alpha > 0.0 && (0.0..=1.0).contains(&noise.epsilon) && noise.epsilon > 0.0) {
        return;
    }
    let count = tree.edges(root).len();
    if count == 0 {
        return;
    }

    let mut rng = ChaCha8Rng::seed_from_u64(noise.seed ^ 0x9E37_79B9_7F4A_7C15);
    let gamma = match Gamma::new(noise.alpha as f64, 1.0) {
        Ok(g) => g,
        Err(_) => return,
    };
    let mut eta: Vec<f64> = (0..count).map(|_| gamma.sample(&mut rng)).collect();
    let sum: f64 = eta.iter().sum();
    if !(sum.is_finite() && sum > 0.0) {
        return;
    }
    for e in &mut eta {
        *e /= sum;
    }

    let edges = tree.edges_mut(root);
    for (edge, eta) in edges.iter_mut().zip(eta.iter()) {
        edge.p = (1.0 - noise.epsilon) * edge.p + noise.epsilon * (*eta as f32);
    }
    edges.sort_by(|a, b| b.p.partial_cmp(&a.p).unwrap_or(std::cmp::Ordering::Equal));
}
