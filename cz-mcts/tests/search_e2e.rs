//! End-to-end scenarios: a full search against mock evaluators, driven only
//! through the public surface.

use std::cell::Cell;

use cz_core::{move_from_uci, Position};
use cz_eval::{EvalError, Evaluator, PositionEval, UniformEvaluator};
use cz_mcts::{Search, SearchLimit, SearchParams};

/// Wraps another evaluator and counts calls/positions.
struct CountingEvaluator<E> {
    inner: E,
    calls: Cell<u64>,
    positions: Cell<u64>,
}

impl<E> CountingEvaluator<E> {
    fn new(inner: E) -> Self {
        Self {
            inner,
            calls: Cell::new(0),
            positions: Cell::new(0),
        }
    }
}

impl<E: Evaluator> Evaluator for CountingEvaluator<E> {
    fn evaluate(&self, batch: &[Position]) -> Result<Vec<PositionEval>, EvalError> {
        self.calls.set(self.calls.get() + 1);
        self.positions.set(self.positions.get() + batch.len() as u64);
        self.inner.evaluate(batch)
    }
}

fn run_to_done(search: &mut Search, evaluator: &dyn Evaluator) {
    loop {
        let progress = search.step(evaluator).unwrap();
        if progress.done {
            return;
        }
    }
}

#[test]
fn mate_in_one_is_found_with_a_flat_evaluator() {
    // The evaluator is value-blind everywhere; only the game rules mark the
    // position after Ra8# as terminal. 256 visits must still lock onto it.
    let pos = Position::from_fen("6k1/5ppp/8/8/8/8/5PPP/R5K1 w - - 0 1").unwrap();
    let limit = SearchLimit::nodes_per_move(256.0).unwrap();
    let params = SearchParams {
        batch_size: 16,
        ..SearchParams::default()
    };
    let mut search = Search::new(pos.clone(), limit, params).unwrap();
    let evaluator = UniformEvaluator {
        win_p: 0.5,
        draw_p: 0.0,
        loss_p: 0.5,
        moves_left: 30.0,
    };

    run_to_done(&mut search, &evaluator);

    let best = search.best().unwrap();
    let mate = move_from_uci(pos.board(), "a1a8").unwrap();
    assert_eq!(best.best_move, mate);
    assert!(
        (best.q - 1.0).abs() < 1e-6,
        "mating move must carry q = +1, got {}",
        best.q
    );
    assert!(best.n >= 128, "mate should dominate visits, got {}", best.n);
    search.tree().verify().unwrap();
}

#[test]
fn transposition_link_reuses_a_previous_search_without_evaluating() {
    // First search: 1.d4 d5 as the root, explored deeply.
    let first_root = Position::from_start_and_moves(&["d2d4".into(), "d7d5".into()]).unwrap();
    let limit = SearchLimit::nodes_per_move(300.0).unwrap();
    let params = SearchParams {
        batch_size: 16,
        ..SearchParams::default()
    };
    let evaluator = UniformEvaluator {
        win_p: 0.6,
        draw_p: 0.2,
        loss_p: 0.2,
        moves_left: 40.0,
    };
    let mut first = Search::new(first_root, limit, params.clone()).unwrap();
    run_to_done(&mut first, &evaluator);
    let first_root_n = {
        let tree = first.tree();
        tree.node(tree.root()).n
    };
    assert!(first_root_n >= 300);

    // Second search from 1.d4, restricted to the reply that transposes into
    // the first search's root. Its very first selection must take the link
    // and back up a non-zero value without an evaluator call.
    let second_root = Position::from_start_and_moves(&["d2d4".into()]).unwrap();
    let reply = move_from_uci(second_root.board(), "d7d5").unwrap();
    let second_limit = SearchLimit::nodes_per_move(1e9)
        .unwrap()
        .with_search_moves(vec![reply]);
    let second_params = SearchParams {
        batch_size: 4,
        ..SearchParams::default()
    };
    let counting = CountingEvaluator::new(evaluator);
    let mut second =
        Search::with_tree(first.into_tree(), second_root, second_limit, second_params).unwrap();

    second.step(&counting).unwrap(); // root bootstrap: one evaluator call
    second.step(&counting).unwrap(); // first batch: linked draws only
    assert_eq!(counting.calls.get(), 1, "the linked batch must not evaluate");
    assert_eq!(counting.positions.get(), 1);

    let stats = *second.stats();
    assert!(stats.transposition_links >= 1);
    assert!(stats.transposition_draws >= 1);

    let tree = second.tree();
    let root = tree.root();
    let edges = tree.edges(root);
    assert_eq!(edges.len(), 1, "searchmoves keeps exactly one root edge");
    let child = tree.node(edges[0].child);
    assert!(child.is_transposition_linked());
    assert!(child.n >= 2);
    // Drawn values alternate sign with depth, so Q may cancel; a non-zero
    // variance proves non-zero values were backed up.
    assert!(
        child.v_variance > 0.01 || child.q().abs() > 0.05,
        "linked backups must carry stored values (q {}, var {})",
        child.q(),
        child.v_variance
    );
    tree.verify().unwrap();
}

#[test]
fn materialization_dissolves_every_link_and_is_idempotent() {
    let first_root = Position::from_start_and_moves(&["g1f3".into(), "g8f6".into()]).unwrap();
    let params = SearchParams {
        batch_size: 8,
        ..SearchParams::default()
    };
    let evaluator = UniformEvaluator::default();
    let mut first = Search::new(
        first_root,
        SearchLimit::nodes_per_move(200.0).unwrap(),
        params.clone(),
    )
    .unwrap();
    run_to_done(&mut first, &evaluator);

    // Second search one ply earlier; its selections link into the first
    // search's subtrees.
    let second_root = Position::from_start_and_moves(&["g1f3".into()]).unwrap();
    let mut second = Search::with_tree(
        first.into_tree(),
        second_root,
        SearchLimit::nodes_per_move(150.0).unwrap(),
        params,
    )
    .unwrap();
    run_to_done(&mut second, &evaluator);
    assert!(second.stats().transposition_links >= 1);

    let dissolved = second.materialize_all_transposition_links().unwrap();
    assert!(dissolved >= 1);

    let snapshot: Vec<(u32, f64)> = {
        let tree = second.tree();
        (1..=tree.node_count())
            .map(|i| {
                let rec = tree.node(i as u32);
                (rec.n, rec.w)
            })
            .collect()
    };

    // Second call is a no-op: nothing linked, nothing changed.
    assert_eq!(second.materialize_all_transposition_links().unwrap(), 0);
    let tree = second.tree();
    assert!(!tree.any_transposition_linked());
    for (i, (n, w)) in snapshot.iter().enumerate() {
        let rec = tree.node((i + 1) as u32);
        assert_eq!(rec.n, *n);
        assert_eq!(rec.w, *w);
    }
    tree.verify().unwrap();
}

#[test]
fn deferred_pairing_evaluates_each_unique_position_once() {
    // From the start position, 1.Nf3 Nf6 2.g3 and 1.g3 Nf6 2.Nf3 collide on
    // the same position. Over a broad search the table plus in-batch
    // pairing must keep evaluator traffic strictly below the number of new
    // nodes created.
    let pos = Position::startpos();
    let limit = SearchLimit::nodes_per_move(2000.0).unwrap();
    let params = SearchParams {
        batch_size: 32,
        ..SearchParams::default()
    };
    let counting = CountingEvaluator::new(UniformEvaluator::default());
    let mut search = Search::new(pos, limit, params).unwrap();
    run_to_done(&mut search, &counting);

    let stats = *search.stats();
    let tree_nodes = search.tree().node_count() as u64;
    assert!(
        stats.evaluated_positions <= tree_nodes,
        "at most one evaluation per allocated node ({} evals, {} nodes)",
        stats.evaluated_positions,
        tree_nodes
    );
    search.tree().verify().unwrap();
}
