use std::cell::Cell;

use cz_core::Position;
use cz_eval::{EvalError, Evaluator, PositionEval, UniformEvaluator};

use crate::limits::SearchLimit;
use crate::params::SearchParams;
use crate::search::{Search, StopReason};
use crate::SearchError;

fn small_params(batch_size: u32) -> SearchParams {
    SearchParams {
        batch_size,
        ..SearchParams::default()
    }
}

#[test]
fn search_runs_to_node_limit_and_produces_a_move() {
    let pos = Position::startpos();
    let limit = SearchLimit::nodes_per_move(200.0).unwrap();
    let mut search = Search::new(pos, limit, small_params(16)).unwrap();
    let evaluator = UniformEvaluator::default();

    let mut progress = search.step(&evaluator).unwrap();
    while !progress.done {
        progress = search.step(&evaluator).unwrap();
    }
    assert_eq!(progress.stop_reason, Some(StopReason::NodeLimit));
    assert!(progress.root_n >= 200);
    search.tree().verify().unwrap();

    let best = search.best().unwrap();
    assert!(best.n > 0);
    assert!(Position::startpos().legal_moves().contains(&best.best_move));
}

#[test]
fn zero_valued_evaluator_keeps_all_q_at_zero() {
    // UniformEvaluator's default WDL is symmetric, so every leaf backs up
    // exactly 0 and every Q must stay 0 while N accounts for every
    // reserved visit.
    let pos = Position::startpos();
    let limit = SearchLimit::nodes_per_move(1e9).unwrap();
    let batch = 16u32;
    let mut search = Search::new(pos, limit, small_params(batch)).unwrap();
    let evaluator = UniformEvaluator::default();

    search.step(&evaluator).unwrap(); // root bootstrap
    let steps = 4u32;
    for _ in 0..steps {
        search.step(&evaluator).unwrap();
    }

    let tree = search.tree();
    tree.verify().unwrap();
    let root = tree.root();
    assert_eq!(tree.node(root).n, steps * 2 * batch);
    for idx in 1..=tree.node_count() {
        let rec = tree.node(idx as u32);
        assert!(
            rec.q().abs() < 1e-6,
            "node {idx} has q {} after zero-valued backups",
            rec.q()
        );
        assert_eq!(rec.in_flight_total(), 0);
    }
}

#[test]
fn search_moves_restricts_root_expansion() {
    let pos = Position::startpos();
    let allowed = vec!["e2e4".parse().unwrap(), "d2d4".parse().unwrap()];
    let limit = SearchLimit::nodes_per_move(64.0)
        .unwrap()
        .with_search_moves(allowed.clone());
    let mut search = Search::new(pos, limit, small_params(8)).unwrap();
    let evaluator = UniformEvaluator::default();

    let mut progress = search.step(&evaluator).unwrap();
    while !progress.done {
        progress = search.step(&evaluator).unwrap();
    }

    let tree = search.tree();
    let root_moves: Vec<_> = tree.edges(tree.root()).iter().map(|e| e.mv).collect();
    assert_eq!(root_moves.len(), 2);
    for mv in root_moves {
        assert!(allowed.contains(&mv));
    }
}

#[test]
fn invalid_limit_is_rejected_at_construction() {
    match SearchLimit::nodes_per_move(-5.0) {
        Err(SearchError::InvalidLimit(_)) => {}
        other => panic!("expected InvalidLimit, got {other:?}"),
    }
}

#[test]
fn stop_request_finishes_the_search_cooperatively() {
    let pos = Position::startpos();
    let limit = SearchLimit::nodes_per_move(1e9).unwrap();
    let mut search = Search::new(pos, limit, small_params(8)).unwrap();
    let evaluator = UniformEvaluator::default();

    search.step(&evaluator).unwrap();
    search.step(&evaluator).unwrap();
    search.stop_handle().store(true, std::sync::atomic::Ordering::Relaxed);
    let progress = search.step(&evaluator).unwrap();
    assert!(progress.done);
    assert_eq!(progress.stop_reason, Some(StopReason::StopRequested));
    search.tree().verify().unwrap();
    assert!(search.best().is_some());
}

#[test]
fn terminal_root_never_calls_the_evaluator() {
    struct PanicEvaluator;
    impl Evaluator for PanicEvaluator {
        fn evaluate(&self, _batch: &[Position]) -> Result<Vec<PositionEval>, EvalError> {
            panic!("terminal roots must not be evaluated");
        }
    }

    // Fool's mate: checkmate, nothing to search.
    let moves = ["f2f3", "e7e5", "g2g4", "d8h4"]
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>();
    let pos = Position::from_start_and_moves(&moves).unwrap();
    let limit = SearchLimit::nodes_per_move(64.0).unwrap();
    let mut search = Search::new(pos, limit, small_params(8)).unwrap();

    let progress = search.step(&PanicEvaluator).unwrap();
    assert!(progress.done);
    assert_eq!(progress.stop_reason, Some(StopReason::RootTerminal));
    assert!(search.best().is_none());
}

#[test]
fn evaluator_failure_releases_reservations_and_aborts_the_step() {
    struct FailingEvaluator {
        calls: Cell<u32>,
        inner: UniformEvaluator,
    }
    impl Evaluator for FailingEvaluator {
        fn evaluate(&self, batch: &[Position]) -> Result<Vec<PositionEval>, EvalError> {
            let n = self.calls.get();
            self.calls.set(n + 1);
            if n >= 2 {
                return Err(EvalError::Backend("device lost".into()));
            }
            self.inner.evaluate(batch)
        }
    }

    let pos = Position::startpos();
    let limit = SearchLimit::nodes_per_move(1e9).unwrap();
    let mut search = Search::new(pos, limit, small_params(8)).unwrap();
    let evaluator = FailingEvaluator {
        calls: Cell::new(0),
        inner: UniformEvaluator::default(),
    };

    search.step(&evaluator).unwrap(); // bootstrap (call 1)
    search.step(&evaluator).unwrap(); // batch (call 2)
    let err = search.step(&evaluator).unwrap_err(); // call 3 fails
    assert!(matches!(err, SearchError::EvaluatorFailure(_)));

    // The tree survives with no reservation leaked.
    search.tree().verify().unwrap();
    assert!(search.best().is_some());
    let progress = search.step(&evaluator).unwrap();
    assert!(progress.done);
    assert_eq!(progress.stop_reason, Some(StopReason::EvaluatorFailed));
}

#[test]
fn store_exhaustion_aborts_but_preserves_the_tree() {
    let pos = Position::startpos();
    let limit = SearchLimit::nodes_per_move(1e9).unwrap();
    let params = small_params(64);
    let tree = crate::tree::Tree::new(48, false);
    let mut search = Search::with_tree(tree, pos, limit, params).unwrap();
    let evaluator = UniformEvaluator::default();

    let mut saw_exhaustion = false;
    for _ in 0..64 {
        match search.step(&evaluator) {
            Ok(p) if p.done => break,
            Ok(_) => {}
            Err(SearchError::StoreExhausted(_)) => {
                saw_exhaustion = true;
                break;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert!(saw_exhaustion);
    search.tree().verify().unwrap();
    assert!(search.best().is_some());
}

#[test]
fn root_noise_perturbs_priors_but_keeps_them_sorted() {
    let pos = Position::startpos();
    let limit = SearchLimit::nodes_per_move(64.0).unwrap();
    let mut params = small_params(8);
    params.root_noise = Some(crate::params::RootNoise {
        alpha: 0.3,
        epsilon: 0.25,
        seed: 7,
    });
    let mut search = Search::new(pos, limit, params).unwrap();
    let evaluator = UniformEvaluator::default();
    search.step(&evaluator).unwrap();

    let tree = search.tree();
    let edges = tree.edges(tree.root());
    assert_eq!(edges.len(), 20);
    let sum: f32 = edges.iter().map(|e| e.p).sum();
    assert!((sum - 1.0).abs() < 1e-4);
    assert!(edges.windows(2).all(|w| w[0].p >= w[1].p));
    // Uniform priors plus noise should no longer be uniform.
    assert!(edges.iter().any(|e| (e.p - 0.05).abs() > 1e-4));
}

#[test]
fn two_selectors_account_every_reserved_visit() {
    let pos = Position::startpos();
    let limit = SearchLimit::nodes_per_move(1e9).unwrap();
    let batch = 64u32;
    let mut search = Search::new(pos, limit, small_params(batch)).unwrap();
    let evaluator = UniformEvaluator::default();

    search.step(&evaluator).unwrap(); // bootstrap
    for _ in 0..10 {
        search.step(&evaluator).unwrap();
    }

    let tree = search.tree();
    tree.verify().unwrap();
    assert_eq!(tree.node(tree.root()).n, 1280);
    let leaked: u32 = (1..=tree.node_count())
        .map(|i| tree.node(i as u32).in_flight_total())
        .sum();
    assert_eq!(leaked, 0);
}
