//! Shared fixtures for the caissa benches.

use cz_core::Position;
use cz_eval::UniformEvaluator;
use cz_mcts::{Search, SearchLimit, SearchParams};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// A search over the start position with a warm tree of roughly
/// `visits` completed visits.
pub fn warm_search(visits: f64, batch_size: u32) -> Search {
    let params = SearchParams {
        batch_size,
        ..SearchParams::default()
    };
    let limit = SearchLimit::nodes_per_move(visits).expect("static limit is valid");
    let mut search =
        Search::new(Position::startpos(), limit, params).expect("static limit is valid");
    let evaluator = UniformEvaluator::default();
    loop {
        let progress = search.step(&evaluator).expect("stub evaluator never fails");
        if progress.done {
            return search;
        }
    }
}

/// Like [`warm_search`], but stops after `steps` batches with the limit
/// still open, so the caller can keep stepping.
pub fn warm_search_open(steps: u32, batch_size: u32) -> Search {
    let params = SearchParams {
        batch_size,
        ..SearchParams::default()
    };
    let limit = SearchLimit::nodes_per_move(1e12).expect("static limit is valid");
    let mut search =
        Search::new(Position::startpos(), limit, params).expect("static limit is valid");
    let evaluator = UniformEvaluator::default();
    for _ in 0..steps {
        search.step(&evaluator).expect("stub evaluator never fails");
    }
    search
}
