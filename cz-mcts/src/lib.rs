//! cz-mcts: the caissa search core.
//!
//! An arena of fixed-size node records (u32-indexed, never moved or freed
//! during a search) carries a PUCT tree built by two selectors that reserve
//! visits speculatively (virtual loss), an external-evaluator dispatch that
//! resolves leaves in batches, and a transposition table that lets one
//! physical subtree serve many logical nodes until they are materialized.
//!
//! The driver surface is [`Search`]: construct with a root position and a
//! [`SearchLimit`], call [`Search::step`] until the progress reports done,
//! then take [`Search::best`].

use thiserror::Error;

pub mod backup;
pub mod best;
pub mod limits;
pub mod node;
pub mod params;
pub mod search;
pub mod select;
pub mod stats;
pub mod store;
pub mod tree;

pub use best::{choose_best_move, BestMoveInfo};
pub use limits::{LimitKind, SearchLimit};
pub use node::{EdgeSlot, NodeId, NodeRecord, Terminal, NULL_NODE, SELECTOR_COUNT};
pub use params::{RootNoise, SearchParams};
pub use search::{Search, SearchProgress, StopReason};
pub use select::SelectorId;
pub use stats::SearchStats;
pub use store::{NodeStore, StoreError};
pub use tree::Tree;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Error family of the search core.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid search limit: {0}")]
    InvalidLimit(String),
    #[error(transparent)]
    StoreExhausted(#[from] StoreError),
    #[error("evaluator failure: {0}")]
    EvaluatorFailure(String),
    #[error("tree invariant violated: {0}")]
    Inconsistent(String),
}

/// PUCT scoring entry point kept public for the bench crate.
pub fn bench_select_child_v1(
    tree: &Tree,
    params: &SearchParams,
    node: NodeId,
    at_root: bool,
) -> usize {
    select::select_child(tree, params, node, at_root)
}


#[cfg(test)]
mod search_tests;
#[cfg(test)]
mod store_tests;
