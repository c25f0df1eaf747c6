//! Search counters, snapshotted into progress reports and event logs.

#[derive(Clone, Copy, Debug, Default)]
pub struct SearchStats {
    pub evaluator_calls: u64,
    pub evaluated_positions: u64,
    /// Nodes created with a transposition link.
    pub transposition_links: u64,
    /// Values drawn over links instead of evaluator calls.
    pub transposition_draws: u64,
    /// Same-position leaves paired within one batch.
    pub deferred_pairings: u64,
    pub materializations: u64,
    /// Largest evaluator batch dispatched so far.
    pub max_batch_fill: usize,
}
