use std::time::Duration;

/// Tuning knobs for a [`ColumnEngine`](crate::ColumnEngine).
///
/// Loading these from files or flags is the embedder's job; the engine only
/// consumes the resolved values.
#[derive(Clone, Debug)]
pub struct ColumnEngineConfig {
    /// Keep decoded portion batches in memory after the first fetch.
    pub cache_portion_batches: bool,
    /// Extra attempts for a failed cold fetch before surfacing `Fetch`.
    pub fetch_retries: u32,
    /// Delay before the first fetch retry; doubles on every further attempt.
    pub fetch_backoff: Duration,
    /// Row ceiling for the inputs of one compaction task.
    pub max_rows_per_task: u64,
    /// Portion-count ceiling for the inputs of one compaction task.
    pub max_portions_per_task: usize,
    /// Maximum rows per portion written by compaction.
    pub target_portion_rows: usize,
    /// Unindexed portions in one cluster at which compaction becomes critical.
    pub critical_unindexed_portions: usize,
    /// How many times `compact` replans after losing a swap race.
    pub max_conflict_replans: u32,
    /// Upper bound on rows per batch emitted by a read stream.
    pub read_batch_rows: usize,
    /// Free blobs the persisted catalog does not reference when opening.
    pub collect_garbage_on_open: bool,
}

impl Default for ColumnEngineConfig {
    fn default() -> Self {
        Self {
            cache_portion_batches: true,
            fetch_retries: 3,
            fetch_backoff: Duration::from_millis(5),
            max_rows_per_task: 1 << 20,
            max_portions_per_task: 64,
            target_portion_rows: 64 * 1024,
            critical_unindexed_portions: 16,
            max_conflict_replans: 3,
            read_batch_rows: 8 * 1024,
            collect_garbage_on_open: true,
        }
    }
}
