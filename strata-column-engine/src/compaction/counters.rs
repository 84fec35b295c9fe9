use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Running totals for compaction work.
#[derive(Debug, Default)]
pub struct CompactionCounters {
    pub tasks_planned: AtomicU64,
    pub tasks_committed: AtomicU64,
    pub tasks_aborted: AtomicU64,
    pub conflicts: AtomicU64,
    pub input_portions: AtomicU64,
    pub input_bytes: AtomicU64,
    pub input_rows: AtomicU64,
    pub output_portions: AtomicU64,
    pub output_rows: AtomicU64,
    /// Versions left visible by the deduplication pass.
    pub rows_filtered: AtomicU64,
    pub busy_micros: AtomicU64,
}

impl CompactionCounters {
    pub fn snapshot(&self) -> CompactionCountersSnapshot {
        CompactionCountersSnapshot {
            tasks_planned: self.tasks_planned.load(Ordering::Relaxed),
            tasks_committed: self.tasks_committed.load(Ordering::Relaxed),
            tasks_aborted: self.tasks_aborted.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            input_portions: self.input_portions.load(Ordering::Relaxed),
            input_bytes: self.input_bytes.load(Ordering::Relaxed),
            input_rows: self.input_rows.load(Ordering::Relaxed),
            output_portions: self.output_portions.load(Ordering::Relaxed),
            output_rows: self.output_rows.load(Ordering::Relaxed),
            rows_filtered: self.rows_filtered.load(Ordering::Relaxed),
            busy_micros: self.busy_micros.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn add(counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }

    pub(crate) fn record_duration(&self, elapsed: Duration) {
        Self::add(
            &self.busy_micros,
            u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
        );
    }
}

/// Point-in-time copy of [`CompactionCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionCountersSnapshot {
    pub tasks_planned: u64,
    pub tasks_committed: u64,
    pub tasks_aborted: u64,
    pub conflicts: u64,
    pub input_portions: u64,
    pub input_bytes: u64,
    pub input_rows: u64,
    pub output_portions: u64,
    pub output_rows: u64,
    pub rows_filtered: u64,
    pub busy_micros: u64,
}

impl CompactionCountersSnapshot {
    /// Rows compaction removed (overwritten versions and dropped tombstones).
    pub fn rows_dropped(&self) -> u64 {
        self.input_rows.saturating_sub(self.output_rows)
    }
}
