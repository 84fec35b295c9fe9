use crate::pager::{BatchGet, BatchPut, GetResult, Pager};
use crate::types::PhysicalKey;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use strata_result::Result;

/// A thread-safe container for pager I/O statistics.
#[derive(Debug, Default)]
pub struct IoStats {
    // --- Total individual items ---
    pub physical_gets: AtomicU64,
    pub physical_puts: AtomicU64,
    pub physical_frees: AtomicU64,
    pub physical_allocs: AtomicU64,

    // --- Total batch operations (i.e., calls to the pager) ---
    pub get_batches: AtomicU64,
    pub put_batches: AtomicU64,
    pub free_batches: AtomicU64,
    pub alloc_batches: AtomicU64,

    // --- Payload accounting ---
    pub missing_gets: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
}

impl IoStats {
    /// Capture a point-in-time snapshot of the accumulated metrics.
    pub fn snapshot(&self) -> IoStatsSnapshot {
        IoStatsSnapshot {
            physical_gets: self.physical_gets.load(Ordering::Relaxed),
            physical_puts: self.physical_puts.load(Ordering::Relaxed),
            physical_frees: self.physical_frees.load(Ordering::Relaxed),
            physical_allocs: self.physical_allocs.load(Ordering::Relaxed),
            get_batches: self.get_batches.load(Ordering::Relaxed),
            put_batches: self.put_batches.load(Ordering::Relaxed),
            free_batches: self.free_batches.load(Ordering::Relaxed),
            alloc_batches: self.alloc_batches.load(Ordering::Relaxed),
            missing_gets: self.missing_gets.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }

    /// Reset all statistics to zero.
    pub fn reset(&self) {
        for counter in [
            &self.physical_gets,
            &self.physical_puts,
            &self.physical_frees,
            &self.physical_allocs,
            &self.get_batches,
            &self.put_batches,
            &self.free_batches,
            &self.alloc_batches,
            &self.missing_gets,
            &self.bytes_read,
            &self.bytes_written,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Immutable copy of [`IoStats`] counters captured at a specific moment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoStatsSnapshot {
    pub physical_gets: u64,
    pub physical_puts: u64,
    pub physical_frees: u64,
    pub physical_allocs: u64,
    pub get_batches: u64,
    pub put_batches: u64,
    pub free_batches: u64,
    pub alloc_batches: u64,
    pub missing_gets: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl IoStatsSnapshot {
    /// Compute the delta between two snapshots (`newer - older`). Saturates at zero.
    pub fn delta_since(&self, older: &Self) -> Self {
        macro_rules! delta {
            ($field:ident) => {
                self.$field.saturating_sub(older.$field)
            };
        }

        Self {
            physical_gets: delta!(physical_gets),
            physical_puts: delta!(physical_puts),
            physical_frees: delta!(physical_frees),
            physical_allocs: delta!(physical_allocs),
            get_batches: delta!(get_batches),
            put_batches: delta!(put_batches),
            free_batches: delta!(free_batches),
            alloc_batches: delta!(alloc_batches),
            missing_gets: delta!(missing_gets),
            bytes_read: delta!(bytes_read),
            bytes_written: delta!(bytes_written),
        }
    }

    /// Average physical get operations per batch.
    pub fn gets_per_batch(&self) -> f64 {
        if self.get_batches == 0 {
            0.0
        } else {
            self.physical_gets as f64 / self.get_batches as f64
        }
    }
}

/// A wrapper around any Pager implementation that instruments I/O operations.
pub struct InstrumentedPager<P: Pager> {
    inner: P,
    stats: Arc<IoStats>,
}

impl<P> InstrumentedPager<P>
where
    P: Pager,
{
    /// Wraps a Pager and returns the instrumented version along with a handle
    /// to its statistics.
    pub fn new(inner: P) -> (Self, Arc<IoStats>) {
        let stats = Arc::new(IoStats::default());
        (
            Self {
                inner,
                stats: Arc::clone(&stats),
            },
            stats,
        )
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

impl<P> Pager for InstrumentedPager<P>
where
    P: Pager,
{
    type Blob = P::Blob;

    fn batch_get(&self, gets: &[BatchGet]) -> Result<Vec<GetResult<Self::Blob>>> {
        self.stats
            .physical_gets
            .fetch_add(gets.len() as u64, Ordering::Relaxed);
        self.stats.get_batches.fetch_add(1, Ordering::Relaxed);
        let results = self.inner.batch_get(gets)?;
        for r in &results {
            match r {
                GetResult::Raw { bytes, .. } => {
                    self.stats
                        .bytes_read
                        .fetch_add(bytes.as_ref().len() as u64, Ordering::Relaxed);
                }
                GetResult::Missing { .. } => {
                    self.stats.missing_gets.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        Ok(results)
    }

    fn batch_put(&self, puts: &[BatchPut]) -> Result<()> {
        self.stats
            .physical_puts
            .fetch_add(puts.len() as u64, Ordering::Relaxed);
        self.stats.put_batches.fetch_add(1, Ordering::Relaxed);
        for put in puts {
            match put {
                BatchPut::Raw { bytes, .. } => {
                    self.stats
                        .bytes_written
                        .fetch_add(bytes.len() as u64, Ordering::Relaxed);
                }
            }
        }
        self.inner.batch_put(puts)
    }

    fn alloc_many(&self, count: usize) -> Result<Vec<PhysicalKey>> {
        self.stats
            .physical_allocs
            .fetch_add(count as u64, Ordering::Relaxed);
        self.stats.alloc_batches.fetch_add(1, Ordering::Relaxed);
        self.inner.alloc_many(count)
    }

    fn free_many(&self, keys: &[PhysicalKey]) -> Result<()> {
        self.stats
            .physical_frees
            .fetch_add(keys.len() as u64, Ordering::Relaxed);
        self.stats.free_batches.fetch_add(1, Ordering::Relaxed);
        self.inner.free_many(keys)
    }

    fn enumerate_keys(&self) -> Result<Vec<PhysicalKey>> {
        self.inner.enumerate_keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pager::MemPager;

    #[test]
    fn counts_reads_writes_and_misses() {
        let (pager, stats) = InstrumentedPager::new(MemPager::new());
        let keys = pager.alloc_many(2).unwrap();
        pager
            .batch_put(&[BatchPut::Raw {
                key: keys[0],
                bytes: vec![1, 2, 3],
            }])
            .unwrap();
        pager
            .batch_get(&[BatchGet::Raw { key: keys[0] }, BatchGet::Raw { key: keys[1] }])
            .unwrap();
        pager.free_many(&keys).unwrap();

        let snap = stats.snapshot();
        assert_eq!(snap.physical_allocs, 2);
        assert_eq!(snap.bytes_written, 3);
        assert_eq!(snap.bytes_read, 3);
        assert_eq!(snap.missing_gets, 1);
        assert_eq!(snap.physical_frees, 2);
        assert_eq!(snap.gets_per_batch(), 2.0);

        let later = stats.snapshot();
        assert_eq!(later.delta_since(&snap), IoStatsSnapshot::default());
        stats.reset();
        assert_eq!(stats.snapshot(), IoStatsSnapshot::default());
    }
}
