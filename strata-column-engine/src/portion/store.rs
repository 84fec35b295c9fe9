use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use arrow::record_batch::RecordBatch;
use rayon::prelude::*;
use strata_result::{Error, Result};
use strata_storage::pager::{BatchPut, Pager, get_one};
use strata_storage::serialization::{decode_batch, encode_batch};
use strata_types::{FIRST_PORTION_ID, PortionId, RowKey, SchemaId, Snapshot};

use super::PortionMeta;
use crate::config::ColumnEngineConfig;

/// How cold fetches behave.
#[derive(Clone, Copy, Debug)]
pub struct FetchPolicy {
    pub cache: bool,
    pub retries: u32,
    pub backoff: Duration,
}

impl From<&ColumnEngineConfig> for FetchPolicy {
    fn from(cfg: &ColumnEngineConfig) -> Self {
        Self {
            cache: cfg.cache_portion_batches,
            retries: cfg.fetch_retries,
            backoff: cfg.fetch_backoff,
        }
    }
}

/// A live (or retired) portion.
///
/// Shared through `Arc`; the blob is freed from the pager when a retired
/// portion's last reference drops.
pub struct Portion<P: Pager> {
    meta: PortionMeta,
    pager: Arc<P>,
    cached: RwLock<Option<RecordBatch>>,
    retired: AtomicBool,
}

impl<P: Pager> Portion<P> {
    pub fn meta(&self) -> &PortionMeta {
        &self.meta
    }

    #[inline]
    pub fn id(&self) -> PortionId {
        self.meta.portion_id
    }

    pub fn is_cached(&self) -> bool {
        self.cached
            .read()
            .expect("portion cache lock poisoned")
            .is_some()
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Schedule the blob for release once the last reference drops.
    pub(crate) fn mark_retired(&self) {
        self.retired.store(true, Ordering::Release);
    }

    /// Return the stored batch, reading it from the pager if it is cold.
    pub fn fetch(&self, policy: &FetchPolicy) -> Result<RecordBatch> {
        if let Some(batch) = self
            .cached
            .read()
            .expect("portion cache lock poisoned")
            .as_ref()
        {
            return Ok(batch.clone());
        }

        let mut attempt = 0u32;
        loop {
            match self.load() {
                Ok(batch) => {
                    if policy.cache {
                        *self.cached.write().expect("portion cache lock poisoned") =
                            Some(batch.clone());
                    }
                    return Ok(batch);
                }
                Err(err) if attempt < policy.retries => {
                    let delay = policy.backoff.saturating_mul(1u32 << attempt.min(16));
                    tracing::debug!(
                        "[PORTION] fetch of portion {} failed (attempt {}): {err}; retrying in {:?}",
                        self.id(),
                        attempt + 1,
                        delay
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        "[PORTION] giving up on portion {} after {} attempts: {err}",
                        self.id(),
                        attempt + 1
                    );
                    return Err(match err {
                        fetch @ Error::Fetch { .. } => fetch,
                        other => Error::fetch(self.id(), other),
                    });
                }
            }
        }
    }

    /// Drop the cached batch; the next fetch goes to the pager.
    pub fn evict(&self) {
        self.cached
            .write()
            .expect("portion cache lock poisoned")
            .take();
    }

    fn load(&self) -> Result<RecordBatch> {
        let id = self.id();
        let blob = get_one(self.pager.as_ref(), self.meta.blob_key)?.ok_or_else(|| {
            Error::fetch(id, format!("blob {} is missing", self.meta.blob_key))
        })?;
        let batch = decode_batch(blob.as_ref()).map_err(|err| Error::fetch(id, err))?;
        if batch.num_rows() as u64 != self.meta.row_count {
            return Err(Error::fetch(
                id,
                format!(
                    "decoded {} rows, metadata declares {}",
                    batch.num_rows(),
                    self.meta.row_count
                ),
            ));
        }
        Ok(batch)
    }
}

impl<P: Pager> fmt::Debug for Portion<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Portion")
            .field("meta", &self.meta)
            .field("cached", &self.is_cached())
            .field("retired", &self.is_retired())
            .finish()
    }
}

impl<P: Pager> Drop for Portion<P> {
    fn drop(&mut self) {
        if !self.is_retired() {
            return;
        }
        match self.pager.free_many(&[self.meta.blob_key]) {
            Ok(()) => tracing::trace!(
                "[PORTION] released portion {} (blob {})",
                self.meta.portion_id,
                self.meta.blob_key
            ),
            Err(err) => tracing::warn!(
                "[PORTION] failed to free blob {} of portion {}: {err}",
                self.meta.blob_key,
                self.meta.portion_id
            ),
        }
    }
}

/// Everything needed to create a portion except its identity.
#[derive(Debug, Clone)]
pub struct PortionDraft {
    /// Stored batch (user columns plus system columns).
    pub batch: RecordBatch,
    pub min_snapshot: Snapshot,
    pub max_snapshot: Snapshot,
    pub min_key: RowKey,
    pub max_key: RowKey,
    pub indexed: bool,
    pub keeps_history: bool,
}

impl PortionDraft {
    fn validate(&self) -> Result<()> {
        if self.min_snapshot > self.max_snapshot {
            return Err(Error::invalid_range(format!(
                "min snapshot {} is after max snapshot {}",
                self.min_snapshot, self.max_snapshot
            )));
        }
        if self.min_key > self.max_key {
            return Err(Error::invalid_range(format!(
                "min key {} is after max key {}",
                self.min_key, self.max_key
            )));
        }
        Ok(())
    }
}

/// Creates portions and owns the portion id sequence.
pub struct PortionStore<P: Pager> {
    pager: Arc<P>,
    schema_id: SchemaId,
    next_id: AtomicU64,
    policy: FetchPolicy,
}

impl<P: Pager> PortionStore<P> {
    pub fn new(pager: Arc<P>, schema_id: SchemaId, policy: FetchPolicy) -> Self {
        Self {
            pager,
            schema_id,
            next_id: AtomicU64::new(FIRST_PORTION_ID),
            policy,
        }
    }

    pub fn pager(&self) -> &Arc<P> {
        &self.pager
    }

    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    /// Id the next created portion will receive.
    pub fn next_portion_id(&self) -> PortionId {
        self.next_id.load(Ordering::SeqCst)
    }

    /// Never hand out an id at or below `id` again.
    pub fn resume_after(&self, id: PortionId) {
        self.next_id.fetch_max(id + 1, Ordering::SeqCst);
    }

    /// Validate, encode, and write one portion.
    pub fn create(&self, draft: PortionDraft) -> Result<Arc<Portion<P>>> {
        self.create_many(vec![draft])?
            .pop()
            .ok_or_else(|| Error::Internal("portion creation produced nothing".into()))
    }

    /// Create several portions with a single pager write.
    ///
    /// All drafts are validated before any blob is written.
    pub fn create_many(&self, drafts: Vec<PortionDraft>) -> Result<Vec<Arc<Portion<P>>>> {
        if drafts.is_empty() {
            return Ok(Vec::new());
        }
        for draft in &drafts {
            draft.validate()?;
        }

        let blobs = drafts
            .par_iter()
            .map(|draft| encode_batch(&draft.batch))
            .collect::<Result<Vec<_>>>()?;

        let keys = self.pager.alloc_many(drafts.len())?;
        let first_id = self
            .next_id
            .fetch_add(drafts.len() as u64, Ordering::SeqCst);

        let mut metas = Vec::with_capacity(drafts.len());
        let mut puts = Vec::with_capacity(drafts.len());
        for (idx, ((draft, bytes), key)) in drafts.iter().zip(blobs).zip(keys).enumerate() {
            metas.push(PortionMeta {
                portion_id: first_id + idx as u64,
                schema_id: self.schema_id,
                min_key: draft.min_key.clone(),
                max_key: draft.max_key.clone(),
                min_snapshot: draft.min_snapshot,
                max_snapshot: draft.max_snapshot,
                row_count: draft.batch.num_rows() as u64,
                indexed: draft.indexed,
                keeps_history: draft.keeps_history,
                blob_key: key,
                byte_size: bytes.len() as u64,
            });
            puts.push(BatchPut::Raw { key, bytes });
        }
        self.pager.batch_put(&puts)?;

        Ok(metas
            .into_iter()
            .zip(drafts)
            .map(|(meta, draft)| {
                tracing::trace!(
                    "[PORTION] created portion {} rows={} keys=[{}, {}] snapshots=[{}, {}] indexed={}",
                    meta.portion_id,
                    meta.row_count,
                    meta.min_key,
                    meta.max_key,
                    meta.min_snapshot,
                    meta.max_snapshot,
                    meta.indexed
                );
                let cached = self.policy.cache.then_some(draft.batch);
                Arc::new(Portion {
                    meta,
                    pager: Arc::clone(&self.pager),
                    cached: RwLock::new(cached),
                    retired: AtomicBool::new(false),
                })
            })
            .collect())
    }

    /// Rebuild a cold portion handle from persisted metadata.
    pub fn restore(&self, meta: PortionMeta) -> Arc<Portion<P>> {
        self.resume_after(meta.portion_id);
        Arc::new(Portion {
            meta,
            pager: Arc::clone(&self.pager),
            cached: RwLock::new(None),
            retired: AtomicBool::new(false),
        })
    }

    pub fn fetch(&self, portion: &Portion<P>) -> Result<RecordBatch> {
        portion.fetch(&self.policy)
    }

    pub fn evict(&self, portion: &Portion<P>) {
        portion.evict();
    }

    /// Give up this handle on a portion that will never become (or stay)
    /// live. The blob is freed once no other reference remains.
    pub fn release(&self, portion: Arc<Portion<P>>) {
        portion.mark_retired();
        drop(portion);
    }
}
