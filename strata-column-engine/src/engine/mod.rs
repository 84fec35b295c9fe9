//! The column engine: ingestion, the live portion set, and persistence.
//!
//! All mutation of the live set goes through [`ColumnEngine::publish`], a
//! copy-on-write swap guarded by the set version. Readers clone the current
//! `Arc<PortionSet>` and never hold the lock while touching blobs.

mod read;

pub use read::{EngineSnapshotView, ReadRequest, ReadStream};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use arrow::record_batch::RecordBatch;
use rustc_hash::FxHashSet;
use strata_result::{Error, Result};
use strata_storage::constants::CATALOG_ROOT_PKEY;
use strata_storage::pager::{BatchPut, Pager, get_one};
use strata_types::{PortionId, Snapshot};

use crate::catalog::{PortionCatalog, encode_schema};
use crate::compaction::{BusyPortions, CompactionCounters};
use crate::config::ColumnEngineConfig;
use crate::observer::{EngineObserver, ObserverSlot};
use crate::portion::{FetchPolicy, PortionDraft, PortionStore};
use crate::portion_set::PortionSet;
use crate::rows::KeyColumns;
use crate::schema::EngineSchema;

/// Columnar MVCC storage engine over a [`Pager`].
pub struct ColumnEngine<P: Pager> {
    schema: Arc<EngineSchema>,
    schema_bytes: Vec<u8>,
    config: ColumnEngineConfig,
    store: PortionStore<P>,
    portions: RwLock<Arc<PortionSet<P>>>,
    /// Highest set version written to the catalog; `None` before the first write.
    persisted_version: Mutex<Option<u64>>,
    observer: ObserverSlot,
    pub(crate) busy: Arc<BusyPortions>,
    next_task_id: AtomicU64,
    pub(crate) counters: CompactionCounters,
    /// Oldest snapshot a reader may still ask for; `None` means only reads
    /// at or after each compaction's newest input matter.
    oldest_reader: RwLock<Option<Snapshot>>,
}

impl<P: Pager> ColumnEngine<P> {
    /// Open an engine with the default configuration.
    pub fn open(pager: Arc<P>, schema: EngineSchema) -> Result<Self> {
        Self::open_with_config(pager, schema, ColumnEngineConfig::default())
    }

    /// Open an engine, restoring the catalog stored at the pager's root key
    /// if there is one.
    ///
    /// A persisted catalog must describe the same schema; otherwise the open
    /// fails with `SchemaMismatch`. Restored portions start cold.
    pub fn open_with_config(
        pager: Arc<P>,
        schema: EngineSchema,
        config: ColumnEngineConfig,
    ) -> Result<Self> {
        let schema_bytes = encode_schema(schema.user_schema())?;
        let store = PortionStore::new(
            Arc::clone(&pager),
            schema.schema_id(),
            FetchPolicy::from(&config),
        );

        let catalog = match get_one(pager.as_ref(), CATALOG_ROOT_PKEY)? {
            Some(bytes) => Some(PortionCatalog::from_bytes(bytes.as_ref())?),
            None => None,
        };

        let (set, persisted) = match catalog {
            Some(catalog) => {
                catalog.check_compatible(&schema)?;
                store.resume_after(catalog.next_portion_id.saturating_sub(1));
                let version = catalog.version;
                let restored = catalog.portions.into_iter().map(|meta| store.restore(meta));
                let set = PortionSet::from_portions(version, restored)?;
                tracing::debug!(
                    "[ENGINE] restored {} portions at version {} (next portion id {})",
                    set.len(),
                    version,
                    store.next_portion_id()
                );
                (set, Some(version))
            }
            None => (PortionSet::empty(), None),
        };

        let engine = Self {
            schema: Arc::new(schema),
            schema_bytes,
            config,
            store,
            portions: RwLock::new(Arc::new(set)),
            persisted_version: Mutex::new(persisted),
            observer: ObserverSlot::new(),
            busy: Arc::new(BusyPortions::default()),
            next_task_id: AtomicU64::new(1),
            counters: CompactionCounters::default(),
            oldest_reader: RwLock::new(None),
        };

        if persisted.is_none() {
            engine.persist_catalog()?;
        }
        if engine.config.collect_garbage_on_open {
            engine.collect_garbage()?;
        }
        Ok(engine)
    }

    pub fn schema(&self) -> &Arc<EngineSchema> {
        &self.schema
    }

    pub fn config(&self) -> &ColumnEngineConfig {
        &self.config
    }

    pub fn pager(&self) -> &Arc<P> {
        self.store.pager()
    }

    pub(crate) fn store(&self) -> &PortionStore<P> {
        &self.store
    }

    /// Register the engine's observer, replacing any previous one.
    pub fn set_observer(&self, observer: Arc<dyn EngineObserver>) {
        self.observer.set(observer);
    }

    pub(crate) fn observer(&self) -> &ObserverSlot {
        &self.observer
    }

    /// The live portion set as of now.
    pub fn current_portions(&self) -> Arc<PortionSet<P>> {
        Arc::clone(&self.portions.read().expect("portion set lock poisoned"))
    }

    pub fn version(&self) -> u64 {
        self.current_portions().version()
    }

    /// Declare the oldest snapshot any reader will use from now on.
    ///
    /// Compaction then keeps every version a read at or after `snapshot`
    /// could see, so such reads return the same rows before and after it.
    /// `None` lets compaction collapse each key to its newest version.
    pub fn set_oldest_reader(&self, snapshot: Option<Snapshot>) {
        *self.oldest_reader.write().expect("oldest reader lock poisoned") = snapshot;
    }

    pub fn oldest_reader(&self) -> Option<Snapshot> {
        *self.oldest_reader.read().expect("oldest reader lock poisoned")
    }

    /// Store `batch` as one unindexed portion committed at `commit`.
    pub fn append(&self, batch: &RecordBatch, commit: Snapshot) -> Result<PortionId> {
        if batch.num_rows() == 0 {
            return Err(Error::InvalidArgumentError(
                "cannot append an empty batch".into(),
            ));
        }
        self.schema.validate_batch(batch)?;
        let stored = self.schema.to_storage_batch(batch, commit)?;
        self.ingest(stored, commit, "append")
    }

    /// Write tombstones for the keys in `keys` (a batch of key columns only),
    /// committed at `commit`.
    pub fn delete(&self, keys: &RecordBatch, commit: Snapshot) -> Result<PortionId> {
        if keys.num_rows() == 0 {
            return Err(Error::InvalidArgumentError(
                "cannot delete an empty key batch".into(),
            ));
        }
        self.schema.validate_key_batch(keys)?;
        let stored = self.schema.to_tombstone_batch(keys, commit)?;
        self.ingest(stored, commit, "delete")
    }

    fn ingest(&self, stored: RecordBatch, commit: Snapshot, what: &str) -> Result<PortionId> {
        let rows = stored.num_rows();
        let (min_key, max_key) = KeyColumns::new(&stored, self.schema.key_indices())?
            .bounds(rows)
            .ok_or_else(|| Error::Internal(format!("{what} batch has no keys")))?;

        let portion = self.store.create(PortionDraft {
            batch: stored,
            min_snapshot: commit,
            max_snapshot: commit,
            min_key,
            max_key,
            indexed: false,
            keeps_history: false,
        })?;
        let id = portion.id();

        if let Err(err) = self.publish(|set| set.insert(Arc::clone(&portion))) {
            self.store.release(portion);
            return Err(err);
        }
        if let Err(err) = self.persist_catalog() {
            // The caller sees a failed write and may retry it; a portion left
            // live here would duplicate every key of the retry.
            match self.publish(|set| set.retire_and_replace(&[id], &[])) {
                Ok(_) => self.store.release(portion),
                Err(undo) => tracing::error!(
                    "[ENGINE] {what} portion {id} stays live after a failed catalog write: {undo}"
                ),
            }
            tracing::warn!("[ENGINE] {what} at {commit} rejected: catalog write failed: {err}");
            return Err(err);
        }

        tracing::debug!("[ENGINE] {what} stored portion {id} ({rows} rows) at {commit}");
        Ok(id)
    }

    /// Replace the live set with `build(current)`.
    ///
    /// `build` runs outside the lock against a snapshot of the set; if the
    /// set moved meanwhile, the result is discarded and `build` runs again on
    /// the newer set. An error from `build` aborts without touching the set.
    pub(crate) fn publish<F>(&self, build: F) -> Result<Arc<PortionSet<P>>>
    where
        F: Fn(&PortionSet<P>) -> Result<PortionSet<P>>,
    {
        loop {
            let base = self.current_portions();
            let next = Arc::new(build(&base)?);
            let mut slot = self.portions.write().expect("portion set lock poisoned");
            if slot.version() == base.version() {
                *slot = Arc::clone(&next);
                return Ok(next);
            }
            drop(slot);
            tracing::trace!(
                "[ENGINE] portion set moved past version {} while publishing; rebuilding",
                base.version()
            );
        }
    }

    /// Write the catalog if the live set is newer than the last persisted one.
    pub(crate) fn persist_catalog(&self) -> Result<()> {
        let mut persisted = self
            .persisted_version
            .lock()
            .expect("catalog lock poisoned");
        let set = self.current_portions();
        if persisted.is_some_and(|version| version >= set.version()) {
            return Ok(());
        }

        let catalog = PortionCatalog::capture(
            &set,
            &self.schema,
            &self.schema_bytes,
            self.store.next_portion_id(),
        );
        self.store.pager().batch_put(&[BatchPut::Raw {
            key: CATALOG_ROOT_PKEY,
            bytes: catalog.to_bytes(),
        }])?;
        *persisted = Some(set.version());
        tracing::trace!(
            "[ENGINE] persisted catalog version {} ({} portions)",
            set.version(),
            set.len()
        );
        Ok(())
    }

    /// Free every blob the catalog does not reach, returning how many were
    /// freed. Assumes the pager is dedicated to this engine.
    pub fn collect_garbage(&self) -> Result<usize> {
        let set = self.current_portions();
        let mut reachable: FxHashSet<_> = set.iter().map(|p| p.meta().blob_key).collect();
        reachable.insert(CATALOG_ROOT_PKEY);

        let pager = self.store.pager();
        let unreachable: Vec<_> = pager
            .enumerate_keys()?
            .into_iter()
            .filter(|key| !reachable.contains(key))
            .collect();
        if !unreachable.is_empty() {
            pager.free_many(&unreachable)?;
            tracing::info!(
                "[ENGINE] garbage collection freed {} unreachable blobs",
                unreachable.len()
            );
        }
        Ok(unreachable.len())
    }

    /// Drop decoded batches held by live portions.
    pub fn evict_cached(&self) {
        for portion in self.current_portions().iter() {
            self.store.evict(portion);
        }
    }

    pub(crate) fn allocate_task_id(&self) -> u64 {
        self.next_task_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_storage::pager::MemPager;
    use strata_test_utils::{id_keys_batch, id_name_batch, id_name_schema};

    fn engine() -> ColumnEngine<MemPager> {
        let schema = EngineSchema::new(id_name_schema(), &["id"]).unwrap();
        ColumnEngine::open(Arc::new(MemPager::new()), schema).unwrap()
    }

    #[test]
    fn append_bumps_version_and_persists() {
        let engine = engine();
        assert_eq!(engine.version(), 0);
        assert!(engine.pager().contains(CATALOG_ROOT_PKEY));

        let id = engine
            .append(&id_name_batch(&[(3, "c"), (1, "a")]), Snapshot::new(1, 0))
            .unwrap();
        assert_eq!(engine.version(), 1);

        let set = engine.current_portions();
        let meta = set.get(id).unwrap().meta().clone();
        assert!(!meta.indexed);
        assert_eq!(meta.row_count, 2);
        assert_eq!(meta.min_key.to_string(), "(1)");
        assert_eq!(meta.max_key.to_string(), "(3)");
        assert_eq!(meta.min_snapshot, Snapshot::new(1, 0));
        assert_eq!(meta.max_snapshot, Snapshot::new(1, 0));

        let bytes = get_one(engine.pager().as_ref(), CATALOG_ROOT_PKEY)
            .unwrap()
            .unwrap();
        let catalog = PortionCatalog::from_bytes(bytes.as_ref()).unwrap();
        assert_eq!(catalog.version, 1);
        assert_eq!(catalog.portions, vec![meta]);
    }

    #[test]
    fn empty_and_mismatched_batches_are_rejected() {
        let engine = engine();
        let err = engine
            .append(&id_name_batch(&[]), Snapshot::new(1, 0))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgumentError(_)));

        let err = engine
            .append(&id_keys_batch(&[1, 2]), Snapshot::new(1, 0))
            .unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch(_)));
        assert_eq!(engine.version(), 0);
    }

    #[test]
    fn delete_writes_a_tombstone_portion() {
        let engine = engine();
        let id = engine
            .delete(&id_keys_batch(&[4, 2]), Snapshot::new(2, 0))
            .unwrap();
        let set = engine.current_portions();
        let portion = set.get(id).unwrap();
        let batch = portion.fetch(engine.store().policy()).unwrap();
        let deleted = crate::rows::SystemColumns::new(&batch).unwrap();
        assert!((0..batch.num_rows()).all(|row| deleted.is_deleted(row)));
        assert_eq!(portion.meta().min_key.to_string(), "(2)");
    }

    #[test]
    fn failed_publish_leaves_set_alone() {
        let engine = engine();
        engine
            .append(&id_name_batch(&[(1, "a")]), Snapshot::new(1, 0))
            .unwrap();
        let before = engine.current_portions();
        let err = engine
            .publish(|_| Err(Error::CompactionConflict("lost".into())))
            .err()
            .unwrap();
        assert!(matches!(err, Error::CompactionConflict(_)));
        assert!(Arc::ptr_eq(&before, &engine.current_portions()));
    }

    #[test]
    fn garbage_collection_frees_orphans() {
        let pager = Arc::new(MemPager::new());
        let schema = EngineSchema::new(id_name_schema(), &["id"]).unwrap();
        let engine = ColumnEngine::open(Arc::clone(&pager), schema.clone()).unwrap();
        engine
            .append(&id_name_batch(&[(1, "a")]), Snapshot::new(1, 0))
            .unwrap();

        let orphan = pager.alloc_many(1).unwrap()[0];
        pager
            .batch_put(&[BatchPut::Raw {
                key: orphan,
                bytes: vec![0xde, 0xad],
            }])
            .unwrap();
        drop(engine);

        let reopened = ColumnEngine::open(Arc::clone(&pager), schema).unwrap();
        assert!(!pager.contains(orphan));
        assert_eq!(reopened.current_portions().len(), 1);
        assert_eq!(reopened.collect_garbage().unwrap(), 0);
    }
}
