//! Helpers shared by the test suites of the Strata crates.

use std::sync::Arc;
use std::sync::Once;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use arrow::array::{ArrayRef, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use strata_result::{Error, Result};
use strata_storage::pager::{BatchGet, BatchPut, GetResult, Pager};
use strata_storage::types::PhysicalKey;

static INIT: Once = Once::new();

/// Initialize tracing for test binaries. Safe to call multiple times.
pub fn init_tracing_for_tests() {
    INIT.call_once(|| {
        use tracing_subscriber::filter::EnvFilter;
        use tracing_subscriber::fmt;
        let filter = match std::env::var("RUST_LOG") {
            Ok(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            Err(_) => EnvFilter::new("info"),
        };
        // Another harness may already own the global subscriber.
        let _ = fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_test_writer()
            .try_init();
    });
}

/// Schema used throughout the engine tests: `id Int64` key plus a nullable
/// `name Utf8` value column.
pub fn id_name_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("name", DataType::Utf8, true),
    ]))
}

/// Build an `(id, name)` batch matching [`id_name_schema`].
pub fn id_name_batch(rows: &[(i64, &str)]) -> RecordBatch {
    let ids: Vec<i64> = rows.iter().map(|(id, _)| *id).collect();
    let names: Vec<&str> = rows.iter().map(|(_, name)| *name).collect();
    RecordBatch::try_new(
        id_name_schema(),
        vec![
            Arc::new(Int64Array::from(ids)) as ArrayRef,
            Arc::new(StringArray::from(names)) as ArrayRef,
        ],
    )
    .expect("id/name batch")
}

/// Single `id` column batch, the shape deletes take for [`id_name_schema`].
pub fn id_keys_batch(ids: &[i64]) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
    RecordBatch::try_new(
        schema,
        vec![Arc::new(Int64Array::from(ids.to_vec())) as ArrayRef],
    )
    .expect("id batch")
}

/// Collect `(id, name)` pairs out of result batches shaped like
/// [`id_name_schema`].
pub fn collect_id_name(batches: &[RecordBatch]) -> Vec<(i64, Option<String>)> {
    let mut out = Vec::new();
    for batch in batches {
        let ids = batch
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .expect("id column is Int64");
        let names = batch
            .column(1)
            .as_any()
            .downcast_ref::<StringArray>()
            .expect("name column is Utf8");
        for row in 0..batch.num_rows() {
            let name = (!names.is_null(row)).then(|| names.value(row).to_string());
            out.push((ids.value(row), name));
        }
    }
    out
}

/// Pager wrapper that injects I/O failures while a failure budget remains.
///
/// Reads: each `batch_get` call consumes one unit of the read budget and
/// returns an I/O error instead of reading. Writes: each `batch_put` that
/// touches the targeted key consumes one unit of the write budget and fails
/// without writing anything.
pub struct FlakyPager<P: Pager> {
    inner: P,
    failures_left: AtomicUsize,
    write_target: AtomicU64,
    write_failures_left: AtomicUsize,
}

impl<P: Pager> FlakyPager<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(0),
            write_target: AtomicU64::new(0),
            write_failures_left: AtomicUsize::new(0),
        }
    }

    /// Make the next `n` reads fail.
    pub fn fail_next_reads(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` writes that include `key` fail.
    pub fn fail_next_writes_to(&self, key: PhysicalKey, n: usize) {
        self.write_target.store(key, Ordering::SeqCst);
        self.write_failures_left.store(n, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

impl<P: Pager> Pager for FlakyPager<P> {
    type Blob = P::Blob;

    fn alloc_many(&self, n: usize) -> Result<Vec<PhysicalKey>> {
        self.inner.alloc_many(n)
    }

    fn batch_get(&self, gets: &[BatchGet]) -> Result<Vec<GetResult<Self::Blob>>> {
        let injected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Error::Io(std::io::Error::other("injected read failure")));
        }
        self.inner.batch_get(gets)
    }

    fn batch_put(&self, puts: &[BatchPut]) -> Result<()> {
        let target = self.write_target.load(Ordering::SeqCst);
        let touches = puts
            .iter()
            .any(|p| matches!(p, BatchPut::Raw { key, .. } if *key == target));
        let injected = touches
            && self
                .write_failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if injected {
            return Err(Error::Io(std::io::Error::other(format!(
                "injected write failure at key {target}"
            ))));
        }
        self.inner.batch_put(puts)
    }

    fn free_many(&self, keys: &[PhysicalKey]) -> Result<()> {
        self.inner.free_many(keys)
    }

    fn enumerate_keys(&self) -> Result<Vec<PhysicalKey>> {
        self.inner.enumerate_keys()
    }
}
