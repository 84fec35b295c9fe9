//! Columnar MVCC storage core.
//!
//! Data lives in immutable [`Portion`]s: Arrow record batches stored as one
//! blob each, tagged with key and commit-snapshot bounds. Appends and deletes
//! add unindexed portions; reads merge overlapping portions under
//! last-writer-wins visibility; compaction rewrites overlapping portions into
//! sorted, deduplicated, indexed ones and swaps them in atomically.
//!
//! ```
//! use std::sync::Arc;
//! use arrow::array::{ArrayRef, Int64Array, StringArray};
//! use arrow::datatypes::{DataType, Field, Schema};
//! use arrow::record_batch::RecordBatch;
//! use strata_column_engine::{ColumnEngine, EngineSchema, ReadRequest};
//! use strata_storage::pager::MemPager;
//! use strata_types::Snapshot;
//!
//! let user = Arc::new(Schema::new(vec![
//!     Field::new("id", DataType::Int64, false),
//!     Field::new("name", DataType::Utf8, true),
//! ]));
//! let schema = EngineSchema::new(Arc::clone(&user), &["id"]).unwrap();
//! let engine = ColumnEngine::open(Arc::new(MemPager::new()), schema).unwrap();
//!
//! let batch = RecordBatch::try_new(
//!     user,
//!     vec![
//!         Arc::new(Int64Array::from(vec![1, 2])) as ArrayRef,
//!         Arc::new(StringArray::from(vec!["a", "b"])) as ArrayRef,
//!     ],
//! )
//! .unwrap();
//! engine.append(&batch, Snapshot::new(1, 0)).unwrap();
//!
//! let rows: usize = engine
//!     .read(ReadRequest::new(Snapshot::new(1, 0)))
//!     .unwrap()
//!     .map(|b| b.unwrap().num_rows())
//!     .sum();
//! assert_eq!(rows, 2);
//! ```

pub mod catalog;
pub mod cluster;
pub mod compaction;
pub mod config;
pub mod engine;
pub mod filter;
pub mod observer;
pub mod portion;
pub mod portion_set;
pub mod rows;
pub mod schema;

pub use compaction::{
    CancellationToken, ChangeKind, ChangeSet, CompactionCountersSnapshot, CompactionHandle,
    CompactionPriority, CompactionReport, CompactionScheduler, TaskState,
};
pub use config::ColumnEngineConfig;
pub use engine::{ColumnEngine, EngineSnapshotView, ReadRequest, ReadStream};
pub use observer::{
    CompactionOutcome, EngineObserver, NoopObserver, ObservedEvent, RecordingObserver,
};
pub use portion::{Portion, PortionMeta};
pub use portion_set::PortionSet;
pub use schema::EngineSchema;
pub use strata_result::{Error, Result};
