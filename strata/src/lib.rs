//! Strata: a columnar MVCC storage core over key-value blob storage.
//!
//! This crate re-exports the engine and its building blocks from the
//! underlying `strata-*` crates.
//!
//! # Architecture
//!
//! - **Types** (`strata-types`): snapshots, row keys, key ranges, ids.
//! - **Predicates** (`strata-expr`): the filter AST handed to reads.
//! - **Storage** (`strata-storage`): the `Pager` trait and blob encoding.
//! - **Engine** (`strata-column-engine`): portions, the live portion set,
//!   the read path, and compaction.

pub use strata_column_engine::{
    CancellationToken, ColumnEngine, ColumnEngineConfig, CompactionHandle, CompactionOutcome,
    CompactionReport, CompactionScheduler, EngineObserver, EngineSchema, NoopObserver,
    ReadRequest, ReadStream,
};
pub use strata_result::{Error, Result};
pub use strata_types::{KeyRange, KeyValue, RowKey, Snapshot, SnapshotClock};

pub mod expr {
    //! Predicate building blocks for [`ReadRequest`](crate::ReadRequest).

    pub use strata_expr::{Expr, Filter, Literal, Operator};
}

pub mod storage {
    //! Pager abstraction and the bundled implementations.

    pub use strata_storage::pager::{InstrumentedPager, IoStats, MemPager, Pager, SimdRDrivePager};
}

pub mod engine {
    //! Lower-level engine pieces: portions, filters, compaction planning.

    pub use strata_column_engine::{
        compaction, filter, observer, portion, portion_set, schema,
    };
}
