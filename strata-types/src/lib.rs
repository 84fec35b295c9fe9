//! Core value types shared across the Strata storage core.
//!
//! - [`Snapshot`]: totally ordered commit point used for MVCC visibility.
//! - [`RowKey`] / [`KeyValue`] / [`KeyRange`]: primary-key tuples and the
//!   intervals reads and portions are bounded by.
//! - Identifier aliases ([`PortionId`], [`TaskId`], [`SchemaId`]).
#![forbid(unsafe_code)]

pub mod ids;
pub mod key;
pub mod snapshot;

pub use ids::*;
pub use key::{KeyRange, KeyValue, RowKey, intervals_overlap};
pub use snapshot::{Snapshot, SnapshotClock, is_visible};
