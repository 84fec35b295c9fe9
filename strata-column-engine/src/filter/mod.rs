//! Row masks applied on the read and compaction paths.
//!
//! Every filter returns a [`BooleanArray`] aligned row for row with its input
//! batch; callers combine masks with `and` and apply them once.

mod key_range;
mod not_indexed;
mod predicate;
mod snapshot;

pub use key_range::{key_range_filter, portion_matches};
pub use not_indexed::{RowRevisit, not_indexed_filter};
pub use predicate::{predicate_filter, validate_predicate};
pub use snapshot::{latest_versions, retained_versions, snapshot_filter};

use arrow::array::BooleanArray;
use arrow::compute::{and, filter_record_batch};
use arrow::record_batch::RecordBatch;
use strata_result::Result;

/// Mask selecting every row.
pub fn select_all(rows: usize) -> BooleanArray {
    BooleanArray::from(vec![true; rows])
}

/// Intersect masks; an empty slice selects every row.
pub fn intersect(masks: &[&BooleanArray], rows: usize) -> Result<BooleanArray> {
    let mut iter = masks.iter();
    let Some(first) = iter.next() else {
        return Ok(select_all(rows));
    };
    let mut acc = (*first).clone();
    for mask in iter {
        acc = and(&acc, mask)?;
    }
    Ok(acc)
}

/// Keep the selected rows of `batch`.
pub fn apply_mask(batch: &RecordBatch, mask: &BooleanArray) -> Result<RecordBatch> {
    if mask.true_count() == batch.num_rows() {
        return Ok(batch.clone());
    }
    Ok(filter_record_batch(batch, mask)?)
}
