use arrow::array::BooleanArray;
use arrow::record_batch::RecordBatch;
use strata_result::Result;
use strata_types::{KeyRange, Snapshot};

use super::select_all;
use crate::portion::PortionMeta;
use crate::rows::KeyColumns;

/// Rows whose key lies inside `range`.
pub fn key_range_filter(
    batch: &RecordBatch,
    key_indices: &[usize],
    range: &KeyRange,
) -> Result<BooleanArray> {
    let rows = batch.num_rows();
    if range.is_unbounded() {
        return Ok(select_all(rows));
    }
    let keys = KeyColumns::new(batch, key_indices)?;
    Ok((0..rows)
        .map(|row| Some(range.contains(&keys.key(row))))
        .collect())
}

/// Coarse pruning: can the portion contribute rows to a read at `read`
/// over `range`?
pub fn portion_matches(meta: &PortionMeta, read: Snapshot, range: &KeyRange) -> bool {
    meta.min_snapshot <= read && meta.overlaps_range(range)
}
