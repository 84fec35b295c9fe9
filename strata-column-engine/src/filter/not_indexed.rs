use arrow::array::BooleanArray;
use arrow::record_batch::RecordBatch;

use super::select_all;
use crate::portion::PortionMeta;

/// Whether the rows of a portion still need a per-row visibility pass.
#[derive(Debug, Clone, PartialEq)]
pub enum RowRevisit {
    /// Indexed portion: rows are already deduplicated and sorted.
    PassThrough,
    /// Unindexed portion, or one keeping superseded versions: every row
    /// selected by the mask must go through the snapshot filter.
    Revisit(BooleanArray),
}

/// Decide whether `batch`, read from the portion described by `meta`, must be
/// revisited row by row.
pub fn not_indexed_filter(meta: &PortionMeta, batch: &RecordBatch) -> RowRevisit {
    if meta.indexed && !meta.keeps_history {
        RowRevisit::PassThrough
    } else {
        RowRevisit::Revisit(select_all(batch.num_rows()))
    }
}
