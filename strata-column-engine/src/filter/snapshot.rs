use std::cmp::Ordering;
use std::collections::hash_map::Entry;

use arrow::array::BooleanArray;
use arrow::compute::{and, not};
use arrow::record_batch::RecordBatch;
use rustc_hash::FxHashMap;
use strata_result::{Error, Result};
use strata_types::{RowKey, Snapshot, is_visible};

use crate::rows::{KeyColumns, SystemColumns};

/// Mask of the newest visible version of every key, tombstones included.
///
/// A row is a candidate when its commit snapshot is visible at `read`; among
/// candidates sharing a key the greatest commit snapshot wins. Two candidates
/// with the same key and commit snapshot are an `AmbiguousVersion` error.
pub fn latest_versions(
    batch: &RecordBatch,
    key_indices: &[usize],
    read: Snapshot,
) -> Result<BooleanArray> {
    let rows = batch.num_rows();
    let system = SystemColumns::new(batch)?;
    let keys = KeyColumns::new(batch, key_indices)?;

    let mut winners: FxHashMap<RowKey, (usize, Snapshot)> = FxHashMap::default();
    for row in 0..rows {
        let commit = system.commit(row);
        if !is_visible(commit, read) {
            continue;
        }
        match winners.entry(keys.key(row)) {
            Entry::Vacant(slot) => {
                slot.insert((row, commit));
            }
            Entry::Occupied(mut slot) => match commit.cmp(&slot.get().1) {
                Ordering::Greater => {
                    slot.insert((row, commit));
                }
                Ordering::Less => {}
                Ordering::Equal => {
                    return Err(Error::AmbiguousVersion {
                        key: slot.key().to_string(),
                        plan_step: commit.plan_step,
                        tx_id: commit.tx_id,
                    });
                }
            },
        }
    }

    let mut mask = vec![false; rows];
    for (row, _) in winners.into_values() {
        mask[row] = true;
    }
    Ok(BooleanArray::from(mask))
}

/// Versions a rewrite must keep so every read at or after `cut` sees the
/// same rows: the newest version of each key as of `cut`, plus every version
/// committed after it.
pub fn retained_versions(
    batch: &RecordBatch,
    key_indices: &[usize],
    cut: Snapshot,
) -> Result<BooleanArray> {
    let latest = latest_versions(batch, key_indices, cut)?;
    let system = SystemColumns::new(batch)?;
    Ok((0..batch.num_rows())
        .map(|row| Some(latest.value(row) || system.commit(row) > cut))
        .collect())
}

/// Rows visible at `read` under last-writer-wins, with deleted keys removed.
///
/// Applying the filter to its own output selects every row again.
pub fn snapshot_filter(
    batch: &RecordBatch,
    key_indices: &[usize],
    read: Snapshot,
) -> Result<BooleanArray> {
    let latest = latest_versions(batch, key_indices, read)?;
    let system = SystemColumns::new(batch)?;
    Ok(and(&latest, &not(system.deleted())?)?)
}
