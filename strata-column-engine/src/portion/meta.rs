use bitcode::{Decode, Encode};
use strata_storage::types::PhysicalKey;
use strata_types::{KeyRange, PortionId, RowKey, SchemaId, Snapshot, intervals_overlap};

/// Immutable description of one portion.
///
/// Indexed portions hold rows sorted by key with at most one version per
/// key, unless `keeps_history` is set; unindexed portions hold rows exactly
/// as ingested.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct PortionMeta {
    pub portion_id: PortionId,
    pub schema_id: SchemaId,
    pub min_key: RowKey,
    pub max_key: RowKey,
    pub min_snapshot: Snapshot,
    pub max_snapshot: Snapshot,
    pub row_count: u64,
    pub indexed: bool,
    /// Indexed rows still include versions superseded after the oldest
    /// reader's snapshot, so reads must deduplicate them.
    pub keeps_history: bool,
    /// Pager address of the encoded batch.
    pub blob_key: PhysicalKey,
    /// Encoded blob size in bytes.
    pub byte_size: u64,
}

impl PortionMeta {
    /// Whether the key intervals of two portions intersect.
    pub fn overlaps(&self, other: &PortionMeta) -> bool {
        intervals_overlap(&self.min_key, &self.max_key, &other.min_key, &other.max_key)
    }

    pub fn contains_key(&self, key: &RowKey) -> bool {
        &self.min_key <= key && key <= &self.max_key
    }

    pub fn overlaps_range(&self, range: &KeyRange) -> bool {
        range.overlaps(&self.min_key, &self.max_key)
    }
}
