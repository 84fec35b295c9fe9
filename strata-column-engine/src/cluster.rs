//! Grouping of portions into transitively overlapping key clusters.

use strata_types::RowKey;

use crate::portion::PortionMeta;

/// Partition `items` into overlap clusters, ordered by `(min_key, portion_id)`.
///
/// Two portions share a cluster when a chain of pairwise key-interval
/// overlaps connects them. Distinct clusters therefore cover disjoint key
/// intervals, and emitting them in order yields ascending keys.
pub fn overlap_clusters<T>(mut items: Vec<T>, meta: impl Fn(&T) -> &PortionMeta) -> Vec<Vec<T>> {
    items.sort_by(|a, b| {
        let (a, b) = (meta(a), meta(b));
        (&a.min_key, a.portion_id).cmp(&(&b.min_key, b.portion_id))
    });

    let mut clusters = Vec::new();
    let mut current: Vec<T> = Vec::new();
    let mut current_max: Option<RowKey> = None;
    for item in items {
        let m = meta(&item);
        let joins = current_max.as_ref().is_some_and(|max| m.min_key <= *max);
        if !joins && !current.is_empty() {
            clusters.push(std::mem::take(&mut current));
        }
        if !joins || current_max.as_ref().is_some_and(|max| m.max_key > *max) {
            current_max = Some(m.max_key.clone());
        }
        current.push(item);
    }
    if !current.is_empty() {
        clusters.push(current);
    }
    clusters
}
