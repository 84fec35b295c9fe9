//! Input selection for compaction tasks.
//!
//! The planner is a pure function over portion metadata: it never touches
//! blobs, so it can run under the busy-set lock.

use std::cmp::Reverse;

use rustc_hash::FxHashSet;
use strata_types::{PortionId, Snapshot};

use crate::cluster::overlap_clusters;
use crate::config::ColumnEngineConfig;
use crate::portion::PortionMeta;

/// Urgency of a task. `Critical` always outranks `Optimization`; within a
/// class the larger weight wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CompactionPriority {
    /// Overlapping portions worth merging; weight is the cluster size.
    Optimization { weight: u64 },
    /// Too many unindexed portions pile up; weight is their count.
    Critical { weight: u64 },
}

/// Ceilings applied to one task's inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimits {
    pub max_rows: u64,
    pub max_portions: usize,
    pub critical_unindexed: usize,
}

impl From<&ColumnEngineConfig> for PlanLimits {
    fn from(config: &ColumnEngineConfig) -> Self {
        Self {
            max_rows: config.max_rows_per_task,
            max_portions: config.max_portions_per_task.max(1),
            critical_unindexed: config.critical_unindexed_portions.max(1),
        }
    }
}

/// Inputs chosen for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedInputs {
    pub inputs: Vec<PortionId>,
    pub priority: CompactionPriority,
}

struct Candidate<'a> {
    members: Vec<&'a PortionMeta>,
    priority: CompactionPriority,
    oldest: Snapshot,
}

/// Pick the inputs of the next compaction task, if any.
///
/// Busy portions, and every portion whose key range touches a busy one, are
/// ineligible. The rest is grouped into overlap clusters; a cluster qualifies
/// when it holds two or more portions or any unindexed one. The best cluster
/// by priority (then oldest `min_snapshot`) is trimmed to the limits,
/// unindexed and older portions first.
pub fn select_inputs(
    metas: &[PortionMeta],
    busy: &FxHashSet<PortionId>,
    limits: &PlanLimits,
) -> Option<PlannedInputs> {
    let claimed: Vec<&PortionMeta> = metas
        .iter()
        .filter(|m| busy.contains(&m.portion_id))
        .collect();
    let eligible: Vec<&PortionMeta> = metas
        .iter()
        .filter(|m| !busy.contains(&m.portion_id))
        .filter(|m| !claimed.iter().any(|c| c.overlaps(m)))
        .collect();

    let mut candidates: Vec<Candidate<'_>> = overlap_clusters(eligible, |m| *m)
        .into_iter()
        .filter_map(|members| {
            let unindexed = members.iter().filter(|m| !m.indexed).count();
            if members.len() < 2 && unindexed == 0 {
                return None;
            }
            let priority = if unindexed >= limits.critical_unindexed {
                CompactionPriority::Critical {
                    weight: unindexed as u64,
                }
            } else {
                CompactionPriority::Optimization {
                    weight: members.len() as u64,
                }
            };
            let oldest = members
                .iter()
                .map(|m| m.min_snapshot)
                .min()
                .unwrap_or(Snapshot::MAX);
            Some(Candidate {
                members,
                priority,
                oldest,
            })
        })
        .collect();
    candidates.sort_by_key(|c| (Reverse(c.priority), c.oldest));

    candidates.into_iter().find_map(|candidate| {
        let inputs = take_within_limits(candidate.members, limits);
        // A lone indexed portion has nothing to gain from a rewrite.
        let pointless = inputs.len() == 1 && inputs[0].indexed;
        (!pointless).then(|| PlannedInputs {
            inputs: inputs.iter().map(|m| m.portion_id).collect(),
            priority: candidate.priority,
        })
    })
}

fn take_within_limits<'a>(
    mut members: Vec<&'a PortionMeta>,
    limits: &PlanLimits,
) -> Vec<&'a PortionMeta> {
    members.sort_by_key(|m| (m.indexed, m.min_snapshot, m.portion_id));
    let mut rows = 0u64;
    let mut picked = Vec::new();
    for meta in members {
        let over_rows = rows.saturating_add(meta.row_count) > limits.max_rows;
        if !picked.is_empty() && (over_rows || picked.len() >= limits.max_portions) {
            break;
        }
        rows = rows.saturating_add(meta.row_count);
        picked.push(meta);
    }
    picked
}
