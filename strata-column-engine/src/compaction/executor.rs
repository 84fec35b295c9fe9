//! Runs a planned compaction: merge, deduplicate, rewrite, swap.

use std::time::Instant;

use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use strata_result::{Error, Result};
use strata_storage::pager::Pager;
use strata_types::{PortionId, RowKey, Snapshot, TaskId};

use super::cancel::CancellationToken;
use super::change_set::{ChangeSet, TaskState};
use super::counters::CompactionCounters;
use super::planner::{PlanLimits, select_inputs};
use crate::engine::ColumnEngine;
use crate::filter::{apply_mask, retained_versions};
use crate::observer::CompactionOutcome;
use crate::portion::{PortionDraft, PortionMeta};
use crate::portion_set::PortionSet;
use crate::rows::{KeyColumns, SystemColumns, sort_by_key};

/// What a committed compaction did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionReport {
    pub task_id: TaskId,
    pub inputs: Vec<PortionId>,
    pub outputs: Vec<PortionId>,
    pub rows_in: u64,
    pub rows_out: u64,
    pub input_bytes: u64,
    /// Portion set version published by the swap.
    pub version: u64,
}

impl<P: Pager> ColumnEngine<P> {
    /// Choose the next compaction task and claim its inputs.
    ///
    /// Returns `None` when nothing qualifies. The claim lasts until the
    /// returned [`ChangeSet`] is dropped.
    pub fn plan_compaction(&self) -> Option<ChangeSet> {
        let limits = PlanLimits::from(self.config());
        let mut base = None;
        let (claim, priority) = self.busy.claim_with(|busy| {
            let set = self.current_portions();
            let plan = select_inputs(&set.metas(), busy, &limits);
            base = Some(set);
            plan.map(|p| (p.inputs, p.priority))
        })?;
        let base_version = base.map_or(0, |set| set.version());

        let task_id = self.allocate_task_id();
        CompactionCounters::add(&self.counters.tasks_planned, 1);
        tracing::debug!(
            "[COMPACTION] planned task {task_id} over {:?} at version {base_version} ({priority:?})",
            claim.ids()
        );
        Some(ChangeSet::new(task_id, base_version, priority, claim))
    }

    /// Execute `change_set` to completion.
    ///
    /// On success the inputs are atomically replaced by indexed outputs. On
    /// any error the live set is untouched and every output already written
    /// is released. `CompactionConflict` means another task retired an input
    /// first; replan and try again.
    pub fn run_compaction(
        &self,
        mut change_set: ChangeSet,
        cancel: &CancellationToken,
    ) -> Result<CompactionReport> {
        let task_id = change_set.task_id();
        change_set.advance(TaskState::Running);
        self.observer()
            .notify("on_compaction_started", |o| o.on_compaction_started(task_id));

        let started = Instant::now();
        let result = self.execute(&change_set, cancel);
        self.counters.record_duration(started.elapsed());

        match &result {
            Ok(report) => {
                change_set.advance(TaskState::Committed);
                let c = &self.counters;
                CompactionCounters::add(&c.tasks_committed, 1);
                CompactionCounters::add(&c.input_portions, report.inputs.len() as u64);
                CompactionCounters::add(&c.input_bytes, report.input_bytes);
                CompactionCounters::add(&c.input_rows, report.rows_in);
                CompactionCounters::add(&c.output_portions, report.outputs.len() as u64);
                CompactionCounters::add(&c.output_rows, report.rows_out);
                tracing::info!(
                    "[COMPACTION] task {task_id} committed: {} portions ({} rows) -> {} portions ({} rows) at version {}",
                    report.inputs.len(),
                    report.rows_in,
                    report.outputs.len(),
                    report.rows_out,
                    report.version
                );
                self.observer().notify("on_compaction_finished", |o| {
                    o.on_compaction_finished(task_id, CompactionOutcome::Committed)
                });
            }
            Err(err) => {
                change_set.advance(TaskState::Aborted);
                CompactionCounters::add(&self.counters.tasks_aborted, 1);
                match err {
                    Error::CompactionConflict(_) => {
                        CompactionCounters::add(&self.counters.conflicts, 1);
                        tracing::debug!("[COMPACTION] task {task_id} lost the swap: {err}");
                    }
                    Error::Cancelled(_) => {
                        tracing::debug!("[COMPACTION] task {task_id} {err}");
                    }
                    e if e.is_integrity_violation() => {
                        tracing::error!("[COMPACTION] task {task_id} found corrupt input: {err}");
                    }
                    e if e.is_transient() => {
                        tracing::warn!("[COMPACTION] task {task_id} aborted: {err}");
                    }
                    _ => {
                        tracing::error!("[COMPACTION] task {task_id} failed: {err}");
                    }
                }
                self.observer().notify("on_compaction_finished", |o| {
                    o.on_compaction_finished(task_id, CompactionOutcome::Aborted)
                });
            }
        }
        result
    }

    /// Plan and run one task, replanning after lost swaps.
    ///
    /// Returns `Ok(None)` when there is nothing to compact.
    pub fn compact(&self) -> Result<Option<CompactionReport>> {
        let mut replans = 0;
        loop {
            let Some(change_set) = self.plan_compaction() else {
                return Ok(None);
            };
            match self.run_compaction(change_set, &CancellationToken::new()) {
                Ok(report) => return Ok(Some(report)),
                Err(Error::CompactionConflict(_)) if replans < self.config().max_conflict_replans => {
                    replans += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Compact until the planner runs dry.
    pub fn compact_all(&self) -> Result<Vec<CompactionReport>> {
        let mut reports = Vec::new();
        while let Some(report) = self.compact()? {
            reports.push(report);
        }
        Ok(reports)
    }

    pub fn compaction_counters(&self) -> super::CompactionCountersSnapshot {
        self.counters.snapshot()
    }

    fn execute(&self, change_set: &ChangeSet, cancel: &CancellationToken) -> Result<CompactionReport> {
        let key_indices = self.schema().key_indices();
        let input_ids = change_set.input_portion_ids();
        cancel.check("fetching inputs")?;

        let base = self.current_portions();
        let inputs = input_ids
            .iter()
            .map(|id| {
                base.get(*id).cloned().ok_or_else(|| {
                    Error::CompactionConflict(format!("input portion {id} is no longer live"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let policy = *self.store().policy();
        let batches = inputs
            .par_iter()
            .map(|portion| portion.fetch(&policy))
            .collect::<Result<Vec<_>>>()?;
        cancel.check("merging")?;

        for (portion, batch) in inputs.iter().zip(&batches) {
            check_declared_range(portion.meta(), batch, key_indices)?;
        }

        let rows_in: u64 = inputs.iter().map(|p| p.meta().row_count).sum();
        let input_bytes: u64 = inputs.iter().map(|p| p.meta().byte_size).sum();
        let min_snapshot = inputs
            .iter()
            .map(|p| p.meta().min_snapshot)
            .min()
            .unwrap_or(Snapshot::MIN);
        let max_snapshot = inputs
            .iter()
            .map(|p| p.meta().max_snapshot)
            .max()
            .unwrap_or(Snapshot::MIN);
        let dedup_at = match self.oldest_reader() {
            Some(oldest) if oldest < max_snapshot => oldest,
            _ => max_snapshot,
        };

        let merged = concat_batches(self.schema().storage_schema(), &batches)?;
        drop(batches);
        let latest = retained_versions(&merged, key_indices, dedup_at)?;
        let visible = latest.true_count() as u64;
        CompactionCounters::add(&self.counters.rows_filtered, visible);
        self.observer()
            .notify("on_rows_filtered", |o| o.on_rows_filtered(visible));
        let survivors = apply_mask(&merged, &latest)?;
        drop(merged);

        let input_set: FxHashSet<PortionId> = input_ids.iter().copied().collect();
        let (survivors, dropped_tombstones) =
            drop_settled_tombstones(&survivors, key_indices, &base, &input_set, dedup_at)?;
        let sorted = sort_by_key(&survivors, key_indices)?;
        cancel.check("writing outputs")?;

        let drafts = split_into_drafts(
            &sorted,
            key_indices,
            self.config().target_portion_rows.max(1),
            min_snapshot,
            max_snapshot,
            dedup_at < max_snapshot,
        )?;
        let outputs = self.store().create_many(drafts)?;

        let scope = inputs.iter().fold(None, |acc: Option<(RowKey, RowKey)>, p| {
            let m = p.meta();
            Some(match acc {
                None => (m.min_key.clone(), m.max_key.clone()),
                Some((lo, hi)) => (lo.min(m.min_key.clone()), hi.max(m.max_key.clone())),
            })
        });

        let swapped = cancel.check("swap").and_then(|()| {
            self.publish(|set| {
                if dropped_tombstones > 0
                    && let Some((lo, hi)) = &scope
                {
                    guard_dropped_tombstones(set, &base, lo, hi, dedup_at)?;
                }
                set.retire_and_replace(input_ids, &outputs)
            })
        });
        let published = match swapped {
            Ok(published) => published,
            Err(err) => {
                for output in outputs {
                    self.store().release(output);
                }
                return Err(err);
            }
        };

        match self.persist_catalog() {
            Ok(()) => {
                for input in &inputs {
                    input.mark_retired();
                }
            }
            // Inputs stay referenced by the stale catalog; the next open
            // collects whichever side that catalog no longer reaches.
            Err(err) => tracing::error!(
                "[COMPACTION] task {} swapped but the catalog write failed: {err}",
                change_set.task_id()
            ),
        }

        Ok(CompactionReport {
            task_id: change_set.task_id(),
            inputs: input_ids.to_vec(),
            outputs: outputs.iter().map(|p| p.id()).collect(),
            rows_in,
            rows_out: sorted.num_rows() as u64,
            input_bytes,
            version: published.version(),
        })
    }
}

fn check_declared_range(meta: &PortionMeta, batch: &RecordBatch, key_indices: &[usize]) -> Result<()> {
    let keys = KeyColumns::new(batch, key_indices)?;
    if let Some((lo, hi)) = keys.bounds(batch.num_rows())
        && (lo < meta.min_key || hi > meta.max_key)
    {
        return Err(Error::KeyRangeViolation {
            portion_id: meta.portion_id,
            detail: format!(
                "rows span [{lo}, {hi}] but the portion declares [{}, {}]",
                meta.min_key, meta.max_key
            ),
        });
    }
    Ok(())
}

/// Remove surviving tombstones committed at or before `cut` whose key no
/// portion outside the inputs can still hold. Later tombstones still hide
/// versions kept for readers at the cut. Returns the kept rows and the
/// number of tombstones dropped.
fn drop_settled_tombstones<P: Pager>(
    survivors: &RecordBatch,
    key_indices: &[usize],
    base: &PortionSet<P>,
    inputs: &FxHashSet<PortionId>,
    cut: Snapshot,
) -> Result<(RecordBatch, usize)> {
    let system = SystemColumns::new(survivors)?;
    if system.deleted().true_count() == 0 {
        return Ok((survivors.clone(), 0));
    }
    let outside: Vec<&PortionMeta> = base
        .iter()
        .filter(|p| !inputs.contains(&p.id()))
        .map(|p| p.meta())
        .collect();
    let keys = KeyColumns::new(survivors, key_indices)?;

    let mut dropped = 0;
    let keep: arrow::array::BooleanArray = (0..survivors.num_rows())
        .map(|row| {
            if !system.is_deleted(row) || system.commit(row) > cut {
                return Some(true);
            }
            let key = keys.key(row);
            let shadows = outside.iter().any(|m| m.contains_key(&key));
            if !shadows {
                dropped += 1;
            }
            Some(shadows)
        })
        .collect();
    Ok((apply_mask(survivors, &keep)?, dropped))
}

/// Dropping a tombstone was decided against `base`. A portion published
/// since then that could hold an older version of a dropped key would be
/// resurrected by the swap.
fn guard_dropped_tombstones<P: Pager>(
    current: &PortionSet<P>,
    base: &PortionSet<P>,
    lo: &RowKey,
    hi: &RowKey,
    dedup_at: Snapshot,
) -> Result<()> {
    let newcomer = current.iter().find(|p| {
        let m = p.meta();
        !base.contains(m.portion_id)
            && m.min_snapshot <= dedup_at
            && strata_types::intervals_overlap(&m.min_key, &m.max_key, lo, hi)
    });
    match newcomer {
        Some(p) => Err(Error::CompactionConflict(format!(
            "portion {} appeared under dropped tombstones",
            p.id()
        ))),
        None => Ok(()),
    }
}

fn split_into_drafts(
    sorted: &RecordBatch,
    key_indices: &[usize],
    target_rows: usize,
    min_snapshot: Snapshot,
    max_snapshot: Snapshot,
    keeps_history: bool,
) -> Result<Vec<PortionDraft>> {
    let rows = sorted.num_rows();
    let mut drafts = Vec::with_capacity(rows.div_ceil(target_rows));
    let mut offset = 0;
    while offset < rows {
        let len = target_rows.min(rows - offset);
        let chunk = sorted.slice(offset, len);
        let (min_key, max_key) = KeyColumns::new(&chunk, key_indices)?
            .bounds(len)
            .ok_or_else(|| Error::Internal("empty compaction output chunk".into()))?;
        drafts.push(PortionDraft {
            batch: chunk,
            min_snapshot,
            max_snapshot,
            min_key,
            max_key,
            indexed: true,
            keeps_history,
        });
        offset += len;
    }
    Ok(drafts)
}
