use std::sync::{Arc, Mutex};

use rustc_hash::FxHashSet;
use strata_types::{PortionId, TaskId};

use super::planner::CompactionPriority;

/// Kind of structural change a task applies to the portion set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Compaction,
}

/// Lifecycle of a compaction task: `Planned -> Running -> {Committed, Aborted}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Planned,
    Running,
    Committed,
    Aborted,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Committed | TaskState::Aborted)
    }
}

/// Portions claimed by in-flight tasks.
#[derive(Debug, Default)]
pub(crate) struct BusyPortions {
    ids: Mutex<FxHashSet<PortionId>>,
}

impl BusyPortions {
    /// Run `plan` against the current busy set and claim whatever it picks.
    ///
    /// Selection and claim happen under one lock, so two planners never hand
    /// out the same portion.
    pub(crate) fn claim_with<T>(
        self: &Arc<Self>,
        plan: impl FnOnce(&FxHashSet<PortionId>) -> Option<(Vec<PortionId>, T)>,
    ) -> Option<(BusyGuard, T)> {
        let mut ids = self.ids.lock().expect("busy set lock poisoned");
        let (picked, extra) = plan(&ids)?;
        ids.extend(picked.iter().copied());
        Some((
            BusyGuard {
                registry: Arc::clone(self),
                ids: picked,
            },
            extra,
        ))
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.ids.lock().expect("busy set lock poisoned").len()
    }
}

/// Releases its claimed portions when dropped.
#[derive(Debug)]
pub(crate) struct BusyGuard {
    registry: Arc<BusyPortions>,
    ids: Vec<PortionId>,
}

impl BusyGuard {
    pub(crate) fn ids(&self) -> &[PortionId] {
        &self.ids
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        let mut busy = self.registry.ids.lock().expect("busy set lock poisoned");
        for id in &self.ids {
            busy.remove(id);
        }
    }
}

/// A planned task. Dropping it, whether run or not, returns its inputs to
/// the planner.
#[derive(Debug)]
pub struct ChangeSet {
    task_id: TaskId,
    kind: ChangeKind,
    base_version: u64,
    priority: CompactionPriority,
    state: TaskState,
    claim: BusyGuard,
}

impl ChangeSet {
    pub(crate) fn new(
        task_id: TaskId,
        base_version: u64,
        priority: CompactionPriority,
        claim: BusyGuard,
    ) -> Self {
        Self {
            task_id,
            kind: ChangeKind::Compaction,
            base_version,
            priority,
            state: TaskState::Planned,
            claim,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn kind(&self) -> ChangeKind {
        self.kind
    }

    /// Portion set version the inputs were selected from.
    pub fn base_version(&self) -> u64 {
        self.base_version
    }

    pub fn priority(&self) -> CompactionPriority {
        self.priority
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn input_portion_ids(&self) -> &[PortionId] {
        self.claim.ids()
    }

    pub(crate) fn advance(&mut self, next: TaskState) {
        debug_assert!(
            !self.state.is_terminal(),
            "task {} already {:?}",
            self.task_id,
            self.state
        );
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_releases_claims_on_drop() {
        let busy = Arc::new(BusyPortions::default());
        let (guard, ()) = busy.claim_with(|_| Some((vec![1, 2], ()))).unwrap();
        assert_eq!(busy.len(), 2);

        // A second planner sees the claimed ids.
        let seen = busy.claim_with(|taken| {
            assert!(taken.contains(&1) && taken.contains(&2));
            None::<(Vec<PortionId>, ())>
        });
        assert!(seen.is_none());

        drop(guard);
        assert_eq!(busy.len(), 0);
    }

    #[test]
    fn change_set_walks_its_states() {
        let busy = Arc::new(BusyPortions::default());
        let (guard, ()) = busy.claim_with(|_| Some((vec![7], ()))).unwrap();
        let mut cs = ChangeSet::new(3, 10, CompactionPriority::Optimization { weight: 2 }, guard);
        assert_eq!(cs.state(), TaskState::Planned);
        assert_eq!(cs.input_portion_ids(), &[7]);
        cs.advance(TaskState::Running);
        cs.advance(TaskState::Committed);
        assert!(cs.state().is_terminal());
        drop(cs);
        assert_eq!(busy.len(), 0);
    }
}
