//! Background execution of compaction tasks on the rayon pool.

use std::sync::Arc;

use crossbeam_channel as xchan;
use strata_result::{Error, Result};
use strata_storage::pager::Pager;
use strata_types::TaskId;

use super::cancel::CancellationToken;
use super::change_set::ChangeSet;
use super::executor::CompactionReport;
use crate::engine::ColumnEngine;

/// Submits planned tasks to worker threads.
pub struct CompactionScheduler<P: Pager> {
    engine: Arc<ColumnEngine<P>>,
}

impl<P: Pager> Clone for CompactionScheduler<P> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<P: Pager> CompactionScheduler<P> {
    pub fn new(engine: Arc<ColumnEngine<P>>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<ColumnEngine<P>> {
        &self.engine
    }

    /// Run `change_set` on the rayon pool. The outcome arrives through the
    /// returned handle.
    pub fn submit(&self, change_set: ChangeSet) -> CompactionHandle {
        let task_id = change_set.task_id();
        let cancel = CancellationToken::new();
        let (tx, rx) = xchan::bounded(1);

        let engine = Arc::clone(&self.engine);
        let worker_cancel = cancel.clone();
        rayon::spawn(move || {
            let outcome = engine.run_compaction(change_set, &worker_cancel);
            // The handle may be gone; nobody is waiting then.
            let _ = tx.send(outcome);
        });
        tracing::trace!("[COMPACTION] submitted task {task_id}");

        CompactionHandle {
            task_id,
            cancel,
            rx,
        }
    }

    /// Plan one task and submit it, if the planner finds anything.
    pub fn plan_and_submit(&self) -> Option<CompactionHandle> {
        self.engine.plan_compaction().map(|cs| self.submit(cs))
    }
}

/// Handle on a submitted compaction.
pub struct CompactionHandle {
    task_id: TaskId,
    cancel: CancellationToken,
    rx: xchan::Receiver<Result<CompactionReport>>,
}

impl CompactionHandle {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Request cancellation. Has no effect once the task reached its swap.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Block until the task finishes.
    pub fn wait(self) -> Result<CompactionReport> {
        self.rx.recv().map_err(|_| {
            Error::Internal(format!(
                "compaction task {} ended without reporting",
                self.task_id
            ))
        })?
    }

    /// The outcome, if the task already finished.
    pub fn try_result(&self) -> Option<Result<CompactionReport>> {
        self.rx.try_recv().ok()
    }
}
