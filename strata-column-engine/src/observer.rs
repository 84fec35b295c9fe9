//! Lifecycle hooks for embedding monitoring around the engine.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use strata_types::TaskId;

/// Terminal state of a compaction task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompactionOutcome {
    Committed,
    Aborted,
}

/// Receives engine events. Every method defaults to a no-op.
///
/// Hooks run inline on the thread that produced the event and must not
/// block. A panicking hook is logged and otherwise ignored.
pub trait EngineObserver: Send + Sync {
    /// A snapshot filter pass left `count` visible rows.
    fn on_rows_filtered(&self, _count: u64) {}

    fn on_compaction_started(&self, _task_id: TaskId) {}

    fn on_compaction_finished(&self, _task_id: TaskId, _outcome: CompactionOutcome) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl EngineObserver for NoopObserver {}

/// One event captured by [`RecordingObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservedEvent {
    RowsFiltered(u64),
    CompactionStarted(TaskId),
    CompactionFinished(TaskId, CompactionOutcome),
}

/// Observer that keeps an in-memory log of everything it sees.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ObservedEvent>>,
    rows_filtered: AtomicU64,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ObservedEvent> {
        self.events
            .lock()
            .expect("recording observer lock poisoned")
            .clone()
    }

    /// Sum of all `on_rows_filtered` counts.
    pub fn rows_filtered(&self) -> u64 {
        self.rows_filtered.load(Ordering::Relaxed)
    }

    pub fn finished(&self, outcome: CompactionOutcome) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, ObservedEvent::CompactionFinished(_, o) if *o == outcome))
            .count()
    }

    fn push(&self, event: ObservedEvent) {
        self.events
            .lock()
            .expect("recording observer lock poisoned")
            .push(event);
    }
}

impl EngineObserver for RecordingObserver {
    fn on_rows_filtered(&self, count: u64) {
        self.rows_filtered.fetch_add(count, Ordering::Relaxed);
        self.push(ObservedEvent::RowsFiltered(count));
    }

    fn on_compaction_started(&self, task_id: TaskId) {
        self.push(ObservedEvent::CompactionStarted(task_id));
    }

    fn on_compaction_finished(&self, task_id: TaskId, outcome: CompactionOutcome) {
        self.push(ObservedEvent::CompactionFinished(task_id, outcome));
    }
}

/// The engine's single observer registration; the last `set` wins.
pub(crate) struct ObserverSlot {
    current: RwLock<Arc<dyn EngineObserver>>,
}

impl ObserverSlot {
    pub(crate) fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(NoopObserver)),
        }
    }

    pub(crate) fn set(&self, observer: Arc<dyn EngineObserver>) {
        *self.current.write().expect("observer lock poisoned") = observer;
    }

    pub(crate) fn get(&self) -> Arc<dyn EngineObserver> {
        Arc::clone(&self.current.read().expect("observer lock poisoned"))
    }

    /// Run a hook, containing any panic it raises.
    pub(crate) fn notify(&self, hook: &'static str, call: impl FnOnce(&dyn EngineObserver)) {
        notify(self.get().as_ref(), hook, call);
    }
}

pub(crate) fn notify(
    observer: &dyn EngineObserver,
    hook: &'static str,
    call: impl FnOnce(&dyn EngineObserver),
) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| call(observer))) {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        tracing::warn!("[OBSERVER] {hook} hook panicked: {message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Exploding;

    impl EngineObserver for Exploding {
        fn on_rows_filtered(&self, _count: u64) {
            panic!("observer failure");
        }
    }

    #[test]
    fn panics_are_contained() {
        let slot = ObserverSlot::new();
        slot.set(Arc::new(Exploding));
        slot.notify("on_rows_filtered", |o| o.on_rows_filtered(3));
        // Default hooks still work after a panic.
        slot.notify("on_compaction_started", |o| o.on_compaction_started(1));
    }

    #[test]
    fn last_registration_wins() {
        let slot = ObserverSlot::new();
        let first = Arc::new(RecordingObserver::new());
        let second = Arc::new(RecordingObserver::new());
        slot.set(first.clone());
        slot.set(second.clone());
        slot.notify("on_rows_filtered", |o| o.on_rows_filtered(5));
        assert!(first.events().is_empty());
        assert_eq!(second.rows_filtered(), 5);
    }

    #[test]
    fn recording_observer_counts_outcomes() {
        let rec = RecordingObserver::new();
        rec.on_compaction_started(1);
        rec.on_compaction_finished(1, CompactionOutcome::Committed);
        rec.on_compaction_finished(2, CompactionOutcome::Aborted);
        assert_eq!(rec.finished(CompactionOutcome::Committed), 1);
        assert_eq!(rec.finished(CompactionOutcome::Aborted), 1);
        assert_eq!(rec.events()[0], ObservedEvent::CompactionStarted(1));
    }
}
