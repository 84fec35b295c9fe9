//! Background compaction through the scheduler.

use std::sync::{Arc, Mutex};

use crossbeam_channel as xchan;
use strata_column_engine::{
    ColumnEngine, CompactionOutcome, CompactionScheduler, EngineObserver, EngineSchema, Error,
    ReadRequest, RecordingObserver,
};
use strata_storage::pager::MemPager;
use strata_test_utils::{collect_id_name, id_name_batch, id_name_schema, init_tracing_for_tests};
use strata_types::{Snapshot, TaskId};

fn engine() -> Arc<ColumnEngine<MemPager>> {
    init_tracing_for_tests();
    let schema = EngineSchema::new(id_name_schema(), &["id"]).expect("schema");
    let engine = ColumnEngine::open(Arc::new(MemPager::new()), schema).expect("open");
    engine
        .append(&id_name_batch(&[(1, "a"), (2, "b")]), Snapshot::new(1, 0))
        .unwrap();
    engine
        .append(&id_name_batch(&[(2, "c"), (3, "d")]), Snapshot::new(2, 0))
        .unwrap();
    Arc::new(engine)
}

fn rows(engine: &ColumnEngine<MemPager>) -> Vec<(i64, Option<String>)> {
    collect_id_name(
        &engine
            .read(ReadRequest::new(Snapshot::MAX))
            .unwrap()
            .collect_batches()
            .unwrap(),
    )
}

#[test]
fn submitted_task_commits_in_the_background() {
    let engine = engine();
    let expected = rows(&engine);
    let scheduler = CompactionScheduler::new(Arc::clone(&engine));

    let handle = scheduler.plan_and_submit().expect("work to do");
    let task_id = handle.task_id();
    let report = handle.wait().unwrap();
    assert_eq!(report.task_id, task_id);
    assert_eq!(report.inputs.len(), 2);
    assert_eq!(rows(&engine), expected);
    assert!(scheduler.plan_and_submit().is_none());
}

/// Holds `on_compaction_started` until the test opens the gate.
struct Gate {
    open: Mutex<xchan::Receiver<()>>,
}

impl EngineObserver for Gate {
    fn on_compaction_started(&self, _task_id: TaskId) {
        let _ = self.open.lock().unwrap().recv();
    }
}

#[test]
fn cancel_before_the_swap_aborts() {
    let engine = engine();
    let version = engine.version();
    let (release, gate) = xchan::bounded(1);
    engine.set_observer(Arc::new(Gate {
        open: Mutex::new(gate),
    }));

    let scheduler = CompactionScheduler::new(Arc::clone(&engine));
    let handle = scheduler.plan_and_submit().unwrap();
    handle.cancel();
    release.send(()).unwrap();

    let err = handle.wait().unwrap_err();
    assert!(matches!(err, Error::Cancelled(_)));
    assert_eq!(engine.version(), version);
}

#[test]
fn outcome_can_be_polled() {
    let engine = engine();
    let observer = Arc::new(RecordingObserver::new());
    engine.set_observer(observer.clone());
    let scheduler = CompactionScheduler::new(Arc::clone(&engine));
    let handle = scheduler.plan_and_submit().unwrap();

    let report = loop {
        if let Some(outcome) = handle.try_result() {
            break outcome.unwrap();
        }
        std::thread::yield_now();
    };
    assert_eq!(report.rows_out, 3);
    assert_eq!(observer.finished(CompactionOutcome::Committed), 1);
}
