//! Compaction planning, execution, and concurrency.

use std::sync::Arc;
use std::sync::Mutex;
use std::thread;

use strata_column_engine::{
    CancellationToken, ColumnEngine, ColumnEngineConfig, CompactionOutcome, CompactionPriority,
    EngineObserver, EngineSchema, Error, ObservedEvent, ReadRequest, RecordingObserver, TaskState,
};
use strata_storage::pager::{BatchPut, MemPager, Pager};
use strata_storage::serialization::encode_batch;
use strata_test_utils::{
    collect_id_name, id_keys_batch, id_name_batch, id_name_schema, init_tracing_for_tests,
};
use strata_types::{PortionId, Snapshot};

type Rows = Vec<(i64, Option<String>)>;

fn engine_with(config: ColumnEngineConfig) -> Arc<ColumnEngine<MemPager>> {
    init_tracing_for_tests();
    let schema = EngineSchema::new(id_name_schema(), &["id"]).expect("schema");
    Arc::new(ColumnEngine::open_with_config(Arc::new(MemPager::new()), schema, config).expect("open"))
}

fn engine() -> Arc<ColumnEngine<MemPager>> {
    engine_with(ColumnEngineConfig::default())
}

fn at(engine: &ColumnEngine<MemPager>, snapshot: Snapshot) -> Rows {
    let batches = engine
        .read(ReadRequest::new(snapshot))
        .expect("read")
        .collect_batches()
        .expect("stream");
    collect_id_name(&batches)
}

fn live_ids(engine: &ColumnEngine<MemPager>) -> Vec<PortionId> {
    let mut ids: Vec<_> = engine.current_portions().iter().map(|p| p.id()).collect();
    ids.sort_unstable();
    ids
}

fn load_overlapping(engine: &ColumnEngine<MemPager>, portions: u64) {
    for step in 1..=portions {
        let rows: Vec<(i64, String)> = (0..20)
            .map(|k| (k * 3 + step as i64 % 3, format!("s{step}")))
            .collect();
        let pairs: Vec<(i64, &str)> = rows.iter().map(|(k, v)| (*k, v.as_str())).collect();
        engine
            .append(&id_name_batch(&pairs), Snapshot::new(step, 0))
            .unwrap();
    }
}

#[test]
fn compaction_is_transparent_to_current_reads() {
    let engine = engine();
    load_overlapping(&engine, 6);
    let top = engine
        .current_portions()
        .iter()
        .map(|p| p.meta().max_snapshot)
        .max()
        .unwrap();

    let before = at(&engine, top);
    let before_max = at(&engine, Snapshot::MAX);
    let reports = engine.compact_all().unwrap();
    assert!(!reports.is_empty());
    assert_eq!(at(&engine, top), before);
    assert_eq!(at(&engine, Snapshot::MAX), before_max);

    let set = engine.current_portions();
    assert!(set.iter().all(|p| p.meta().indexed));
    let rows: u64 = set.iter().map(|p| p.meta().row_count).sum();
    assert_eq!(rows as usize, before.len());
}

#[test]
fn oldest_reader_keeps_older_reads_stable() {
    let engine = engine();
    load_overlapping(&engine, 6);
    engine
        .delete(&id_keys_batch(&[0, 3]), Snapshot::new(7, 0))
        .unwrap();
    let oldest = Snapshot::new(3, 0);
    engine.set_oldest_reader(Some(oldest));

    let reads: Vec<Snapshot> = (3..=8).map(|step| Snapshot::new(step, 0)).collect();
    let before: Vec<Rows> = reads.iter().map(|s| at(&engine, *s)).collect();
    assert_ne!(before[0], before[5], "the reads span distinct versions");

    assert!(!engine.compact_all().unwrap().is_empty());
    let after: Vec<Rows> = reads.iter().map(|s| at(&engine, *s)).collect();
    assert_eq!(after, before);
    assert_eq!(at(&engine, Snapshot::new(8, 0)), at(&engine, Snapshot::MAX));

    // Without a reader to protect, the next rewrite keeps only what the
    // newest snapshot sees.
    engine.set_oldest_reader(None);
    engine
        .append(&id_name_batch(&[(1, "again")]), Snapshot::new(9, 0))
        .unwrap();
    let latest = at(&engine, Snapshot::MAX);
    engine.compact_all().unwrap();
    assert_eq!(at(&engine, Snapshot::MAX), latest);
    let rows: u64 = engine
        .current_portions()
        .iter()
        .map(|p| p.meta().row_count)
        .sum();
    assert_eq!(rows as usize, latest.len());
}

#[test]
fn outputs_respect_target_size_and_cover_the_inputs() {
    let engine = engine_with(ColumnEngineConfig {
        target_portion_rows: 7,
        ..Default::default()
    });
    let rows: Vec<(i64, &str)> = (0..30).map(|k| (k, "x")).collect();
    engine
        .append(&id_name_batch(&rows), Snapshot::new(1, 0))
        .unwrap();
    engine
        .append(&id_name_batch(&rows[10..20]), Snapshot::new(2, 0))
        .unwrap();

    let report = engine.compact().unwrap().expect("task");
    assert_eq!(report.rows_in, 40);
    assert_eq!(report.rows_out, 30);
    assert_eq!(report.outputs.len(), 5);

    let set = engine.current_portions();
    let mut metas: Vec<_> = set.iter().map(|p| p.meta().clone()).collect();
    metas.sort_by(|a, b| a.min_key.cmp(&b.min_key));
    assert!(metas.iter().all(|m| m.row_count <= 7));
    assert!(metas.windows(2).all(|w| w[0].max_key < w[1].min_key));
    assert!(metas.iter().all(|m| m.min_snapshot == Snapshot::new(1, 0)));
    assert!(metas.iter().all(|m| m.max_snapshot == Snapshot::new(2, 0)));
    assert_eq!(at(&engine, Snapshot::MAX).len(), 30);
}

#[test]
fn retired_inputs_stay_readable_through_open_views() {
    let engine = engine();
    load_overlapping(&engine, 3);
    let before_ids = live_ids(&engine);
    let stream = engine.read(ReadRequest::new(Snapshot::MAX)).unwrap();
    let expected = at(&engine, Snapshot::MAX);

    engine.compact_all().unwrap();
    let after_ids = live_ids(&engine);
    assert!(before_ids.iter().all(|id| !after_ids.contains(id)));

    // The stream pinned the old set; its blobs are freed only once it drops.
    let blobs_with_stream = engine.pager().blob_count();
    assert_eq!(collect_id_name(&stream.collect_batches().unwrap()), expected);
    assert!(engine.pager().blob_count() < blobs_with_stream);
}

#[test]
fn planner_prefers_critical_clusters() {
    let engine = engine_with(ColumnEngineConfig {
        critical_unindexed_portions: 2,
        ..Default::default()
    });
    engine
        .append(&id_name_batch(&[(1, "a"), (10, "b")]), Snapshot::new(1, 0))
        .unwrap();
    engine
        .append(&id_name_batch(&[(5, "c")]), Snapshot::new(2, 0))
        .unwrap();

    let cs = engine.plan_compaction().expect("plan");
    assert_eq!(cs.priority(), CompactionPriority::Critical { weight: 2 });
    assert_eq!(cs.state(), TaskState::Planned);
    assert_eq!(cs.input_portion_ids().len(), 2);

    // Everything is claimed; nothing else to plan until the task is gone.
    assert!(engine.plan_compaction().is_none());
    drop(cs);
    assert!(engine.plan_compaction().is_some());
}

#[test]
fn cancelled_task_leaves_the_set_alone() {
    let engine = engine();
    load_overlapping(&engine, 2);
    let version = engine.version();
    let ids = live_ids(&engine);
    let blobs = engine.pager().blob_count();

    let cs = engine.plan_compaction().unwrap();
    let token = CancellationToken::new();
    token.cancel();
    let err = engine.run_compaction(cs, &token).unwrap_err();
    assert!(matches!(err, Error::Cancelled(_)));

    assert_eq!(engine.version(), version);
    assert_eq!(live_ids(&engine), ids);
    assert_eq!(engine.pager().blob_count(), blobs);
    // Claims were released with the change set.
    assert!(engine.plan_compaction().is_some());
    assert_eq!(engine.compaction_counters().tasks_aborted, 1);
}

#[test]
fn rows_outside_the_declared_key_range_abort_the_task() {
    let engine = engine_with(ColumnEngineConfig {
        cache_portion_batches: false,
        ..Default::default()
    });
    let id = engine
        .append(&id_name_batch(&[(1, "a"), (2, "b")]), Snapshot::new(1, 0))
        .unwrap();

    // Overwrite the blob with rows that fall outside the recorded [1, 2].
    let forged = engine
        .schema()
        .to_storage_batch(&id_name_batch(&[(1, "a"), (99, "z")]), Snapshot::new(1, 0))
        .unwrap();
    let blob_key = engine.current_portions().get(id).unwrap().meta().blob_key;
    engine
        .pager()
        .batch_put(&[BatchPut::Raw {
            key: blob_key,
            bytes: encode_batch(&forged).unwrap(),
        }])
        .unwrap();

    let observer = Arc::new(RecordingObserver::new());
    engine.set_observer(observer.clone());
    let err = engine.compact().unwrap_err();
    assert!(matches!(err, Error::KeyRangeViolation { portion_id, .. } if portion_id == id));
    assert_eq!(live_ids(&engine), vec![id]);
    assert_eq!(observer.finished(CompactionOutcome::Aborted), 1);
}

#[test]
fn observer_sees_the_task_lifecycle() {
    let engine = engine();
    load_overlapping(&engine, 2);
    let observer = Arc::new(RecordingObserver::new());
    engine.set_observer(observer.clone());

    let report = engine.compact().unwrap().unwrap();
    let events = observer.events();
    assert_eq!(events.first(), Some(&ObservedEvent::CompactionStarted(report.task_id)));
    assert_eq!(
        events.last(),
        Some(&ObservedEvent::CompactionFinished(
            report.task_id,
            CompactionOutcome::Committed
        ))
    );
    assert!(events.contains(&ObservedEvent::RowsFiltered(report.rows_out)));

    let counters = engine.compaction_counters();
    assert_eq!(counters.tasks_committed, 1);
    assert_eq!(counters.input_rows, report.rows_in);
    assert_eq!(counters.rows_dropped(), report.rows_in - report.rows_out);
    assert!(counters.input_bytes > 0);
    assert_eq!(counters.rows_filtered, report.rows_out);
}

struct PanickingObserver;

impl EngineObserver for PanickingObserver {
    fn on_compaction_started(&self, _task_id: u64) {
        panic!("observer blew up");
    }
}

#[test]
fn panicking_observer_does_not_break_compaction() {
    let engine = engine();
    load_overlapping(&engine, 2);
    engine.set_observer(Arc::new(PanickingObserver));
    let expected = at(&engine, Snapshot::MAX);
    assert!(engine.compact().unwrap().is_some());
    assert_eq!(at(&engine, Snapshot::MAX), expected);
}

/// Appends an old-snapshot row under the task's key range the first time the
/// snapshot filter runs, i.e. after the task has read its base set.
struct LateAppender {
    engine: Mutex<Option<Arc<ColumnEngine<MemPager>>>>,
}

impl EngineObserver for LateAppender {
    fn on_rows_filtered(&self, _count: u64) {
        if let Some(engine) = self.engine.lock().unwrap().take() {
            engine
                .append(&id_name_batch(&[(2, "late")]), Snapshot::new(1, 5))
                .unwrap();
        }
    }
}

#[test]
fn late_append_under_dropped_tombstones_conflicts() {
    let engine = engine();
    engine
        .append(&id_name_batch(&[(1, "a"), (3, "c")]), Snapshot::new(1, 0))
        .unwrap();
    engine
        .delete(&id_keys_batch(&[1, 3]), Snapshot::new(2, 0))
        .unwrap();

    let observer = Arc::new(LateAppender {
        engine: Mutex::new(Some(Arc::clone(&engine))),
    });
    engine.set_observer(observer);
    let cs = engine.plan_compaction().unwrap();
    let inputs = cs.input_portion_ids().to_vec();
    let err = engine
        .run_compaction(cs, &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, Error::CompactionConflict(_)));

    // The inputs are untouched and the late row is visible.
    let live = live_ids(&engine);
    assert!(inputs.iter().all(|id| live.contains(id)));
    assert_eq!(at(&engine, Snapshot::MAX), vec![(2, Some("late".to_string()))]);

    // Replanning converges.
    engine.compact_all().unwrap();
    assert_eq!(at(&engine, Snapshot::MAX), vec![(2, Some("late".to_string()))]);
    assert_eq!(engine.compaction_counters().conflicts, 1);
}

#[test]
fn concurrent_compactions_and_appends_lose_nothing() {
    let engine = engine_with(ColumnEngineConfig {
        max_portions_per_task: 3,
        target_portion_rows: 16,
        ..Default::default()
    });

    let writers: Vec<_> = (0..4)
        .map(|writer| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for round in 0..10u64 {
                    let base = writer * 1_000 + round as i64 * 10;
                    let rows: Vec<(i64, String)> =
                        (0..10).map(|k| (base + k, format!("w{writer}r{round}"))).collect();
                    let pairs: Vec<(i64, &str)> =
                        rows.iter().map(|(k, v)| (*k, v.as_str())).collect();
                    engine
                        .append(&id_name_batch(&pairs), Snapshot::new(round + 1, writer as u64))
                        .unwrap();
                }
            })
        })
        .collect();
    let compactors: Vec<_> = (0..3)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for _ in 0..20 {
                    engine.compact().unwrap();
                }
            })
        })
        .collect();
    for handle in writers.into_iter().chain(compactors) {
        handle.join().unwrap();
    }
    engine.compact_all().unwrap();

    let rows = at(&engine, Snapshot::MAX);
    assert_eq!(rows.len(), 400);
    let mut keys: Vec<i64> = rows.iter().map(|(k, _)| *k).collect();
    keys.dedup();
    assert_eq!(keys.len(), 400);
    let stored: u64 = engine
        .current_portions()
        .iter()
        .map(|p| p.meta().row_count)
        .sum();
    assert_eq!(stored, 400);
}
