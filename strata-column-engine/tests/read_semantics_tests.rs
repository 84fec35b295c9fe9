//! End-to-end visibility rules across appends, deletes, and compaction.

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use strata_column_engine::{ColumnEngine, ColumnEngineConfig, EngineSchema, ReadRequest};
use strata_storage::pager::MemPager;
use strata_test_utils::{
    collect_id_name, id_keys_batch, id_name_batch, id_name_schema, init_tracing_for_tests,
};
use strata_types::{KeyRange, RowKey, Snapshot};

type Rows = Vec<(i64, Option<String>)>;

fn new_engine() -> ColumnEngine<MemPager> {
    init_tracing_for_tests();
    let schema = EngineSchema::new(id_name_schema(), &["id"]).expect("schema");
    ColumnEngine::open(Arc::new(MemPager::new()), schema).expect("open")
}

fn scan(engine: &ColumnEngine<MemPager>, request: ReadRequest) -> Rows {
    let batches = engine
        .read(request)
        .expect("read")
        .collect_batches()
        .expect("stream");
    collect_id_name(&batches)
}

fn at(engine: &ColumnEngine<MemPager>, snapshot: Snapshot) -> Rows {
    scan(engine, ReadRequest::new(snapshot))
}

fn named(pairs: &[(i64, &str)]) -> Rows {
    pairs.iter().map(|(k, v)| (*k, Some(v.to_string()))).collect()
}

#[test]
fn overwrite_is_resolved_by_commit_order() {
    let engine = new_engine();
    engine
        .append(&id_name_batch(&[(1, "a")]), Snapshot::new(1, 0))
        .unwrap();
    engine
        .append(&id_name_batch(&[(1, "b")]), Snapshot::new(2, 0))
        .unwrap();

    assert_eq!(at(&engine, Snapshot::new(2, 0)), named(&[(1, "b")]));
    assert_eq!(at(&engine, Snapshot::new(1, 0)), named(&[(1, "a")]));

    // Same answer once the two portions are merged.
    let report = engine.compact().unwrap().expect("overlapping portions compact");
    assert_eq!(report.rows_in, 2);
    assert_eq!(report.rows_out, 1);
    assert_eq!(at(&engine, Snapshot::new(2, 0)), named(&[(1, "b")]));
    assert_eq!(engine.current_portions().len(), 1);
}

#[test]
fn disjoint_portions_do_not_interact() {
    let engine = new_engine();
    let left: Vec<(i64, &str)> = (1..=5).map(|k| (k, "left")).collect();
    let right: Vec<(i64, &str)> = (6..=10).map(|k| (k, "right")).collect();
    engine
        .append(&id_name_batch(&right), Snapshot::new(1, 0))
        .unwrap();
    engine
        .append(&id_name_batch(&left), Snapshot::new(1, 1))
        .unwrap();

    let rows = at(&engine, Snapshot::new(1, 1));
    assert_eq!(rows.len(), 10);
    assert_eq!(
        rows.iter().map(|(k, _)| *k).collect::<Vec<_>>(),
        (1..=10).collect::<Vec<_>>()
    );
    assert!(rows[..5].iter().all(|(_, v)| v.as_deref() == Some("left")));
    assert!(rows[5..].iter().all(|(_, v)| v.as_deref() == Some("right")));

    // Only the right half is visible before the left half committed.
    assert_eq!(at(&engine, Snapshot::new(1, 0)).len(), 5);

    // A range read only touches the portion it overlaps.
    let view = engine.snapshot_view(Snapshot::MAX);
    let upper = KeyRange::inclusive(RowKey::single(7i64), RowKey::single(8i64));
    assert_eq!(view.candidates(&upper).len(), 1);
    assert_eq!(
        scan(&engine, ReadRequest::new(Snapshot::MAX).with_range(upper)),
        named(&[(7, "right"), (8, "right")])
    );
}

#[test]
fn deleted_keys_stay_deleted_through_compaction() {
    let engine = new_engine();
    engine
        .append(&id_name_batch(&[(1, "a"), (2, "b"), (3, "c")]), Snapshot::new(1, 0))
        .unwrap();
    engine
        .delete(&id_keys_batch(&[2]), Snapshot::new(2, 0))
        .unwrap();
    engine
        .append(&id_name_batch(&[(2, "again")]), Snapshot::new(3, 0))
        .unwrap();

    let expected_at_2 = named(&[(1, "a"), (3, "c")]);
    let expected_at_3 = named(&[(1, "a"), (2, "again"), (3, "c")]);
    assert_eq!(at(&engine, Snapshot::new(2, 0)), expected_at_2);
    assert_eq!(at(&engine, Snapshot::new(3, 0)), expected_at_3);

    engine.compact_all().unwrap();
    assert_eq!(at(&engine, Snapshot::new(3, 0)), expected_at_3);
    assert!(engine.current_portions().iter().all(|p| p.meta().indexed));
}

#[test]
fn fully_deleted_range_compacts_away() {
    let engine = new_engine();
    engine
        .append(&id_name_batch(&[(1, "a"), (2, "b")]), Snapshot::new(1, 0))
        .unwrap();
    engine
        .delete(&id_keys_batch(&[1, 2]), Snapshot::new(2, 0))
        .unwrap();

    let report = engine.compact().unwrap().expect("task");
    assert_eq!(report.rows_out, 0);
    assert!(report.outputs.is_empty());
    assert!(engine.current_portions().is_empty());
    assert!(at(&engine, Snapshot::MAX).is_empty());
}

#[test]
fn tombstone_shadowing_an_outside_portion_is_kept() {
    init_tracing_for_tests();
    let schema = EngineSchema::new(id_name_schema(), &["id"]).unwrap();
    let config = ColumnEngineConfig {
        max_portions_per_task: 1,
        ..Default::default()
    };
    let engine =
        ColumnEngine::open_with_config(Arc::new(MemPager::new()), schema, config).unwrap();

    // Indexed portion covering [1, 100].
    engine
        .append(&id_name_batch(&[(1, "lo"), (50, "mid"), (100, "hi")]), Snapshot::new(1, 0))
        .unwrap();
    engine.compact_all().unwrap();
    let wide = engine.current_portions().iter().next().unwrap().id();

    // With one input per task the tombstone is compacted on its own. The wide
    // portion still holds key 50, so the tombstone has to survive.
    let tombstone = engine
        .delete(&id_keys_batch(&[50]), Snapshot::new(2, 0))
        .unwrap();
    let survivors = named(&[(1, "lo"), (100, "hi")]);
    assert_eq!(at(&engine, Snapshot::MAX), survivors);

    let reports = engine.compact_all().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].inputs, vec![tombstone]);
    assert_eq!(reports[0].rows_out, 1);

    let set = engine.current_portions();
    assert_eq!(set.len(), 2);
    assert!(set.contains(wide));
    assert!(!set.contains(tombstone));
    assert_eq!(at(&engine, Snapshot::MAX), survivors);
    assert_eq!(at(&engine, Snapshot::new(1, 0)), named(&[(1, "lo"), (50, "mid"), (100, "hi")]));
}

#[test]
fn every_key_survives_exactly_once() {
    let engine = new_engine();
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut model: BTreeMap<i64, Option<String>> = BTreeMap::new();

    for step in 1..=40u64 {
        let commit = Snapshot::new(step, 0);
        if rng.random_bool(0.2) {
            let mut keys: Vec<i64> = (0..rng.random_range(1..4))
                .map(|_| rng.random_range(0..50))
                .collect();
            keys.sort_unstable();
            keys.dedup();
            engine.delete(&id_keys_batch(&keys), commit).unwrap();
            for key in keys {
                model.remove(&key);
            }
        } else {
            let mut rows: BTreeMap<i64, String> = BTreeMap::new();
            for _ in 0..rng.random_range(1..12) {
                let key = rng.random_range(0..50);
                rows.insert(key, format!("v{step}-{key}"));
            }
            let pairs: Vec<(i64, &str)> = rows.iter().map(|(k, v)| (*k, v.as_str())).collect();
            engine.append(&id_name_batch(&pairs), commit).unwrap();
            for (key, value) in rows {
                model.insert(key, Some(value));
            }
        }
        if step % 9 == 0 {
            engine.compact().unwrap();
        }
    }

    let expected: Rows = model.clone().into_iter().collect();
    assert_eq!(at(&engine, Snapshot::MAX), expected);

    engine.compact_all().unwrap();
    let after = at(&engine, Snapshot::MAX);
    assert_eq!(after, expected);
    let mut keys: Vec<i64> = after.iter().map(|(k, _)| *k).collect();
    keys.dedup();
    assert_eq!(keys.len(), after.len());
}
