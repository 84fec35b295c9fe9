use std::collections::VecDeque;
use std::sync::Arc;

use arrow::array::BooleanArray;
use arrow::compute::{concat_batches, not};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use strata_expr::Expr;
use strata_result::Result;
use strata_storage::pager::Pager;
use strata_types::{KeyRange, Snapshot};

use super::ColumnEngine;
use crate::cluster::overlap_clusters;
use crate::filter::{
    RowRevisit, apply_mask, intersect, key_range_filter, not_indexed_filter, portion_matches,
    predicate_filter, snapshot_filter, validate_predicate,
};
use crate::observer::{EngineObserver, notify};
use crate::portion::{FetchPolicy, Portion};
use crate::portion_set::PortionSet;
use crate::rows::{SystemColumns, sort_by_key};
use crate::schema::EngineSchema;

/// A scan over the engine as of one snapshot.
#[derive(Clone, Debug)]
pub struct ReadRequest {
    pub snapshot: Snapshot,
    pub range: KeyRange,
    pub predicate: Expr<String>,
    /// User column names to emit; `None` emits every user column.
    pub projection: Option<Vec<String>>,
}

impl ReadRequest {
    /// Every visible row at `snapshot`, all columns.
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot,
            range: KeyRange::all(),
            predicate: Expr::always(),
            projection: None,
        }
    }

    pub fn with_range(mut self, range: KeyRange) -> Self {
        self.range = range;
        self
    }

    pub fn with_predicate(mut self, predicate: Expr<String>) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn with_projection<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(columns.into_iter().map(Into::into).collect());
        self
    }
}

/// Point-in-time handle on the live portion set, paired with the snapshot
/// it reads at. Later appends and compactions are invisible to it.
pub struct EngineSnapshotView<P: Pager> {
    portions: Arc<PortionSet<P>>,
    snapshot: Snapshot,
}

impl<P: Pager> EngineSnapshotView<P> {
    pub fn portions(&self) -> &Arc<PortionSet<P>> {
        &self.portions
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot
    }

    pub fn version(&self) -> u64 {
        self.portions.version()
    }

    /// Portions that may contribute rows to a read over `range`.
    pub fn candidates(&self, range: &KeyRange) -> Vec<Arc<Portion<P>>> {
        self.portions
            .overlapping(range)
            .filter(|p| portion_matches(p.meta(), self.snapshot, range))
            .cloned()
            .collect()
    }
}

impl<P: Pager> ColumnEngine<P> {
    pub fn snapshot_view(&self, snapshot: Snapshot) -> EngineSnapshotView<P> {
        EngineSnapshotView {
            portions: self.current_portions(),
            snapshot,
        }
    }

    /// Start a lazy scan.
    ///
    /// The predicate and projection are checked here; blob fetches and
    /// filtering happen one overlap cluster at a time as the stream is
    /// pulled.
    pub fn read(&self, request: ReadRequest) -> Result<ReadStream<P>> {
        let ReadRequest {
            snapshot,
            range,
            predicate,
            projection,
        } = request;
        validate_predicate(&predicate, self.schema.user_schema())?;
        let projection = self.schema.projection_indices(projection.as_deref())?;
        let output = self.schema.output_schema(&projection)?;

        let view = self.snapshot_view(snapshot);
        let clusters: VecDeque<_> = overlap_clusters(view.candidates(&range), |p| p.meta()).into();
        tracing::trace!(
            "[ENGINE] read at {} over version {}: {} clusters",
            snapshot,
            view.version(),
            clusters.len()
        );

        Ok(ReadStream {
            view,
            clusters,
            pending: VecDeque::new(),
            failed: false,
            ctx: ReadContext {
                schema: Arc::clone(&self.schema),
                range,
                predicate,
                projection,
                output,
                policy: *self.store.policy(),
                batch_rows: self.config.read_batch_rows.max(1),
                observer: self.observer.get(),
            },
        })
    }
}

struct ReadContext {
    schema: Arc<EngineSchema>,
    range: KeyRange,
    predicate: Expr<String>,
    projection: Vec<usize>,
    output: SchemaRef,
    policy: FetchPolicy,
    batch_rows: usize,
    observer: Arc<dyn EngineObserver>,
}

impl ReadContext {
    fn read_cluster<P: Pager>(
        &self,
        cluster: &[Arc<Portion<P>>],
        read: Snapshot,
    ) -> Result<RecordBatch> {
        let selected = match cluster {
            [portion] if portion.meta().max_snapshot <= read => {
                let batch = portion.fetch(&self.policy)?;
                match not_indexed_filter(portion.meta(), &batch) {
                    RowRevisit::PassThrough => self.filter_settled(&batch)?,
                    RowRevisit::Revisit(_) => self.filter_merged(vec![batch], read)?,
                }
            }
            _ => {
                let batches = cluster
                    .iter()
                    .map(|p| p.fetch(&self.policy))
                    .collect::<Result<Vec<_>>>()?;
                self.filter_merged(batches, read)?
            }
        };
        self.schema
            .project(&selected, &self.projection, &self.output)
    }

    /// Indexed rows are already one version per key, sorted, and all visible.
    /// Only surviving tombstones, the key range, and the predicate apply.
    fn filter_settled(&self, batch: &RecordBatch) -> Result<RecordBatch> {
        let live = not(SystemColumns::new(batch)?.deleted())?;
        let in_range = key_range_filter(batch, self.schema.key_indices(), &self.range)?;
        let candidates = apply_mask(batch, &intersect(&[&live, &in_range], batch.num_rows())?)?;
        self.apply_predicate(candidates)
    }

    fn filter_merged(&self, batches: Vec<RecordBatch>, read: Snapshot) -> Result<RecordBatch> {
        let key_indices = self.schema.key_indices();
        let merged = concat_batches(self.schema.storage_schema(), &batches)?;
        drop(batches);

        let visible = snapshot_filter(&merged, key_indices, read)?;
        let count = visible.true_count() as u64;
        notify(self.observer.as_ref(), "on_rows_filtered", |o| {
            o.on_rows_filtered(count)
        });

        let in_range = key_range_filter(&merged, key_indices, &self.range)?;
        let candidates =
            apply_mask(&merged, &intersect(&[&visible, &in_range], merged.num_rows())?)?;
        let matching = self.apply_predicate(candidates)?;
        sort_by_key(&matching, key_indices)
    }

    fn apply_predicate(&self, batch: RecordBatch) -> Result<RecordBatch> {
        if self.predicate.is_trivially_true() || batch.num_rows() == 0 {
            return Ok(batch);
        }
        let mask: BooleanArray = predicate_filter(&batch, &self.predicate)?;
        apply_mask(&batch, &mask)
    }
}

/// Lazy, finite, non-restartable sequence of result batches in ascending key
/// order.
///
/// Each call to `next` produces at most one batch, fetching and filtering the
/// next overlap cluster only when the previous one is exhausted. After an
/// error the stream ends.
pub struct ReadStream<P: Pager> {
    view: EngineSnapshotView<P>,
    clusters: VecDeque<Vec<Arc<Portion<P>>>>,
    pending: VecDeque<RecordBatch>,
    failed: bool,
    ctx: ReadContext,
}

impl<P: Pager> ReadStream<P> {
    /// Schema of the emitted batches.
    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.ctx.output)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.view.snapshot()
    }

    /// Overlap clusters not yet fetched.
    pub fn remaining_clusters(&self) -> usize {
        self.clusters.len()
    }

    /// Drain the stream into a vector, stopping at the first error.
    pub fn collect_batches(self) -> Result<Vec<RecordBatch>> {
        self.collect()
    }

    fn enqueue(&mut self, batch: RecordBatch) {
        let rows = batch.num_rows();
        let step = self.ctx.batch_rows;
        let mut offset = 0;
        while offset < rows {
            let len = step.min(rows - offset);
            self.pending.push_back(batch.slice(offset, len));
            offset += len;
        }
    }
}

impl<P: Pager> Iterator for ReadStream<P> {
    type Item = Result<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(batch) = self.pending.pop_front() {
                return Some(Ok(batch));
            }
            if self.failed {
                return None;
            }
            let cluster = self.clusters.pop_front()?;
            match self.ctx.read_cluster(&cluster, self.view.snapshot()) {
                Ok(batch) => self.enqueue(batch),
                Err(err) => {
                    if err.is_integrity_violation() {
                        tracing::error!(
                            "[ENGINE] read at {} over version {} hit corrupt data: {err}",
                            self.view.snapshot(),
                            self.view.version()
                        );
                    } else {
                        tracing::debug!("[ENGINE] read at {} failed: {err}", self.view.snapshot());
                    }
                    self.failed = true;
                    self.clusters.clear();
                    return Some(Err(err));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::RecordingObserver;
    use crate::schema::EngineSchema;
    use std::ops::Bound;
    use strata_expr::{Literal, Operator};
    use strata_storage::pager::MemPager;
    use strata_test_utils::{collect_id_name, id_keys_batch, id_name_batch, id_name_schema};
    use strata_types::RowKey;

    fn engine() -> ColumnEngine<MemPager> {
        let schema = EngineSchema::new(id_name_schema(), &["id"]).unwrap();
        ColumnEngine::open(Arc::new(MemPager::new()), schema).unwrap()
    }

    fn rows(engine: &ColumnEngine<MemPager>, request: ReadRequest) -> Vec<(i64, Option<String>)> {
        let batches = engine.read(request).unwrap().collect_batches().unwrap();
        collect_id_name(&batches)
    }

    fn named(pairs: &[(i64, &str)]) -> Vec<(i64, Option<String>)> {
        pairs.iter().map(|(k, v)| (*k, Some(v.to_string()))).collect()
    }

    #[test]
    fn later_commit_overwrites_earlier() {
        let engine = engine();
        engine
            .append(&id_name_batch(&[(1, "a")]), Snapshot::new(1, 0))
            .unwrap();
        engine
            .append(&id_name_batch(&[(1, "b")]), Snapshot::new(2, 0))
            .unwrap();

        assert_eq!(rows(&engine, ReadRequest::new(Snapshot::new(2, 0))), named(&[(1, "b")]));
        assert_eq!(rows(&engine, ReadRequest::new(Snapshot::new(1, 5))), named(&[(1, "a")]));
        assert!(rows(&engine, ReadRequest::new(Snapshot::new(0, 9))).is_empty());
    }

    #[test]
    fn tombstones_hide_keys_from_later_reads() {
        let engine = engine();
        engine
            .append(&id_name_batch(&[(1, "a"), (2, "b")]), Snapshot::new(1, 0))
            .unwrap();
        engine
            .delete(&id_keys_batch(&[1]), Snapshot::new(2, 0))
            .unwrap();

        assert_eq!(rows(&engine, ReadRequest::new(Snapshot::new(2, 0))), named(&[(2, "b")]));
        assert_eq!(
            rows(&engine, ReadRequest::new(Snapshot::new(1, 0))),
            named(&[(1, "a"), (2, "b")])
        );
    }

    #[test]
    fn range_predicate_and_projection_compose() {
        let engine = engine();
        engine
            .append(
                &id_name_batch(&[(1, "apple"), (2, "banana"), (3, "avocado"), (4, "cherry")]),
                Snapshot::new(1, 0),
            )
            .unwrap();

        let request = ReadRequest::new(Snapshot::new(1, 0))
            .with_range(KeyRange::new(
                Bound::Included(RowKey::single(2i64)),
                Bound::Unbounded,
            ))
            .with_predicate(Expr::pred("name".to_string(), Operator::StartsWith("a".into())))
            .with_projection(["id"]);
        let batches = engine.read(request).unwrap().collect_batches().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].num_columns(), 1);
        assert_eq!(batches[0].schema().field(0).name(), "id");
        assert_eq!(batches[0].num_rows(), 1);
    }

    #[test]
    fn invalid_requests_fail_before_streaming() {
        let engine = engine();
        let bad_predicate = ReadRequest::new(Snapshot::MAX)
            .with_predicate(Expr::pred("nope".to_string(), Operator::Equals(Literal::from(1))));
        assert!(engine.read(bad_predicate).is_err());
        let bad_projection = ReadRequest::new(Snapshot::MAX).with_projection(["nope"]);
        assert!(engine.read(bad_projection).is_err());
    }

    #[test]
    fn output_batches_are_bounded_and_ordered() {
        let schema = EngineSchema::new(id_name_schema(), &["id"]).unwrap();
        let config = crate::config::ColumnEngineConfig {
            read_batch_rows: 2,
            ..Default::default()
        };
        let engine =
            ColumnEngine::open_with_config(Arc::new(MemPager::new()), schema, config).unwrap();
        engine
            .append(
                &id_name_batch(&[(5, "e"), (1, "a"), (3, "c"), (2, "b"), (4, "d")]),
                Snapshot::new(1, 0),
            )
            .unwrap();

        let batches = engine
            .read(ReadRequest::new(Snapshot::MAX))
            .unwrap()
            .collect_batches()
            .unwrap();
        assert_eq!(
            batches.iter().map(RecordBatch::num_rows).collect::<Vec<_>>(),
            vec![2, 2, 1]
        );
        let ids: Vec<i64> = collect_id_name(&batches).into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn stream_is_pinned_to_its_view() {
        let engine = engine();
        engine
            .append(&id_name_batch(&[(1, "a")]), Snapshot::new(1, 0))
            .unwrap();
        let stream = engine.read(ReadRequest::new(Snapshot::MAX)).unwrap();
        engine
            .append(&id_name_batch(&[(2, "b")]), Snapshot::new(2, 0))
            .unwrap();
        assert_eq!(collect_id_name(&stream.collect_batches().unwrap()), named(&[(1, "a")]));
    }

    #[test]
    fn snapshot_filter_reports_visible_rows() {
        let engine = engine();
        let observer = Arc::new(RecordingObserver::new());
        engine.set_observer(observer.clone());
        engine
            .append(&id_name_batch(&[(1, "a"), (2, "b")]), Snapshot::new(1, 0))
            .unwrap();
        engine
            .append(&id_name_batch(&[(1, "z")]), Snapshot::new(2, 0))
            .unwrap();
        rows(&engine, ReadRequest::new(Snapshot::MAX));
        assert_eq!(observer.rows_filtered(), 2);
    }

    #[test]
    fn duplicate_versions_fail_the_read_and_end_the_stream() {
        let engine = engine();
        engine
            .append(&id_name_batch(&[(1, "a"), (5, "e")]), Snapshot::new(1, 0))
            .unwrap();
        engine
            .append(&id_name_batch(&[(1, "again")]), Snapshot::new(1, 0))
            .unwrap();

        let mut stream = engine.read(ReadRequest::new(Snapshot::MAX)).unwrap();
        let err = stream.next().unwrap().unwrap_err();
        assert!(err.is_integrity_violation());
        assert!(err.to_string().contains("(1)"), "{err}");
        assert!(stream.next().is_none());
    }
}
