//! In-memory reference implementation of [`ResultStore`].
//!
//! Writes are staged until [`ResultStore::commit_writes`]; reads only see
//! committed buckets. Every call is journaled in order as a [`StoreCall`] and
//! any operation can be made to fail, which is how the ordering and
//! failure-handling behavior of the pipeline is tested.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use ar_common::{
    Bucket, CategoryDefinition, Error, ModelDebugOutput, ModelSizeStats, ModelSnapshot,
    QuantileKind, Quantiles, Result,
};

use super::{
    BucketQuery, BulkUpdateReport, ResultStore, ScoreEntity, ScoreUpdate, UpdateFailure,
};

/// Store operations, for failure injection and journal filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    PersistBucket,
    PersistQuantiles,
    PersistModelSnapshot,
    PersistModelSizeStats,
    PersistModelDebugOutput,
    PersistCategoryDefinition,
    DeleteInterimResults,
    CommitWrites,
    IncrementBucketCount,
    ReadBuckets,
    BulkConditionalUpdate,
    BucketSpan,
    Refresh,
}

impl StoreOp {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreOp::PersistBucket => "persist_bucket",
            StoreOp::PersistQuantiles => "persist_quantiles",
            StoreOp::PersistModelSnapshot => "persist_model_snapshot",
            StoreOp::PersistModelSizeStats => "persist_model_size_stats",
            StoreOp::PersistModelDebugOutput => "persist_model_debug_output",
            StoreOp::PersistCategoryDefinition => "persist_category_definition",
            StoreOp::DeleteInterimResults => "delete_interim_results",
            StoreOp::CommitWrites => "commit_writes",
            StoreOp::IncrementBucketCount => "increment_bucket_count",
            StoreOp::ReadBuckets => "read_buckets",
            StoreOp::BulkConditionalUpdate => "bulk_conditional_update",
            StoreOp::BucketSpan => "bucket_span",
            StoreOp::Refresh => "refresh",
        }
    }
}

/// One journaled store call.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    PersistBucket { id: String, interim: bool },
    PersistQuantiles { kind: QuantileKind, state: String },
    PersistModelSnapshot { id: String },
    PersistModelSizeStats { model_bytes: u64 },
    PersistModelDebugOutput { feature: String },
    PersistCategoryDefinition { id: u64 },
    DeleteInterimResults,
    CommitWrites,
    IncrementBucketCount(u64),
    ReadBuckets { skip: usize, take: usize },
    BulkConditionalUpdate(Vec<ScoreUpdate>),
    BucketSpan,
    Refresh,
}

impl StoreCall {
    pub fn op(&self) -> StoreOp {
        match self {
            StoreCall::PersistBucket { .. } => StoreOp::PersistBucket,
            StoreCall::PersistQuantiles { .. } => StoreOp::PersistQuantiles,
            StoreCall::PersistModelSnapshot { .. } => StoreOp::PersistModelSnapshot,
            StoreCall::PersistModelSizeStats { .. } => StoreOp::PersistModelSizeStats,
            StoreCall::PersistModelDebugOutput { .. } => StoreOp::PersistModelDebugOutput,
            StoreCall::PersistCategoryDefinition { .. } => StoreOp::PersistCategoryDefinition,
            StoreCall::DeleteInterimResults => StoreOp::DeleteInterimResults,
            StoreCall::CommitWrites => StoreOp::CommitWrites,
            StoreCall::IncrementBucketCount(_) => StoreOp::IncrementBucketCount,
            StoreCall::ReadBuckets { .. } => StoreOp::ReadBuckets,
            StoreCall::BulkConditionalUpdate(_) => StoreOp::BulkConditionalUpdate,
            StoreCall::BucketSpan => StoreOp::BucketSpan,
            StoreCall::Refresh => StoreOp::Refresh,
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    committed: BTreeMap<i64, Bucket>,
    staged: BTreeMap<i64, Bucket>,
    quantiles: BTreeMap<QuantileKind, Quantiles>,
    model_snapshots: BTreeMap<String, ModelSnapshot>,
    model_size_stats: Vec<ModelSizeStats>,
    model_debug_outputs: Vec<ModelDebugOutput>,
    categories: BTreeMap<u64, CategoryDefinition>,
    bucket_count: u64,
    bucket_span: Option<u64>,
    calls: Vec<StoreCall>,
    failing: HashSet<StoreOp>,
}

/// Thread-safe in-memory result store.
#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    state: Mutex<MemoryState>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a fixed bucket span instead of learning it from persisted buckets.
    pub fn with_bucket_span(self, span: u64) -> Self {
        self.lock().bucket_span = Some(span);
        self
    }

    /// Insert committed buckets directly, without journaling.
    pub fn seed_buckets(&self, buckets: impl IntoIterator<Item = Bucket>) {
        let mut state = self.lock();
        for mut bucket in buckets {
            bucket.assign_record_ids();
            state.committed.insert(bucket.timestamp.timestamp(), bucket);
        }
    }

    /// Make every subsequent call of `op` fail.
    pub fn fail_on(&self, op: StoreOp) {
        self.lock().failing.insert(op);
    }

    pub fn clear_failures(&self) {
        self.lock().failing.clear();
    }

    /// Journal of every call so far, in order.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    /// Journaled operations, in order.
    pub fn ops(&self) -> Vec<StoreOp> {
        self.lock().calls.iter().map(StoreCall::op).collect()
    }

    pub fn count(&self, op: StoreOp) -> usize {
        self.lock().calls.iter().filter(|c| c.op() == op).count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// A committed bucket by ID.
    pub fn bucket(&self, id: &str) -> Option<Bucket> {
        let ts = id.parse::<i64>().ok()?;
        self.lock().committed.get(&ts).cloned()
    }

    /// All committed buckets, oldest first.
    pub fn buckets(&self) -> Vec<Bucket> {
        self.lock().committed.values().cloned().collect()
    }

    /// Number of written but uncommitted buckets.
    pub fn staged_len(&self) -> usize {
        self.lock().staged.len()
    }

    pub fn quantiles(&self, kind: QuantileKind) -> Option<Quantiles> {
        self.lock().quantiles.get(&kind).cloned()
    }

    pub fn model_snapshot(&self, id: &str) -> Option<ModelSnapshot> {
        self.lock().model_snapshots.get(id).cloned()
    }

    pub fn model_size_stats(&self) -> Vec<ModelSizeStats> {
        self.lock().model_size_stats.clone()
    }

    pub fn model_debug_outputs(&self) -> Vec<ModelDebugOutput> {
        self.lock().model_debug_outputs.clone()
    }

    pub fn category(&self, id: u64) -> Option<CategoryDefinition> {
        self.lock().categories.get(&id).cloned()
    }

    pub fn bucket_count(&self) -> u64 {
        self.lock().bucket_count
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Journal `call` and return the locked state, or the injected failure.
    fn begin(&self, call: StoreCall) -> Result<MutexGuard<'_, MemoryState>> {
        let op = call.op();
        let mut state = self.lock();
        state.calls.push(call);
        if state.failing.contains(&op) {
            return Err(Error::store(op.as_str(), "injected failure"));
        }
        Ok(state)
    }
}

impl ResultStore for InMemoryResultStore {
    fn persist_bucket(&self, bucket: &Bucket) -> Result<()> {
        let mut state = self.begin(StoreCall::PersistBucket {
            id: bucket.id(),
            interim: bucket.is_interim,
        })?;
        if state.bucket_span.is_none() {
            state.bucket_span = bucket.bucket_span;
        }
        state
            .staged
            .insert(bucket.timestamp.timestamp(), bucket.clone());
        Ok(())
    }

    fn persist_quantiles(&self, quantiles: &Quantiles) -> Result<()> {
        let mut state = self.begin(StoreCall::PersistQuantiles {
            kind: quantiles.quantile_kind,
            state: quantiles.quantile_state.clone(),
        })?;
        state
            .quantiles
            .insert(quantiles.quantile_kind, quantiles.clone());
        Ok(())
    }

    fn persist_model_snapshot(&self, snapshot: &ModelSnapshot) -> Result<()> {
        let mut state = self.begin(StoreCall::PersistModelSnapshot {
            id: snapshot.snapshot_id.clone(),
        })?;
        state
            .model_snapshots
            .insert(snapshot.snapshot_id.clone(), snapshot.clone());
        Ok(())
    }

    fn persist_model_size_stats(&self, stats: &ModelSizeStats) -> Result<()> {
        let mut state = self.begin(StoreCall::PersistModelSizeStats {
            model_bytes: stats.model_bytes,
        })?;
        state.model_size_stats.push(stats.clone());
        Ok(())
    }

    fn persist_model_debug_output(&self, output: &ModelDebugOutput) -> Result<()> {
        let mut state = self.begin(StoreCall::PersistModelDebugOutput {
            feature: output.debug_feature.clone(),
        })?;
        state.model_debug_outputs.push(output.clone());
        Ok(())
    }

    fn persist_category_definition(&self, category: &CategoryDefinition) -> Result<()> {
        let mut state = self.begin(StoreCall::PersistCategoryDefinition {
            id: category.category_id,
        })?;
        state
            .categories
            .insert(category.category_id, category.clone());
        Ok(())
    }

    fn delete_interim_results(&self) -> Result<()> {
        let mut state = self.begin(StoreCall::DeleteInterimResults)?;
        let MemoryState {
            committed, staged, ..
        } = &mut *state;
        for buckets in [committed, staged] {
            buckets.retain(|_, bucket| !bucket.is_interim);
            for bucket in buckets.values_mut() {
                bucket.records.retain(|record| !record.is_interim);
            }
        }
        Ok(())
    }

    fn commit_writes(&self) -> Result<()> {
        let mut state = self.begin(StoreCall::CommitWrites)?;
        let staged = std::mem::take(&mut state.staged);
        state.committed.extend(staged);
        Ok(())
    }

    fn increment_bucket_count(&self, count: u64) -> Result<()> {
        let mut state = self.begin(StoreCall::IncrementBucketCount(count))?;
        state.bucket_count += count;
        Ok(())
    }

    fn read_buckets(&self, query: &BucketQuery) -> Result<Vec<Bucket>> {
        let state = self.begin(StoreCall::ReadBuckets {
            skip: query.skip,
            take: query.take,
        })?;
        let page = state
            .committed
            .values()
            .filter(|bucket| query.end.map_or(true, |end| bucket.timestamp <= end))
            .skip(query.skip)
            .take(query.take)
            .map(|bucket| {
                let mut bucket = bucket.clone();
                if !query.expand {
                    bucket.records.clear();
                }
                bucket
            })
            .collect();
        Ok(page)
    }

    fn bulk_conditional_update(&self, updates: &[ScoreUpdate]) -> Result<BulkUpdateReport> {
        let mut state = self.begin(StoreCall::BulkConditionalUpdate(updates.to_vec()))?;
        let mut report = BulkUpdateReport::default();
        for update in updates {
            let bucket_id = match update.entity {
                ScoreEntity::Bucket => Some(update.id.as_str()),
                ScoreEntity::Record => update.parent_id.as_deref(),
            };
            let bucket = match bucket_id.and_then(|id| id.parse::<i64>().ok()) {
                Some(ts) => state.committed.get_mut(&ts),
                None => None,
            };

            let applied = match (update.entity, bucket) {
                (ScoreEntity::Bucket, Some(bucket)) => {
                    bucket.set_score(update.kind, update.score);
                    true
                }
                (ScoreEntity::Record, Some(bucket)) => {
                    match bucket
                        .records
                        .iter_mut()
                        .find(|r| r.id.as_deref() == Some(update.id.as_str()))
                    {
                        Some(record) => {
                            record.set_score(update.kind, update.score);
                            true
                        }
                        None => false,
                    }
                }
                (_, None) => false,
            };

            if applied {
                report.applied += 1;
            } else {
                report.failures.push(UpdateFailure {
                    id: update.id.clone(),
                    message: Error::NotFound {
                        id: update.id.clone(),
                    }
                    .to_string(),
                });
            }
        }
        Ok(report)
    }

    fn bucket_span(&self) -> Result<Option<u64>> {
        let state = self.begin(StoreCall::BucketSpan)?;
        Ok(state.bucket_span)
    }

    fn refresh(&self) -> Result<()> {
        self.begin(StoreCall::Refresh)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ar_common::AnomalyRecord;
    use chrono::{TimeZone, Utc};

    fn bucket(ts: i64, interim: bool) -> Bucket {
        let mut bucket = Bucket {
            timestamp: Utc.timestamp_opt(ts, 0).unwrap(),
            anomaly_score: 10.0,
            max_normalized_probability: 20.0,
            raw_anomaly_score: 1.0,
            record_count: 1,
            event_count: 5,
            is_interim: interim,
            bucket_span: Some(300),
            records: vec![AnomalyRecord {
                probability: 0.01,
                is_interim: interim,
                ..Default::default()
            }],
        };
        bucket.assign_record_ids();
        bucket
    }

    #[test]
    fn test_writes_are_invisible_until_commit() {
        let store = InMemoryResultStore::new();
        store.persist_bucket(&bucket(600, false)).unwrap();
        assert!(store.bucket("600").is_none());
        assert_eq!(store.staged_len(), 1);

        store.commit_writes().unwrap();
        assert!(store.bucket("600").is_some());
        assert_eq!(store.staged_len(), 0);
    }

    #[test]
    fn test_persisting_the_same_id_overwrites() {
        let store = InMemoryResultStore::new();
        let mut b = bucket(600, false);
        store.persist_bucket(&b).unwrap();
        b.anomaly_score = 55.0;
        store.persist_bucket(&b).unwrap();
        store.commit_writes().unwrap();
        assert_eq!(store.buckets().len(), 1);
        assert_eq!(store.bucket("600").unwrap().anomaly_score, 55.0);
    }

    #[test]
    fn test_delete_interim_removes_staged_and_committed() {
        let store = InMemoryResultStore::new();
        store.seed_buckets([bucket(300, true), bucket(600, false)]);
        store.persist_bucket(&bucket(900, true)).unwrap();

        store.delete_interim_results().unwrap();
        store.commit_writes().unwrap();

        let ids: Vec<String> = store.buckets().iter().map(Bucket::id).collect();
        assert_eq!(ids, vec!["600"]);
    }

    #[test]
    fn test_read_buckets_pages_and_bounds_by_end_time() {
        let store = InMemoryResultStore::new();
        store.seed_buckets((1..=5).map(|i| bucket(i * 300, false)));

        let query = BucketQuery {
            expand: false,
            skip: 1,
            take: 2,
            end: None,
        };
        let page = store.read_buckets(&query).unwrap();
        assert_eq!(page.iter().map(Bucket::id).collect::<Vec<_>>(), vec!["600", "900"]);
        assert!(page[0].records.is_empty());

        let bounded = store
            .read_buckets(&BucketQuery {
                expand: true,
                skip: 0,
                take: 10,
                end: Some(Utc.timestamp_opt(900, 0).unwrap()),
            })
            .unwrap();
        assert_eq!(bounded.len(), 3);
        assert_eq!(bounded[0].records.len(), 1);

        assert_eq!(store.read_all_buckets(false, 4).unwrap().len(), 4);
    }

    #[test]
    fn test_bulk_update_reports_missing_targets() {
        let store = InMemoryResultStore::new();
        store.seed_buckets([bucket(300, false)]);

        let report = store
            .bulk_conditional_update(&[
                ScoreUpdate {
                    id: "300".into(),
                    parent_id: None,
                    kind: QuantileKind::SystemChange,
                    entity: ScoreEntity::Bucket,
                    score: 77.0,
                },
                ScoreUpdate {
                    id: "300_1".into(),
                    parent_id: Some("300".into()),
                    kind: QuantileKind::UnusualBehavior,
                    entity: ScoreEntity::Record,
                    score: 66.0,
                },
                ScoreUpdate {
                    id: "999".into(),
                    parent_id: None,
                    kind: QuantileKind::SystemChange,
                    entity: ScoreEntity::Bucket,
                    score: 1.0,
                },
            ])
            .unwrap();

        assert_eq!(report.applied, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].id, "999");

        let b = store.bucket("300").unwrap();
        assert_eq!(b.anomaly_score, 77.0);
        assert_eq!(b.records[0].normalized_probability, 66.0);
    }

    #[test]
    fn test_injected_failures_are_journaled() {
        let store = InMemoryResultStore::new();
        store.fail_on(StoreOp::CommitWrites);

        let err = store.commit_writes().unwrap_err();
        assert_eq!(err.code(), 20);
        assert_eq!(store.ops(), vec![StoreOp::CommitWrites]);

        store.clear_failures();
        store.commit_writes().unwrap();
        assert_eq!(store.count(StoreOp::CommitWrites), 2);
    }

    #[test]
    fn test_bucket_span_is_learned_from_first_bucket() {
        let store = InMemoryResultStore::new();
        assert_eq!(store.bucket_span().unwrap(), None);
        store.persist_bucket(&bucket(300, false)).unwrap();
        assert_eq!(store.bucket_span().unwrap(), Some(300));

        let fixed = InMemoryResultStore::new().with_bucket_span(60);
        fixed.persist_bucket(&bucket(300, false)).unwrap();
        assert_eq!(fixed.bucket_span().unwrap(), Some(60));
    }
}
