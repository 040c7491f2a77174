//! Stream dispatcher: routes each decoded record to its side effects.
//!
//! One dispatcher runs on the ingestion thread of a job. Records are handled
//! strictly in stream order. A segment starts at the beginning of the stream
//! and again after every flush acknowledgement; interim results are deleted
//! once per segment, right before its first bucket is persisted.

use std::io::{BufReader, Read};
use std::sync::Arc;

use ar_common::{Bucket, JobId, Quantiles, Record, Result};
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn};

use super::decode::decode_record;
use super::reader::ResultsReader;
use crate::alerts::ObserverRegistry;
use crate::flush::FlushBarrier;
use crate::logging::{event_names, Stage};
use crate::renormalize::Renormalizer;
use crate::store::ResultStore;

/// Counters for one call to [`ResultDispatcher::process_stream`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub buckets: u64,
    /// Anomaly records contained in the dispatched buckets.
    pub records: u64,
    pub quantiles: u64,
    pub model_snapshots: u64,
    pub model_size_stats: u64,
    pub model_debug_outputs: u64,
    pub category_definitions: u64,
    pub flushes: u64,
    pub alerts_fired: u64,
    /// Store calls that failed and were skipped.
    pub store_failures: u64,
    /// Quantiles persisted but not queued because the renormalizer had stopped.
    pub renorm_rejected: u64,
    /// Input ended inside the outer array.
    pub unterminated: bool,
}

/// Applies the results stream of one job to the store and its collaborators.
pub struct ResultDispatcher {
    job_id: JobId,
    store: Arc<dyn ResultStore>,
    renormalizer: Arc<Renormalizer>,
    flush: Arc<FlushBarrier>,
    observers: Arc<ObserverRegistry>,
}

impl ResultDispatcher {
    pub fn new(
        job_id: JobId,
        store: Arc<dyn ResultStore>,
        renormalizer: Arc<Renormalizer>,
        flush: Arc<FlushBarrier>,
        observers: Arc<ObserverRegistry>,
    ) -> Self {
        Self {
            job_id,
            store,
            renormalizer,
            flush,
            observers,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Consume a results stream until it ends or turns out to be corrupt.
    ///
    /// Store failures are logged and counted but never abort the stream.
    /// Structural and classification errors are returned; whatever was
    /// persisted before them stays persisted.
    pub fn process_stream<R: Read>(&self, input: R) -> Result<DispatchStats> {
        let span = info_span!("ingest", job_id = %self.job_id, stage = %Stage::Ingest);
        let _guard = span.enter();

        self.flush.mark_started();
        info!(target: event_names::STREAM_STARTED, "processing results stream");

        let result = self.dispatch_all(input);
        self.flush.mark_finished();

        match &result {
            Ok(stats) => info!(
                target: event_names::STREAM_FINISHED,
                buckets = stats.buckets,
                quantiles = stats.quantiles,
                flushes = stats.flushes,
                store_failures = stats.store_failures,
                renorm_rejected = stats.renorm_rejected,
                "results stream finished"
            ),
            Err(e) => error!(
                target: event_names::STREAM_FAILED,
                code = e.code(),
                error = %e,
                "results stream aborted"
            ),
        }
        result
    }

    fn dispatch_all<R: Read>(&self, input: R) -> Result<DispatchStats> {
        let mut reader = ResultsReader::new(BufReader::new(input));
        let mut stats = DispatchStats::default();
        let mut new_segment = true;
        let mut dispatched = 0u64;

        while let Some(object) = reader.next_object()? {
            let record = decode_record(object)?;
            debug!(
                target: event_names::RECORD_DISPATCHED,
                kind = %record.kind(),
                "dispatching record"
            );
            dispatched += 1;

            match record {
                Record::Bucket(bucket) => {
                    if new_segment {
                        new_segment = false;
                        info!(
                            target: event_names::SEGMENT_STARTED,
                            bucket_id = %bucket.id(),
                            "deleting interim results"
                        );
                        let deleted = self.store.delete_interim_results();
                        self.check(&mut stats, "delete_interim_results", deleted);
                    }
                    self.dispatch_bucket(&mut stats, bucket);
                }
                Record::Quantiles(quantiles) => self.dispatch_quantiles(&mut stats, quantiles),
                Record::ModelSnapshot(snapshot) => {
                    stats.model_snapshots += 1;
                    let persisted = self.store.persist_model_snapshot(&snapshot);
                    self.check(&mut stats, "persist_model_snapshot", persisted);
                }
                Record::ModelSizeStats(size) => {
                    stats.model_size_stats += 1;
                    let persisted = self.store.persist_model_size_stats(&size);
                    self.check(&mut stats, "persist_model_size_stats", persisted);
                }
                Record::ModelDebugOutput(output) => {
                    stats.model_debug_outputs += 1;
                    let persisted = self.store.persist_model_debug_output(&output);
                    self.check(&mut stats, "persist_model_debug_output", persisted);
                }
                Record::CategoryDefinition(category) => {
                    stats.category_definitions += 1;
                    let persisted = self.store.persist_category_definition(&category);
                    self.check(&mut stats, "persist_category_definition", persisted);
                }
                Record::Flush(ack) => {
                    stats.flushes += 1;
                    // results before the flush must be visible to the waiter
                    let committed = self.store.commit_writes();
                    self.check(&mut stats, "commit_writes", committed);
                    info!(
                        target: event_names::FLUSH_ACKNOWLEDGED,
                        flush_id = %ack.id,
                        "flush acknowledged"
                    );
                    self.flush.acknowledge(ack.id);
                    new_segment = true;
                }
            }
        }

        if reader.unterminated() {
            stats.unterminated = true;
            warn!(
                target: event_names::STREAM_UNTERMINATED,
                records = dispatched,
                "results stream ended before the closing bracket"
            );
        }

        if dispatched > 0 {
            let committed = self.store.commit_writes();
            self.check(&mut stats, "commit_writes", committed);
        }
        Ok(stats)
    }

    fn dispatch_bucket(&self, stats: &mut DispatchStats, bucket: Bucket) {
        stats.buckets += 1;
        stats.records += bucket.records.len() as u64;

        let persisted = self.store.persist_bucket(&bucket);
        if self.check(stats, "persist_bucket", persisted) {
            let counted = self.store.increment_bucket_count(1);
            self.check(stats, "increment_bucket_count", counted);
        }

        if !bucket.is_interim {
            stats.alerts_fired += self.observers.notify(&bucket) as u64;
        }
    }

    fn dispatch_quantiles(&self, stats: &mut DispatchStats, quantiles: Quantiles) {
        stats.quantiles += 1;
        let persisted = self.store.persist_quantiles(&quantiles);
        self.check(stats, "persist_quantiles", persisted);

        let kind = quantiles.quantile_kind;
        match self
            .renormalizer
            .submit(kind, quantiles.quantile_state, quantiles.timestamp)
        {
            Ok(()) => {}
            Err(e) => {
                stats.renorm_rejected += 1;
                debug!(
                    kind = %kind,
                    code = e.code(),
                    "quantiles persisted without renormalization"
                );
            }
        }
    }

    /// Log and count a failed store call; true if it succeeded.
    fn check(&self, stats: &mut DispatchStats, operation: &str, result: Result<()>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                stats.store_failures += 1;
                error!(
                    target: event_names::STORE_FAILED,
                    operation,
                    code = e.code(),
                    error = %e,
                    "store call failed, skipping"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::ThresholdObserver;
    use crate::logging::capture_jsonl;
    use crate::normalizer::QuantileTableNormalizer;
    use crate::store::{InMemoryResultStore, StoreOp};
    use ar_config::PipelineConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        store: Arc<InMemoryResultStore>,
        renormalizer: Arc<Renormalizer>,
        observers: Arc<ObserverRegistry>,
        dispatcher: ResultDispatcher,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryResultStore::new());
        let renormalizer = Arc::new(
            Renormalizer::start(
                JobId::new("dispatch-test"),
                store.clone(),
                Arc::new(QuantileTableNormalizer),
                &PipelineConfig::default(),
            )
            .unwrap(),
        );
        let observers = Arc::new(ObserverRegistry::new());
        let dispatcher = ResultDispatcher::new(
            JobId::new("dispatch-test"),
            store.clone(),
            renormalizer.clone(),
            Arc::new(FlushBarrier::new()),
            observers.clone(),
        );
        Fixture {
            store,
            renormalizer,
            observers,
            dispatcher,
        }
    }

    #[test]
    fn test_interim_buckets_are_not_offered_to_observers() {
        let f = fixture();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        f.observers
            .add(Box::new(ThresholdObserver::new(50.0, 101.0, move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            })));

        let stats = f
            .dispatcher
            .process_stream(
                r#"[{"timestamp":60,"anomalyScore":90.0,"isInterim":true},
                    {"timestamp":120,"anomalyScore":95.0}]"#
                    .as_bytes(),
            )
            .unwrap();

        assert_eq!(stats.buckets, 2);
        assert_eq!(stats.alerts_fired, 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(f.renormalizer.shutdown());
    }

    #[test]
    fn test_store_failures_are_counted_and_skipped() {
        let f = fixture();
        f.store.fail_on(StoreOp::PersistBucket);

        let stats = f
            .dispatcher
            .process_stream(
                r#"[{"timestamp":60},{"timestamp":120},{"modelBytes":10}]"#.as_bytes(),
            )
            .unwrap();

        assert_eq!(stats.buckets, 2);
        assert_eq!(stats.store_failures, 2);
        assert_eq!(stats.model_size_stats, 1);
        // a failed persist is not counted in the store
        assert_eq!(f.store.count(StoreOp::IncrementBucketCount), 0);
        assert_eq!(f.store.model_size_stats().len(), 1);
        assert_eq!(f.store.count(StoreOp::CommitWrites), 1);
        assert!(f.renormalizer.shutdown());
    }

    #[test]
    fn test_every_record_kind_reaches_its_store_call() {
        let f = fixture();
        let stats = f
            .dispatcher
            .process_stream(
                r#"{"snapshotId":"s1","restorePriority":1}
                   {"modelBytes":300}
                   {"debugFeature":"mean","debugUpper":4.0}
                   {"categoryDefinition":7,"terms":"a b"}
                   {"timestamp":60,"records":[{"probability":0.1},{"probability":0.2}]}"#
                    .as_bytes(),
            )
            .unwrap();

        assert_eq!(
            f.store.ops(),
            vec![
                StoreOp::PersistModelSnapshot,
                StoreOp::PersistModelSizeStats,
                StoreOp::PersistModelDebugOutput,
                StoreOp::PersistCategoryDefinition,
                StoreOp::DeleteInterimResults,
                StoreOp::PersistBucket,
                StoreOp::IncrementBucketCount,
                StoreOp::CommitWrites,
            ]
        );
        assert_eq!(stats.records, 2);
        assert!(f.store.model_snapshot("s1").is_some());
        assert!(f.store.category(7).is_some());
        assert_eq!(f.store.bucket("60").unwrap().records[1].id.as_deref(), Some("60_2"));
        assert!(f.renormalizer.shutdown());
    }

    #[test]
    fn test_corrupt_stream_still_finishes_the_barrier() {
        let f = fixture();
        let err = f
            .dispatcher
            .process_stream(r#"[{"flush":"f1"},{"bogus":1}]"#.as_bytes())
            .unwrap_err();
        assert_eq!(err.code(), 11);
        assert!(!f.dispatcher.flush.in_progress());
        assert_eq!(f.store.count(StoreOp::CommitWrites), 1);
        assert!(f.renormalizer.shutdown());
    }

    fn unknown_fields(lines: &[serde_json::Value]) -> Vec<(String, String)> {
        lines
            .iter()
            .filter(|l| l["event"] == event_names::DECODE_UNKNOWN_FIELD)
            .map(|l| {
                (
                    l["fields"]["record"].as_str().unwrap_or_default().to_string(),
                    l["fields"]["field"].as_str().unwrap_or_default().to_string(),
                )
            })
            .collect()
    }

    #[test]
    fn test_recorded_metric_output_only_warns_on_influencers() {
        let f = fixture();
        let mut stats = DispatchStats::default();
        let lines = capture_jsonl(|| {
            stats = f
                .dispatcher
                .process_stream(include_str!("../../tests/fixtures/metric_output.json").as_bytes())
                .unwrap();
        });

        assert_eq!((stats.buckets, stats.quantiles, stats.flushes), (2, 3, 1));
        let influencers = ("bucket".to_string(), "bucketInfluencers".to_string());
        assert_eq!(unknown_fields(&lines), vec![influencers.clone(), influencers]);
        assert!(lines
            .iter()
            .all(|l| l["event"] != event_names::STREAM_FAILED));
        assert!(f.renormalizer.shutdown());
    }

    #[test]
    fn test_recorded_population_output_has_no_unknown_fields() {
        let f = fixture();
        let mut stats = DispatchStats::default();
        let lines = capture_jsonl(|| {
            stats = f
                .dispatcher
                .process_stream(
                    include_str!("../../tests/fixtures/population_output.json").as_bytes(),
                )
                .unwrap();
        });

        assert_eq!((stats.buckets, stats.records, stats.flushes), (2, 38, 1));
        assert!(unknown_fields(&lines).is_empty());
        assert!(f.renormalizer.shutdown());
    }

    #[test]
    fn test_empty_object_aborts_the_stream() {
        let f = fixture();
        let err = f
            .dispatcher
            .process_stream(r#"[{},{"timestamp":60}]"#.as_bytes())
            .unwrap_err();
        assert_eq!(err.code(), 11);
        assert_eq!(f.store.count(StoreOp::PersistBucket), 0);
        assert_eq!(f.store.count(StoreOp::CommitWrites), 0);
        assert!(f.renormalizer.shutdown());
    }
}
