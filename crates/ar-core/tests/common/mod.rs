//! Shared helpers for ar-core integration tests.

#![allow(dead_code)]

use std::io::{self, Read};
use std::sync::{Arc, Mutex};

use ar_common::{Bucket, JobId, QuantileKind, Result};
use ar_config::PipelineConfig;
use ar_core::{
    FlushBarrier, InMemoryResultStore, ObserverRegistry, QuantileTableNormalizer, Renormalizer,
    ResultDispatcher, ScoreNormalizer, StoreOp,
};
use crossbeam::channel::{self, Receiver, Sender};

/// A `Read` fed chunk by chunk from another thread; EOF once the sender drops.
pub struct ChannelReader {
    rx: Receiver<Vec<u8>>,
    current: Vec<u8>,
    pos: usize,
}

impl ChannelReader {
    pub fn new() -> (Sender<Vec<u8>>, Self) {
        let (tx, rx) = channel::unbounded();
        (
            tx,
            Self {
                rx,
                current: Vec::new(),
                pos: 0,
            },
        )
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.current.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.current = chunk;
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.current.len() - self.pos);
        buf[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

pub fn send(tx: &Sender<Vec<u8>>, text: &str) {
    tx.send(text.as_bytes().to_vec()).unwrap();
}

/// Dispatcher over an in-memory store with a real renormalization worker.
pub struct Harness {
    pub store: Arc<InMemoryResultStore>,
    pub flush: Arc<FlushBarrier>,
    pub observers: Arc<ObserverRegistry>,
    pub renormalizer: Arc<Renormalizer>,
    pub dispatcher: Arc<ResultDispatcher>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(InMemoryResultStore::new())
    }

    pub fn with_store(store: InMemoryResultStore) -> Self {
        Self::with_normalizer(store, Arc::new(QuantileTableNormalizer))
    }

    pub fn with_normalizer(store: InMemoryResultStore, normalizer: Arc<dyn ScoreNormalizer>) -> Self {
        let store = Arc::new(store);
        let flush = Arc::new(FlushBarrier::new());
        let observers = Arc::new(ObserverRegistry::new());
        let renormalizer = Arc::new(
            Renormalizer::start(
                JobId::new("it-job"),
                store.clone(),
                normalizer,
                &PipelineConfig::default(),
            )
            .unwrap(),
        );
        let dispatcher = Arc::new(ResultDispatcher::new(
            JobId::new("it-job"),
            store.clone(),
            renormalizer.clone(),
            flush.clone(),
            observers.clone(),
        ));
        Self {
            store,
            flush,
            observers,
            renormalizer,
            dispatcher,
        }
    }
}

/// Quantile state for a table with the given `(raw, normalized)` knots.
pub fn table(points: &[(f64, f64)]) -> String {
    let pairs: Vec<String> = points
        .iter()
        .map(|(raw, normalized)| format!("[{raw}, {normalized}]"))
        .collect();
    format!("{{\"points\": [{}]}}", pairs.join(", "))
}

/// Store calls made by the renormalization worker rather than the dispatcher.
pub const WORKER_OPS: [StoreOp; 4] = [
    StoreOp::ReadBuckets,
    StoreOp::BulkConditionalUpdate,
    StoreOp::BucketSpan,
    StoreOp::Refresh,
];

/// The dispatcher's share of the store journal, in order.
pub fn dispatcher_ops(store: &InMemoryResultStore) -> Vec<StoreOp> {
    store
        .ops()
        .into_iter()
        .filter(|op| !WORKER_OPS.contains(op))
        .collect()
}

/// Normalizer that only records the states it is given.
#[derive(Default)]
pub struct Recorder {
    pub seen: Mutex<Vec<(QuantileKind, String)>>,
}

impl Recorder {
    pub fn seen(&self) -> Vec<(QuantileKind, String)> {
        self.seen.lock().unwrap().clone()
    }
}

impl ScoreNormalizer for Recorder {
    fn normalize(
        &self,
        kind: QuantileKind,
        state: &str,
        _bucket_span: Option<u64>,
        _buckets: &mut [Bucket],
    ) -> Result<()> {
        self.seen.lock().unwrap().push((kind, state.to_string()));
        Ok(())
    }
}

/// A committed, non-interim bucket with the given raw score.
pub fn bucket(secs: i64, raw: f64) -> Bucket {
    use chrono::{TimeZone, Utc};
    Bucket {
        timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
        anomaly_score: 0.0,
        max_normalized_probability: 0.0,
        raw_anomaly_score: raw,
        record_count: 0,
        event_count: 0,
        is_interim: false,
        bucket_span: Some(300),
        records: Vec::new(),
    }
}
