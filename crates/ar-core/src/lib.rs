//! Anomaly Results Pipeline Core Library
//!
//! This library ingests the results stream of an anomaly-detection job:
//! - Stream reading, record decoding and dispatch to the result store
//! - Flush barrier for callers waiting on flush acknowledgements
//! - Coalescing renormalization worker with bounded shutdown
//! - One-shot alert observers on finalized buckets
//! - Structured logging setup
//!
//! [`JobPipeline`] wires all of it together for one job.

pub mod alerts;
pub mod flush;
pub mod logging;
pub mod normalizer;
pub mod pipeline;
pub mod renormalize;
pub mod results;
pub mod store;

pub use alerts::{AlertObserver, ObserverId, ObserverRegistry, ThresholdObserver};
pub use flush::FlushBarrier;
pub use normalizer::{QuantileTableNormalizer, ScoreNormalizer};
pub use pipeline::JobPipeline;
pub use renormalize::{PassSummary, PendingRenormalization, Renormalizer};
pub use results::{DispatchStats, ResultDispatcher};
pub use store::{
    BucketQuery, BulkUpdateReport, InMemoryResultStore, ResultStore, ScoreEntity, ScoreUpdate,
    StoreCall, StoreOp, UpdateFailure,
};
