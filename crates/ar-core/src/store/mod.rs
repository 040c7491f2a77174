//! The result store seam.
//!
//! The pipeline never talks to a storage engine directly. Both the ingestion
//! thread and the renormalization worker hold an `Arc<dyn ResultStore>`, so
//! implementations must be internally synchronized. Every operation is
//! fallible I/O; callers log failures and keep going.

pub mod memory;

use ar_common::{
    Bucket, CategoryDefinition, ModelDebugOutput, ModelSizeStats, ModelSnapshot, QuantileKind,
    Quantiles, Result,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use memory::{InMemoryResultStore, StoreCall, StoreOp};

/// A page of buckets, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketQuery {
    /// Include contained anomaly records.
    pub expand: bool,
    pub skip: usize,
    pub take: usize,
    /// Only buckets at or before this time.
    pub end: Option<DateTime<Utc>>,
}

/// Which entity a score update targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreEntity {
    Bucket,
    Record,
}

/// One staged write of a renormalized score.
///
/// Applied only if the target still exists; the store never creates
/// entities from an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreUpdate {
    pub id: String,
    /// Owning bucket, for record updates.
    pub parent_id: Option<String>,
    pub kind: QuantileKind,
    pub entity: ScoreEntity,
    pub score: f64,
}

/// A single failed item of a bulk update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateFailure {
    pub id: String,
    pub message: String,
}

/// Outcome of [`ResultStore::bulk_conditional_update`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkUpdateReport {
    pub applied: usize,
    pub failures: Vec<UpdateFailure>,
}

impl BulkUpdateReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Persistence operations consumed by the pipeline.
pub trait ResultStore: Send + Sync {
    /// Persist a bucket and its records. Same ID twice overwrites.
    fn persist_bucket(&self, bucket: &Bucket) -> Result<()>;

    /// Persist quantiles, keyed by kind.
    fn persist_quantiles(&self, quantiles: &Quantiles) -> Result<()>;

    fn persist_model_snapshot(&self, snapshot: &ModelSnapshot) -> Result<()>;

    fn persist_model_size_stats(&self, stats: &ModelSizeStats) -> Result<()>;

    fn persist_model_debug_output(&self, output: &ModelDebugOutput) -> Result<()>;

    fn persist_category_definition(&self, category: &CategoryDefinition) -> Result<()>;

    /// Remove every interim bucket and record.
    fn delete_interim_results(&self) -> Result<()>;

    /// Make everything written so far visible to readers.
    fn commit_writes(&self) -> Result<()>;

    fn increment_bucket_count(&self, count: u64) -> Result<()>;

    /// Read one page of committed buckets, ordered by timestamp.
    fn read_buckets(&self, query: &BucketQuery) -> Result<Vec<Bucket>>;

    /// Read up to `max_count` committed buckets.
    fn read_all_buckets(&self, expand: bool, max_count: usize) -> Result<Vec<Bucket>> {
        const PAGE: usize = 100;
        let mut out = Vec::new();
        while out.len() < max_count {
            let take = PAGE.min(max_count - out.len());
            let page = self.read_buckets(&BucketQuery {
                expand,
                skip: out.len(),
                take,
                end: None,
            })?;
            let done = page.len() < take;
            out.extend(page);
            if done {
                break;
            }
        }
        Ok(out)
    }

    /// Apply score updates to existing entities.
    fn bulk_conditional_update(&self, updates: &[ScoreUpdate]) -> Result<BulkUpdateReport>;

    /// The job's bucket span in seconds, if known.
    fn bucket_span(&self) -> Result<Option<u64>>;

    /// Make recent updates searchable.
    fn refresh(&self) -> Result<()>;
}
