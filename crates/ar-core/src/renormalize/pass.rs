//! A single renormalization pass over persisted buckets.

use std::sync::{Arc, OnceLock};

use ar_common::{Bucket, QuantileKind, Result};
use ar_config::PipelineConfig;
use ar_math::is_big_change;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::PendingRenormalization;
use crate::logging::event_names;
use crate::normalizer::ScoreNormalizer;
use crate::store::{BucketQuery, ResultStore, ScoreEntity, ScoreUpdate};

/// Outcome of one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    pub kind: QuantileKind,
    pub buckets_read: usize,
    /// Updates staged for the store.
    pub updates: usize,
    /// Entities whose score did not move by more than the threshold.
    pub noops: usize,
    /// Staged updates the store reported as failed.
    pub failures: usize,
}

impl PassSummary {
    fn new(kind: QuantileKind) -> Self {
        Self {
            kind,
            buckets_read: 0,
            updates: 0,
            noops: 0,
            failures: 0,
        }
    }
}

pub(crate) struct PassRunner {
    store: Arc<dyn ResultStore>,
    normalizer: Arc<dyn ScoreNormalizer>,
    bucket_span: OnceLock<u64>,
    page_size: usize,
    max_buckets: usize,
    threshold: f64,
}

impl PassRunner {
    pub(crate) fn new(
        store: Arc<dyn ResultStore>,
        normalizer: Arc<dyn ScoreNormalizer>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            store,
            normalizer,
            bucket_span: OnceLock::new(),
            page_size: config.page_size.max(1),
            max_buckets: config.max_buckets,
            threshold: config.materiality_threshold,
        }
    }

    /// Bucket span of the job, fetched from the store until it is known.
    fn bucket_span(&self) -> Option<u64> {
        if let Some(span) = self.bucket_span.get() {
            return Some(*span);
        }
        match self.store.bucket_span() {
            Ok(Some(span)) => Some(*self.bucket_span.get_or_init(|| span)),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "could not read bucket span");
                None
            }
        }
    }

    /// Rescore persisted buckets with `pending.state` and write back the
    /// material changes, one bulk update per page.
    pub(crate) fn run(&self, pending: &PendingRenormalization) -> Result<PassSummary> {
        let kind = pending.kind;
        let bucket_span = self.bucket_span();
        let mut summary = PassSummary::new(kind);

        let mut skip = 0;
        while skip < self.max_buckets {
            let take = self.page_size.min(self.max_buckets - skip);
            let mut page = self.store.read_buckets(&BucketQuery {
                expand: true,
                skip,
                take,
                end: pending.end_time,
            })?;
            let read = page.len();
            if read == 0 {
                break;
            }

            let before = page.clone();
            self.normalizer
                .normalize(kind, &pending.state, bucket_span, &mut page)?;
            let updates = self.stage_updates(kind, &before, &page, &mut summary);

            if !updates.is_empty() {
                let report = self.store.bulk_conditional_update(&updates)?;
                summary.failures += report.failures.len();
                for failure in &report.failures {
                    warn!(
                        id = %failure.id,
                        error = %failure.message,
                        "renormalized score was not written"
                    );
                }
            }
            debug!(skip, read, staged = updates.len(), "renormalized bucket page");

            summary.buckets_read += read;
            skip += read;
            if read < take {
                break;
            }
        }

        if summary.buckets_read == 0 {
            warn!(kind = %kind, "no buckets to renormalize");
        }
        info!(
            target: event_names::RENORM_PASS_FINISHED,
            kind = %kind,
            buckets = summary.buckets_read,
            updates = summary.updates,
            noops = summary.noops,
            failures = summary.failures,
            "{} normalization resulted in: {} updates, {} no-ops",
            kind,
            summary.updates,
            summary.noops
        );
        Ok(summary)
    }

    fn stage_updates(
        &self,
        kind: QuantileKind,
        before: &[Bucket],
        after: &[Bucket],
        summary: &mut PassSummary,
    ) -> Vec<ScoreUpdate> {
        let mut updates = Vec::new();
        for (old, new) in before.iter().zip(after) {
            let bucket_id = new.id();
            if is_big_change(old.score(kind), new.score(kind), self.threshold) {
                updates.push(ScoreUpdate {
                    id: bucket_id.clone(),
                    parent_id: None,
                    kind,
                    entity: ScoreEntity::Bucket,
                    score: new.score(kind),
                });
                summary.updates += 1;
            } else {
                summary.noops += 1;
            }

            for (old_record, record) in old.records.iter().zip(&new.records) {
                if !is_big_change(old_record.score(kind), record.score(kind), self.threshold) {
                    summary.noops += 1;
                    continue;
                }
                let Some(id) = &record.id else {
                    warn!(bucket_id = %bucket_id, "anomaly record has no id, not updating");
                    summary.noops += 1;
                    continue;
                };
                updates.push(ScoreUpdate {
                    id: id.clone(),
                    parent_id: Some(bucket_id.clone()),
                    kind,
                    entity: ScoreEntity::Record,
                    score: record.score(kind),
                });
                summary.updates += 1;
            }
        }
        updates
    }
}
