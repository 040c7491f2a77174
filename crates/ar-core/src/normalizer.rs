//! Score recomputation from a quantile state.

use ar_common::{Bucket, Error, QuantileKind, Result};
use ar_math::{probability_to_raw, QuantileTable};
use serde::Deserialize;

/// Recomputes normalized scores in place.
///
/// Implementations only touch the score fields owned by `kind`.
pub trait ScoreNormalizer: Send + Sync {
    fn normalize(
        &self,
        kind: QuantileKind,
        state: &str,
        bucket_span: Option<u64>,
        buckets: &mut [Bucket],
    ) -> Result<()>;
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TableState {
    points: Vec<(f64, f64)>,
}

/// Builtin normalizer reading `{"points": [[raw, normalized], ...]}`.
///
/// System-change passes map each bucket's raw anomaly score through the
/// table and give every record its bucket's new score. Unusual-behavior
/// passes map each record's probability and set the bucket's max normalized
/// probability to the largest record score.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuantileTableNormalizer;

impl QuantileTableNormalizer {
    pub fn parse_table(state: &str) -> Result<QuantileTable> {
        let parsed: TableState = serde_json::from_str(state)
            .map_err(|e| Error::InvalidQuantiles(e.to_string()))?;
        QuantileTable::new(&parsed.points).ok_or_else(|| {
            Error::InvalidQuantiles(
                "points must be finite, non-negative and non-decreasing".to_string(),
            )
        })
    }
}

impl ScoreNormalizer for QuantileTableNormalizer {
    fn normalize(
        &self,
        kind: QuantileKind,
        state: &str,
        _bucket_span: Option<u64>,
        buckets: &mut [Bucket],
    ) -> Result<()> {
        let table = Self::parse_table(state)?;
        for bucket in buckets.iter_mut() {
            match kind {
                QuantileKind::SystemChange => {
                    let score = table.normalize(bucket.raw_anomaly_score);
                    bucket.anomaly_score = score;
                    for record in &mut bucket.records {
                        record.anomaly_score = score;
                    }
                }
                QuantileKind::UnusualBehavior => {
                    let mut max = None::<f64>;
                    for record in &mut bucket.records {
                        let score = table.normalize(probability_to_raw(record.probability));
                        record.normalized_probability = score;
                        max = Some(max.map_or(score, |m| m.max(score)));
                    }
                    if let Some(max) = max {
                        bucket.max_normalized_probability = max;
                    }
                }
            }
        }
        Ok(())
    }
}
