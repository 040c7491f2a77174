//! Piecewise-linear quantile tables.
//!
//! A table maps raw scores onto the normalized 0..=100 scale through a set of
//! `(raw, normalized)` knots. The knots are sorted by raw score and the
//! normalized values must be non-decreasing, so the mapping is monotone:
//! - below the first knot, interpolate linearly from `(0, 0)`
//! - between knots, interpolate linearly
//! - above the last knot, hold the last normalized value

use serde::{Deserialize, Serialize};

use super::score::clamp_score;

/// One knot of a quantile table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantilePoint {
    pub raw: f64,
    pub normalized: f64,
}

/// Validated, sorted quantile table.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantileTable {
    points: Vec<QuantilePoint>,
}

impl QuantileTable {
    /// Build a table from `(raw, normalized)` pairs.
    ///
    /// Returns None if the input is empty, contains non-finite or negative
    /// values, or if normalized values decrease as raw values increase.
    pub fn new(pairs: &[(f64, f64)]) -> Option<Self> {
        if pairs.is_empty() {
            return None;
        }
        let mut points = Vec::with_capacity(pairs.len());
        for &(raw, normalized) in pairs {
            if !raw.is_finite() || !normalized.is_finite() || raw < 0.0 || normalized < 0.0 {
                return None;
            }
            points.push(QuantilePoint {
                raw,
                normalized: clamp_score(normalized),
            });
        }
        points.sort_by(|a, b| a.raw.total_cmp(&b.raw));
        for pair in points.windows(2) {
            if pair[1].normalized < pair[0].normalized {
                return None;
            }
        }
        Some(Self { points })
    }

    pub fn points(&self) -> &[QuantilePoint] {
        &self.points
    }

    /// Map a raw score onto the normalized scale.
    pub fn normalize(&self, raw: f64) -> f64 {
        if raw.is_nan() || raw <= 0.0 {
            return 0.0;
        }
        let first = self.points[0];
        if raw <= first.raw {
            if first.raw <= 0.0 {
                return first.normalized;
            }
            return clamp_score(first.normalized * raw / first.raw);
        }
        let last = self.points[self.points.len() - 1];
        if raw >= last.raw {
            return last.normalized;
        }
        // raw is strictly inside (first.raw, last.raw)
        let idx = self.points.partition_point(|p| p.raw < raw);
        let hi = self.points[idx];
        let lo = self.points[idx - 1];
        let span = hi.raw - lo.raw;
        if span <= 0.0 {
            return hi.normalized;
        }
        let t = (raw - lo.raw) / span;
        clamp_score(lo.normalized + t * (hi.normalized - lo.normalized))
    }
}
