//! Score scale helpers.
//!
//! Normalized scores live on a 0..=100 scale. Raw scores derived from
//! probabilities use `-log10(p)`, so rarer events map to larger raw values.

/// Upper bound of the normalized score scale.
pub const MAX_SCORE: f64 = 100.0;

/// Smallest probability distinguished from zero when converting to a raw score.
pub const MIN_PROBABILITY: f64 = 1e-300;

/// Clamp a score onto the normalized scale. NaN maps to 0.
pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        return 0.0;
    }
    score.clamp(0.0, MAX_SCORE)
}

/// Convert a probability into a raw anomaly score (`-log10(p)`).
///
/// Probabilities are clamped into `[MIN_PROBABILITY, 1]`; NaN maps to 0.
pub fn probability_to_raw(probability: f64) -> f64 {
    if probability.is_nan() {
        return 0.0;
    }
    let p = probability.clamp(MIN_PROBABILITY, 1.0);
    let raw = -p.log10();
    // -log10(1.0) is -0.0
    if raw == 0.0 {
        0.0
    } else {
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_score_bounds() {
        assert_eq!(clamp_score(-5.0), 0.0);
        assert_eq!(clamp_score(150.0), MAX_SCORE);
        assert_eq!(clamp_score(42.5), 42.5);
        assert_eq!(clamp_score(f64::NAN), 0.0);
    }

    #[test]
    fn test_probability_to_raw_is_neg_log10() {
        assert_eq!(probability_to_raw(1.0), 0.0);
        assert!((probability_to_raw(0.01) - 2.0).abs() < 1e-12);
        assert!((probability_to_raw(0.0) - 300.0).abs() < 1e-9);
        assert_eq!(probability_to_raw(f64::NAN), 0.0);
        assert_eq!(probability_to_raw(3.0), 0.0);
    }
}
