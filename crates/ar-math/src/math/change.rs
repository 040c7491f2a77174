//! Materiality of score changes.
//!
//! Renormalization only writes back entities whose score moved by more than
//! a threshold; smaller changes are not observable to result readers.

/// Default materiality threshold in normalized score points.
pub const DEFAULT_MATERIALITY_THRESHOLD: f64 = 1.0;

/// Whether moving from `old` to `new` is a material change.
///
/// The comparison is strict: a delta equal to the threshold is not material.
/// A NaN on either side is never material.
pub fn is_big_change(old: f64, new: f64, threshold: f64) -> bool {
    if old.is_nan() || new.is_nan() || threshold.is_nan() {
        return false;
    }
    (new - old).abs() > threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strictly_greater_than_threshold() {
        assert!(is_big_change(10.0, 12.0, 1.0));
        assert!(is_big_change(12.0, 10.0, 1.0));
        assert!(!is_big_change(10.0, 11.0, 1.0));
        assert!(!is_big_change(10.0, 10.5, 1.0));
    }

    #[test]
    fn test_zero_threshold_writes_any_change() {
        assert!(is_big_change(10.0, 10.001, 0.0));
        assert!(!is_big_change(10.0, 10.0, 0.0));
    }

    #[test]
    fn test_nan_is_never_material() {
        assert!(!is_big_change(f64::NAN, 10.0, 1.0));
        assert!(!is_big_change(10.0, f64::NAN, 1.0));
        assert!(!is_big_change(10.0, 20.0, f64::NAN));
    }
}
