//! One-shot alert observers.
//!
//! Observers look at each finalized bucket. An observer that produces alerts
//! is removed from the registry under the lock, then fired after the lock is
//! released, so it fires at most once and a slow callback never blocks
//! registration or the next bucket's evaluation by other threads.

use std::sync::{Mutex, MutexGuard, PoisonError};

use ar_common::{Alert, Bucket};
use tracing::debug;

use crate::logging::event_names;

/// Inspects buckets and reacts to the alerts it raises.
pub trait AlertObserver: Send {
    /// Alerts triggered by `bucket`; empty means not triggered.
    fn evaluate(&self, bucket: &Bucket) -> Vec<Alert>;

    /// Called once, outside the registry lock, with the alerts from `evaluate`.
    fn fire(&self, bucket: &Bucket, alerts: &[Alert]);
}

/// Handle returned by [`ObserverRegistry::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

#[derive(Default)]
struct Registry {
    next_id: u64,
    observers: Vec<(ObserverId, Box<dyn AlertObserver>)>,
}

/// Live set of observers for one job.
#[derive(Default)]
pub struct ObserverRegistry {
    inner: Mutex<Registry>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, observer: Box<dyn AlertObserver>) -> ObserverId {
        let mut inner = self.lock();
        let id = ObserverId(inner.next_id);
        inner.next_id += 1;
        inner.observers.push((id, observer));
        id
    }

    /// Unregister; false if it was never registered or has already fired.
    pub fn remove(&self, id: ObserverId) -> bool {
        let mut inner = self.lock();
        let before = inner.observers.len();
        inner.observers.retain(|(oid, _)| *oid != id);
        inner.observers.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock().observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evaluate every observer against `bucket` and fire the triggered ones.
    ///
    /// Returns how many observers fired.
    pub fn notify(&self, bucket: &Bucket) -> usize {
        let triggered = {
            let mut inner = self.lock();
            let mut kept = Vec::with_capacity(inner.observers.len());
            let mut triggered = Vec::new();
            for (id, observer) in inner.observers.drain(..) {
                let alerts = observer.evaluate(bucket);
                if alerts.is_empty() {
                    kept.push((id, observer));
                } else {
                    triggered.push((id, observer, alerts));
                }
            }
            inner.observers = kept;
            triggered
        };

        let fired = triggered.len();
        for (id, observer, alerts) in triggered {
            debug!(
                target: event_names::ALERT_FIRED,
                observer = id.0,
                bucket_id = %bucket.id(),
                alerts = alerts.len(),
                "alert observer fired"
            );
            observer.fire(bucket, &alerts);
        }
        fired
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

type FireFn = Box<dyn Fn(&Bucket, &[Alert]) + Send>;

/// Fires when a bucket's anomaly score or max normalized probability
/// reaches a threshold.
pub struct ThresholdObserver {
    score_threshold: f64,
    probability_threshold: f64,
    on_fire: FireFn,
}

impl ThresholdObserver {
    pub fn new(
        score_threshold: f64,
        probability_threshold: f64,
        on_fire: impl Fn(&Bucket, &[Alert]) + Send + 'static,
    ) -> Self {
        Self {
            score_threshold,
            probability_threshold,
            on_fire: Box::new(on_fire),
        }
    }
}

impl AlertObserver for ThresholdObserver {
    fn evaluate(&self, bucket: &Bucket) -> Vec<Alert> {
        let mut alerts = Vec::new();
        if bucket.anomaly_score >= self.score_threshold {
            alerts.push(Alert::for_bucket(
                bucket,
                format!(
                    "anomaly score {} >= {}",
                    bucket.anomaly_score, self.score_threshold
                ),
            ));
        }
        if bucket.max_normalized_probability >= self.probability_threshold {
            alerts.push(Alert::for_bucket(
                bucket,
                format!(
                    "max normalized probability {} >= {}",
                    bucket.max_normalized_probability, self.probability_threshold
                ),
            ));
        }
        alerts
    }

    fn fire(&self, bucket: &Bucket, alerts: &[Alert]) {
        (self.on_fire)(bucket, alerts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn bucket(score: f64, prob: f64) -> Bucket {
        Bucket {
            timestamp: Utc.timestamp_opt(3600, 0).unwrap(),
            anomaly_score: score,
            max_normalized_probability: prob,
            raw_anomaly_score: 0.0,
            record_count: 0,
            event_count: 0,
            is_interim: false,
            bucket_span: None,
            records: Vec::new(),
        }
    }

    fn counting(score: f64, prob: f64, count: Arc<AtomicUsize>) -> Box<dyn AlertObserver> {
        Box::new(ThresholdObserver::new(score, prob, move |_, alerts| {
            count.fetch_add(alerts.len(), Ordering::SeqCst);
        }))
    }

    #[test]
    fn test_observer_fires_once_then_is_removed() {
        let registry = ObserverRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        registry.add(counting(50.0, 101.0, count.clone()));
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.notify(&bucket(10.0, 0.0)), 0);
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.notify(&bucket(60.0, 0.0)), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());

        assert_eq!(registry.notify(&bucket(90.0, 0.0)), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_both_thresholds_produce_two_alerts() {
        let observer = ThresholdObserver::new(50.0, 80.0, |_, _| {});
        let alerts = observer.evaluate(&bucket(50.0, 80.0));
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].bucket_id, "3600");
        assert!(alerts[1].reason.contains("max normalized probability"));
    }

    #[test]
    fn test_remove_reports_registration() {
        let registry = ObserverRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let a = registry.add(counting(1.0, 1.0, count.clone()));
        let b = registry.add(counting(99.0, 99.0, count.clone()));
        assert_ne!(a, b);

        assert!(registry.remove(a));
        assert!(!registry.remove(a));
        assert_eq!(registry.len(), 1);

        registry.notify(&bucket(100.0, 0.0));
        assert!(!registry.remove(b));
    }

    #[test]
    fn test_callback_can_reenter_registry() {
        let registry = Arc::new(ObserverRegistry::new());
        let inner = registry.clone();
        registry.add(Box::new(ThresholdObserver::new(0.0, 0.0, move |_, _| {
            // would deadlock if fired under the lock
            assert_eq!(inner.len(), 0);
        })));
        assert_eq!(registry.notify(&bucket(1.0, 1.0)), 1);
    }
}
