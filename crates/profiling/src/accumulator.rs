//! Running totals for buffered profiles
//!
//! Buffered profiles fold each measurement into a total keyed by the
//! descriptor name. Totals are shared between every context that uses the
//! same key, so updates go through one lock.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

/// Global accumulator instance
static GLOBAL_ACCUMULATOR: OnceLock<Arc<Accumulator>> = OnceLock::new();

/// Get the process-wide accumulator.
///
/// Factories use this unless they were given their own.
pub fn global_accumulator() -> &'static Arc<Accumulator> {
    GLOBAL_ACCUMULATOR.get_or_init(|| Arc::new(Accumulator::new()))
}

#[derive(Debug, Clone, Copy)]
struct RunningTotal {
    count: u64,
    total: Duration,
    min: Duration,
    max: Duration,
}

impl RunningTotal {
    fn first(sample: Duration) -> Self {
        Self {
            count: 1,
            total: sample,
            min: sample,
            max: sample,
        }
    }

    fn fold(&mut self, sample: Duration) {
        self.count += 1;
        self.total = self.total.saturating_add(sample);
        self.min = self.min.min(sample);
        self.max = self.max.max(sample);
    }

    fn snapshot(&self, key: &str) -> AccumulationSnapshot {
        AccumulationSnapshot {
            key: key.to_string(),
            count: self.count,
            total: self.total,
            min: self.min,
            max: self.max,
        }
    }
}

/// Point-in-time view of one accumulated total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccumulationSnapshot {
    pub key: String,
    /// Number of measurements folded in
    pub count: u64,
    #[serde(with = "crate::sink::duration_serde")]
    pub total: Duration,
    #[serde(with = "crate::sink::duration_serde")]
    pub min: Duration,
    #[serde(with = "crate::sink::duration_serde")]
    pub max: Duration,
}

impl AccumulationSnapshot {
    /// Mean measurement, zero when nothing was recorded.
    pub fn mean(&self) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos((self.total.as_nanos() / self.count as u128) as u64)
    }
}

/// Totals keyed by accumulation key.
#[derive(Debug, Default)]
pub struct Accumulator {
    totals: Mutex<HashMap<String, RunningTotal>>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RunningTotal>> {
        // A panic while holding the lock cannot leave a half-written total
        self.totals.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fold one measurement into the total for `key` and return the result.
    pub fn record(&self, key: &str, sample: Duration) -> AccumulationSnapshot {
        let mut totals = self.lock();
        let total = totals
            .entry(key.to_string())
            .and_modify(|t| t.fold(sample))
            .or_insert_with(|| RunningTotal::first(sample));

        tracing::trace!(
            target: "profiling::accumulate",
            key,
            sample_us = sample.as_micros() as u64,
            count = total.count,
            "measurement folded"
        );

        total.snapshot(key)
    }

    pub fn snapshot(&self, key: &str) -> Option<AccumulationSnapshot> {
        self.lock().get(key).map(|t| t.snapshot(key))
    }

    /// Snapshots of every key, sorted by key.
    pub fn snapshots(&self) -> Vec<AccumulationSnapshot> {
        let mut all: Vec<_> = self.lock().iter().map(|(k, t)| t.snapshot(k)).collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    pub fn remove(&self, key: &str) -> Option<AccumulationSnapshot> {
        self.lock().remove(key).map(|t| t.snapshot(key))
    }

    pub fn reset(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;

    #[test]
    fn test_record_and_snapshot() {
        let acc = Accumulator::new();
        acc.record("load", Duration::from_millis(10));
        acc.record("load", Duration::from_millis(30));
        let snap = acc.record("load", Duration::from_millis(20));

        assert_eq!(snap.count, 3);
        assert_eq!(snap.total, Duration::from_millis(60));
        assert_eq!(snap.min, Duration::from_millis(10));
        assert_eq!(snap.max, Duration::from_millis(30));
        assert_eq!(snap.mean(), Duration::from_millis(20));
        assert_eq!(acc.snapshot("load"), Some(snap));
        assert_eq!(acc.snapshot("save"), None);
    }

    #[test]
    fn test_snapshots_sorted_and_reset() {
        let acc = Accumulator::new();
        acc.record("b", Duration::from_millis(1));
        acc.record("a", Duration::from_millis(1));

        let keys: Vec<_> = acc.snapshots().into_iter().map(|s| s.key).collect();
        assert_eq!(keys, vec!["a", "b"]);

        assert!(acc.remove("a").is_some());
        assert_eq!(acc.len(), 1);
        acc.reset();
        assert!(acc.is_empty());
    }

    #[test]
    fn test_concurrent_records_are_not_lost() {
        let acc = Arc::new(Accumulator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let acc = Arc::clone(&acc);
                thread::spawn(move || {
                    for _ in 0..500 {
                        acc.record("shared", Duration::from_micros(3));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snap = acc.snapshot("shared").unwrap();
        assert_eq!(snap.count, 4000);
        assert_eq!(snap.total, Duration::from_micros(12_000));
    }

    #[test]
    fn test_snapshot_serialization() {
        let acc = Accumulator::new();
        let snap = acc.record("k", Duration::from_nanos(1500));
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"total\":1500"));
        let parsed: AccumulationSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, snap);
    }

    proptest! {
        #[test]
        fn prop_total_is_sum_of_samples(samples in proptest::collection::vec(0u64..1_000_000, 1..50)) {
            let acc = Accumulator::new();
            for s in &samples {
                acc.record("p", Duration::from_nanos(*s));
            }
            let snap = acc.snapshot("p").unwrap();
            prop_assert_eq!(snap.count, samples.len() as u64);
            prop_assert_eq!(snap.total, Duration::from_nanos(samples.iter().sum()));
            prop_assert_eq!(snap.max, Duration::from_nanos(*samples.iter().max().unwrap()));
        }
    }
}
