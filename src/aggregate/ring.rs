use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::{QUERY_GRACE, RING_MAX};
use crate::types::{AggregateKey, MinuteAggregate, Snapshot};

/// Bounded in-memory history of minute snapshots. One mutex suffices — reads
/// and the single writer (the aggregator's minute tick) are both cheap and
/// infrequent relative to tick ingestion, which never touches the ring.
pub struct Ring {
    inner: Mutex<VecDeque<Snapshot>>,
}

impl Ring {
    pub fn new() -> Self {
        Self { inner: Mutex::new(VecDeque::with_capacity(RING_MAX)) }
    }

    pub fn push(&self, snapshot: Snapshot) {
        let mut buf = self.inner.lock();
        if buf.len() == RING_MAX {
            buf.pop_front();
        }
        buf.push_back(snapshot);
    }

    /// Snapshots whose timestamp falls within `duration` of now, plus
    /// `QUERY_GRACE` slack to tolerate a query landing just after a minute
    /// boundary before the aggregator has flushed it.
    pub fn window(&self, now: i64, duration: Duration) -> Vec<Snapshot> {
        let cutoff = now - (duration.as_secs() as i64) - (QUERY_GRACE.as_secs() as i64);
        self.inner.lock().iter().filter(|s| s.timestamp >= cutoff).cloned().collect()
    }

    /// Every snapshot currently held.
    pub fn all(&self) -> Vec<Snapshot> {
        self.inner.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

impl Default for Ring {
    fn default() -> Self {
        Self::new()
    }
}

/// Merge every snapshot's entry for `key` across `snapshots` into one
/// aggregate. Returns None if no snapshot carries the key. Unweighted
/// mean-of-means: each minute's average counts once regardless of how many
/// ticks it represents.
pub fn merge_window(snapshots: &[Snapshot], key: &AggregateKey) -> Option<MinuteAggregate> {
    let mut sum_of_means = 0.0;
    let mut minutes = 0u64;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut last_ts = 0i64;

    for snapshot in snapshots {
        if let Some(entry) = snapshot.entries.get(key) {
            sum_of_means += entry.avg();
            minutes += 1;
            min = min.min(entry.min);
            max = max.max(entry.max);
            last_ts = last_ts.max(entry.last_ts);
        }
    }

    if minutes == 0 {
        return None;
    }

    // count = number of minutes folded in, not total ticks, so that
    // avg() = sum_of_means / minutes is the unweighted mean-of-means.
    Some(MinuteAggregate { count: minutes, sum: sum_of_means, min, max, last_ts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn snapshot(ts: i64, key: AggregateKey, count: u64, min: f64, max: f64) -> Snapshot {
        let mut entries = HashMap::new();
        entries.insert(key, MinuteAggregate { count, sum: (min + max) / 2.0 * count as f64, min, max, last_ts: ts });
        Snapshot { timestamp: ts, entries }
    }

    #[test]
    fn ring_evicts_oldest_past_capacity() {
        let ring = Ring::new();
        for i in 0..(RING_MAX as i64 + 5) {
            ring.push(snapshot(i, AggregateKey::new("Exchange1", "BTCUSDT"), 1, 1.0, 1.0));
        }
        assert_eq!(ring.len(), RING_MAX);
    }

    #[test]
    fn window_respects_grace() {
        let ring = Ring::new();
        let key = AggregateKey::new("Exchange1", "BTCUSDT");
        ring.push(snapshot(100, key.clone(), 1, 1.0, 1.0));
        ring.push(snapshot(160, key.clone(), 1, 1.0, 1.0));

        let within = ring.window(165, Duration::from_secs(60));
        assert_eq!(within.len(), 2);

        let only_latest = ring.window(300, Duration::from_secs(60));
        assert_eq!(only_latest.len(), 0);
    }

    #[test]
    fn merge_window_averages_unweighted() {
        let key = AggregateKey::new("Exchange1", "BTCUSDT");
        let snaps = vec![
            snapshot(1, key.clone(), 10, 90.0, 110.0),
            snapshot(2, key.clone(), 1, 200.0, 200.0),
        ];
        let merged = merge_window(&snaps, &key).unwrap();
        assert!((merged.avg() - 150.0).abs() < 1e-9);
        assert!((merged.min - 90.0).abs() < 1e-9);
        assert!((merged.max - 200.0).abs() < 1e-9);
        // count here is minutes folded in, not total ticks.
        assert_eq!(merged.count, 2);
    }

    #[test]
    fn merge_window_missing_key_returns_none() {
        let snaps = vec![snapshot(1, AggregateKey::new("Exchange1", "BTCUSDT"), 1, 1.0, 1.0)];
        let other = AggregateKey::new("Exchange2", "ETHUSDT");
        assert!(merge_window(&snaps, &other).is_none());
    }
}
