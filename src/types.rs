use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Tick
// ---------------------------------------------------------------------------

/// A single normalized price observation, stamped with its owning adapter's
/// identity. Immutable once produced; lives from C1 until consumed by C4.
///
/// `epoch` identifies which generation of adapters produced this tick — it
/// is bumped by the Mode Manager on every mode switch so the aggregator can
/// recognize and discard ticks from a generation that was already torn down
/// (see `pipeline::mode` and `aggregate::aggregator`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub source: String,
    pub pair: String,
    pub price: f64,
    pub event_ts: i64,
    pub epoch: u64,
}

/// Raw wire shape for one upstream JSON line. `source` is deliberately absent
/// here — the canonical source is the adapter identity, not anything the
/// payload claims.
#[derive(Debug, Deserialize)]
pub struct RawTick {
    pub symbol: String,
    pub price: f64,
    pub timestamp: i64,
}

/// Ordered ticks collected during one 1s tumbling window at C3.
pub type Batch = Vec<Tick>;

// ---------------------------------------------------------------------------
// AggregateKey / MinuteAggregate / Snapshot
// ---------------------------------------------------------------------------

pub const ALL_SOURCE: &str = "All";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AggregateKey {
    pub source: String,
    pub pair: String,
}

impl AggregateKey {
    pub fn new(source: impl Into<String>, pair: impl Into<String>) -> Self {
        Self { source: source.into(), pair: pair.into() }
    }

    pub fn all(pair: impl Into<String>) -> Self {
        Self { source: ALL_SOURCE.to_string(), pair: pair.into() }
    }

    pub fn cache_key(&self) -> String {
        format!("{} {}", self.source, self.pair)
    }

    pub fn latest_cache_key(&self) -> String {
        format!("latest {} {}", self.source, self.pair)
    }
}

/// Running per-minute statistics for one AggregateKey.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinuteAggregate {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub last_ts: i64,
}

impl Default for MinuteAggregate {
    fn default() -> Self {
        Self { count: 0, sum: 0.0, min: f64::INFINITY, max: f64::NEG_INFINITY, last_ts: 0 }
    }
}

impl MinuteAggregate {
    pub fn observe(&mut self, price: f64, event_ts: i64) {
        self.count += 1;
        self.sum += price;
        self.min = self.min.min(price);
        self.max = self.max.max(price);
        self.last_ts = self.last_ts.max(event_ts);
    }

    /// Entries are only ever created together with their first `observe`
    /// call, so count is never zero here.
    pub fn avg(&self) -> f64 {
        self.sum / self.count as f64
    }
}

/// Per-minute map of AggregateKey → MinuteAggregate, emitted once per minute
/// tick by the aggregator. A minute with no ticks for a key emits nothing for
/// that key — entries are never synthesized empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: i64,
    pub entries: HashMap<AggregateKey, MinuteAggregate>,
}

// ---------------------------------------------------------------------------
// LatestEntry
// ---------------------------------------------------------------------------

/// Most-recent-by-event-ts tick for one (source, pair), mirrored into the
/// cache (and, on persistent cache failure, the durable store) under the
/// `"latest <source> <pair>"` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestEntry {
    pub source: String,
    pub pair: String,
    pub price: f64,
    pub event_ts: i64,
}

// ---------------------------------------------------------------------------
// Adapter lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum AdapterControl {
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Disconnected,
    Connecting,
    Streaming,
    Closed,
}

/// Health/diagnostic events an adapter surfaces without tearing down the
/// rest of the pipeline.
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    Connected { name: String },
    Disconnected { name: String },
    /// 5 consecutive reconnect failures — adapter gives up but stays
    /// reachable for health reporting.
    Fatal { name: String },
}

pub fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minute_aggregate_tracks_min_max_avg() {
        let mut agg = MinuteAggregate::default();
        agg.observe(100.0, 1);
        agg.observe(200.0, 2);
        agg.observe(150.0, 3);

        assert_eq!(agg.count, 3);
        assert!((agg.min - 100.0).abs() < 1e-9);
        assert!((agg.max - 200.0).abs() < 1e-9);
        assert!((agg.avg() - 150.0).abs() < 1e-9);
        assert_eq!(agg.last_ts, 3);
    }

    #[test]
    fn cache_keys_match_expected_format() {
        let key = AggregateKey::new("Exchange1", "BTCUSDT");
        assert_eq!(key.cache_key(), "Exchange1 BTCUSDT");
        assert_eq!(key.latest_cache_key(), "latest Exchange1 BTCUSDT");
    }
}
