//! Shared health state for the /health endpoint, updated by adapters and
//! read by the API.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Default)]
pub struct HealthState {
    /// True once at least one exchange adapter has connected since the
    /// last mode switch.
    adapters_connected: AtomicBool,
    /// Millisecond timestamp of the last minute snapshot persisted (0 = none).
    last_snapshot_at_ms: AtomicU64,
    /// Number of adapters currently reporting Fatal.
    fatal_adapters: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_adapters_connected(&self, v: bool) {
        self.adapters_connected.store(v, Ordering::Relaxed);
    }

    pub fn set_last_snapshot_at_ms(&self, ms: i64) {
        self.last_snapshot_at_ms.store(ms as u64, Ordering::Relaxed);
    }

    pub fn inc_fatal_adapters(&self) {
        self.fatal_adapters.fetch_add(1, Ordering::Relaxed);
    }

    pub fn adapters_connected(&self) -> bool {
        self.adapters_connected.load(Ordering::Relaxed)
    }

    pub fn last_snapshot_at_ms(&self) -> i64 {
        self.last_snapshot_at_ms.load(Ordering::Relaxed) as i64
    }

    pub fn fatal_adapters(&self) -> u64 {
        self.fatal_adapters.load(Ordering::Relaxed)
    }
}
