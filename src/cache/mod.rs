use std::time::{Duration, Instant};

use dashmap::DashMap;

/// In-process TTL cache standing in for an external KV cache. Substitutable
/// behind this trait without the rest of the pipeline noticing — the
/// Persister and Query Merger only ever see `Cache`.
pub trait Cache: Send + Sync {
    fn set_with_ttl(&self, key: &str, value: String, ttl: Duration);
    fn get(&self, key: &str) -> Option<String>;
    fn check_health(&self) -> bool;
}

struct Entry {
    value: String,
    expires_at: Instant,
}

/// DashMap-backed cache. Expired entries are reaped lazily on read, plus an
/// eager sweep callers can drive from a background tick.
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    /// Drop all expired entries. Cheap, non-blocking; safe to call
    /// periodically from a maintenance task.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.entries.retain(|_, e| e.expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache for MemoryCache {
    fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) {
        self.entries.insert(key.to_string(), Entry { value, expires_at: Instant::now() + ttl });
    }

    fn get(&self, key: &str) -> Option<String> {
        match self.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => None,
            None => None,
        }
    }

    fn check_health(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_roundtrips() {
        let cache = MemoryCache::new();
        cache.set_with_ttl("Exchange1 BTCUSDT", "100.5".to_string(), Duration::from_secs(60));
        assert_eq!(cache.get("Exchange1 BTCUSDT"), Some("100.5".to_string()));
    }

    #[test]
    fn expired_entry_is_not_returned() {
        let cache = MemoryCache::new();
        cache.set_with_ttl("k", "v".to_string(), Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn missing_key_is_none() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get("missing"), None);
    }
}
