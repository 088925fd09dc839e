use crate::error::{AppError, Result};

/// Symbols accepted from upstream feeds and at the query API.
pub const SYMBOLS: &[&str] = &["BTCUSDT", "DOGEUSDT", "TONUSDT", "SOLUSDT", "ETHUSDT"];

/// Exchange identities an adapter may be stamped with.
pub const EXCHANGES: &[&str] = &["Exchange1", "Exchange2", "Exchange3"];

/// Synthetic source accepted only at the query API — never stamped on a Tick.
pub const ALL_EXCHANGE: &str = "All";

pub fn is_known_symbol(symbol: &str) -> bool {
    SYMBOLS.contains(&symbol)
}

pub fn is_known_exchange(exchange: &str) -> bool {
    EXCHANGES.contains(&exchange)
}

/// TCP host:port for each live exchange adapter.
pub const LIVE_EXCHANGE_ADDR: &[(&str, &str)] = &[
    ("Exchange1", "127.0.0.1:40101"),
    ("Exchange2", "127.0.0.1:40102"),
    ("Exchange3", "127.0.0.1:40103"),
];

/// Number of parse workers shared by each adapter's raw line channel.
pub const PARSE_WORKERS: usize = 5;

/// Backoff base for adapter reconnect attempts (doubles each attempt, capped).
pub const RECONNECT_BACKOFF_BASE_MS: u64 = 500;
pub const RECONNECT_BACKOFF_CAP_MS: u64 = 5_000;
/// Consecutive reconnect failures before an adapter reports itself Fatal.
pub const RECONNECT_MAX_ATTEMPTS: u32 = 5;

/// Channel capacity for internal message routing.
pub const CHANNEL_CAPACITY: usize = 1024;
/// Capacity of each adapter's raw-line channel feeding its worker pool.
/// Kept at tokio's minimum (1) to approximate an unbuffered line channel:
/// the adapter stalls its TCP read once a worker is behind instead of
/// growing an in-memory queue.
pub const LINE_CHANNEL_CAPACITY: usize = 1;
/// Capacity of the fan-in merger's per-source typed-tick channels.
pub const TICK_CHANNEL_CAPACITY: usize = 16;
/// Capacity of the merged-batch channel between C3 and C4.
pub const BATCH_CHANNEL_CAPACITY: usize = 1;

/// Ring capacity — one minute-snapshot per slot, 60 minutes of history.
pub const RING_MAX: usize = 60;

/// Grace window added to window-query cutoffs to tolerate clock/flush skew
/// between the aggregator's minute tick and a query arriving just after it.
pub const QUERY_GRACE: std::time::Duration = std::time::Duration::from_secs(10);

/// Default cache entry TTL.
pub const CACHE_TTL: std::time::Duration = std::time::Duration::from_secs(300);

/// Upper bound the mode manager allows a mode switch to take before giving up
/// and reporting failure (spec: must not silently hang a switch request).
pub const MODE_SWITCH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct Config {
    pub mode: String,
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    pub parse_workers: usize,
    pub cache_ttl_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            mode: std::env::var("MARKETFLOW_MODE").unwrap_or_else(|_| "test".to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "marketflow.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            parse_workers: std::env::var("PARSE_WORKERS")
                .unwrap_or_else(|_| PARSE_WORKERS.to_string())
                .parse::<usize>()
                .unwrap_or(PARSE_WORKERS),
            cache_ttl_secs: std::env::var("CACHE_TTL_SECS")
                .unwrap_or_else(|_| CACHE_TTL.as_secs().to_string())
                .parse::<u64>()
                .unwrap_or(CACHE_TTL.as_secs()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_symbol() {
        assert!(is_known_symbol("BTCUSDT"));
        assert!(!is_known_symbol("SHIBUSDT"));
    }

    #[test]
    fn all_is_not_a_known_exchange() {
        assert!(is_known_exchange("Exchange1"));
        assert!(!is_known_exchange(ALL_EXCHANGE));
    }
}
