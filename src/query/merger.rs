use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;

use crate::aggregate::{merge_window, Ring};
use crate::cache::Cache;
use crate::config::{is_known_exchange, is_known_symbol, ALL_EXCHANGE};
use crate::error::{AppError, Result};
use crate::store;
use crate::types::{AggregateKey, LatestEntry};

/// Reconciles the durable store (everything older than the current ring
/// window) against the in-memory ring (the last `RING_MAX` minutes) for
/// every query shape the API exposes.
pub struct QueryMerger {
    pool: SqlitePool,
    cache: Arc<dyn Cache>,
    ring: Arc<Ring>,
}

impl QueryMerger {
    pub fn new(pool: SqlitePool, cache: Arc<dyn Cache>, ring: Arc<Ring>) -> Self {
        Self { pool, cache, ring }
    }

    fn validate(exchange: &str, pair: &str, allow_all: bool) -> Result<()> {
        if !is_known_symbol(pair) {
            return Err(AppError::BadRequest(format!("unknown symbol: {pair}")));
        }
        let exchange_ok = is_known_exchange(exchange) || (allow_all && exchange == ALL_EXCHANGE);
        if !exchange_ok {
            return Err(AppError::BadRequest(format!("unknown exchange: {exchange}")));
        }
        Ok(())
    }

    pub async fn latest(&self, exchange: &str, pair: &str) -> Result<LatestEntry> {
        Self::validate(exchange, pair, true)?;

        let key = AggregateKey::new(exchange, pair);
        if let Some(raw) = self.cache.get(&key.latest_cache_key()) {
            if let Ok(price) = raw.parse::<f64>() {
                if price != 0.0 {
                    return Ok(LatestEntry {
                        source: exchange.to_string(),
                        pair: pair.to_string(),
                        price,
                        event_ts: crate::types::now_ms(),
                    });
                }
            }
        }

        match store::latest(&self.pool, exchange, pair).await? {
            Some(row) if row.price != 0.0 => Ok(LatestEntry {
                source: row.source,
                pair: row.pair,
                price: row.price,
                event_ts: row.stored_time,
            }),
            _ => Err(AppError::NotFound(format!("no latest price for {exchange} {pair}"))),
        }
    }

    pub async fn average(&self, exchange: &str, pair: &str, period: Option<Duration>) -> Result<f64> {
        Self::validate(exchange, pair, true)?;
        if exchange == ALL_EXCHANGE && period.is_some() {
            return Err(AppError::BadRequest("average over a period does not support the All exchange".to_string()));
        }

        let since = period.map(|p| crate::types::now_ms() / 1000 - p.as_secs() as i64);
        let db_avg = store::avg_price(&self.pool, exchange, pair, since).await?;

        let key = AggregateKey::new(exchange, pair);
        let buf_avg = match period {
            Some(p) => merge_window(&self.ring.window(crate::types::now_ms() / 1000, p), &key).map(|a| a.avg()),
            None => merge_window(&self.ring.all(), &key).map(|a| a.avg()),
        };

        match (buf_avg, db_avg) {
            (Some(buf), Some(db)) => Ok((buf + db) / 2.0),
            (Some(buf), None) => Ok(buf),
            (None, Some(db)) => Ok(db),
            (None, None) => Err(AppError::NotFound(format!("no average price for {exchange} {pair}"))),
        }
    }

    pub async fn minimum(&self, exchange: &str, pair: &str, period: Option<Duration>) -> Result<f64> {
        Self::validate(exchange, pair, true)?;

        let since = period.map(|p| crate::types::now_ms() / 1000 - p.as_secs() as i64);
        let db_min = store::min_price(&self.pool, exchange, pair, since).await?;

        let key = AggregateKey::new(exchange, pair);
        let buf_min = match period {
            Some(p) => merge_window(&self.ring.window(crate::types::now_ms() / 1000, p), &key).map(|a| a.min),
            None => merge_window(&self.ring.all(), &key).map(|a| a.min),
        };

        let lowest = match (db_min, buf_min) {
            (Some(db), Some(buf)) if buf < db => Some(buf),
            (Some(db), _) => Some(db),
            (None, Some(buf)) => Some(buf),
            (None, None) => None,
        };

        lowest.ok_or_else(|| AppError::NotFound(format!("no minimum price for {exchange} {pair}")))
    }

    pub async fn maximum(&self, exchange: &str, pair: &str, period: Option<Duration>) -> Result<f64> {
        Self::validate(exchange, pair, true)?;

        let since = period.map(|p| crate::types::now_ms() / 1000 - p.as_secs() as i64);
        let db_max = store::max_price(&self.pool, exchange, pair, since).await?;

        let key = AggregateKey::new(exchange, pair);
        let buf_max = match period {
            Some(p) => merge_window(&self.ring.window(crate::types::now_ms() / 1000, p), &key).map(|a| a.max),
            None => merge_window(&self.ring.all(), &key).map(|a| a.max),
        };

        let highest = match (db_max, buf_max) {
            (Some(db), Some(buf)) if buf > db => Some(buf),
            (Some(db), _) => Some(db),
            (None, Some(buf)) => Some(buf),
            (None, None) => None,
        };

        highest.ok_or_else(|| AppError::NotFound(format!("no maximum price for {exchange} {pair}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_unknown_symbol() {
        assert!(QueryMerger::validate("Exchange1", "SHIBUSDT", true).is_err());
    }

    #[test]
    fn validate_rejects_all_when_disallowed() {
        assert!(QueryMerger::validate(ALL_EXCHANGE, "BTCUSDT", false).is_err());
        assert!(QueryMerger::validate(ALL_EXCHANGE, "BTCUSDT", true).is_ok());
    }

    #[test]
    fn validate_rejects_unknown_exchange() {
        assert!(QueryMerger::validate("ExchangeX", "BTCUSDT", true).is_err());
    }
}
