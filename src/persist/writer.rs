use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::aggregate::Ring;
use crate::api::HealthState;
use crate::cache::Cache;
use crate::persist::PersistMsg;
use crate::store;

/// Drains the aggregator's output: upserts minute snapshots and latest
/// ticks into the durable store, mirrors both into the cache for fast
/// reads, and feeds completed snapshots into the ring.
pub struct Writer {
    rx: mpsc::Receiver<PersistMsg>,
    pool: SqlitePool,
    cache: Arc<dyn Cache>,
    ring: Arc<Ring>,
    cache_ttl: Duration,
    cancel: CancellationToken,
    health: Arc<HealthState>,
}

impl Writer {
    pub fn new(
        rx: mpsc::Receiver<PersistMsg>,
        pool: SqlitePool,
        cache: Arc<dyn Cache>,
        ring: Arc<Ring>,
        cache_ttl: Duration,
        cancel: CancellationToken,
        health: Arc<HealthState>,
    ) -> Self {
        Self { rx, pool, cache, ring, cache_ttl, cancel, health }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("persister shutting down");
                    return;
                }
                msg = self.rx.recv() => {
                    match msg {
                        Some(msg) => self.handle(msg).await,
                        None => {
                            info!("persister input closed");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn handle(&self, msg: PersistMsg) {
        match msg {
            PersistMsg::Minute(snapshot) => self.handle_minute(snapshot).await,
            PersistMsg::Latest(entry) => self.handle_latest(entry).await,
        }
    }

    async fn handle_minute(&self, snapshot: crate::types::Snapshot) {
        for (key, agg) in &snapshot.entries {
            if let Err(e) = store::upsert_minute_stat(&self.pool, key, agg, snapshot.timestamp).await {
                warn!(source = %key.source, pair = %key.pair, "minute upsert failed: {e}");
                continue;
            }
            self.cache.set_with_ttl(&key.cache_key(), agg.avg().to_string(), self.cache_ttl);
        }
        self.health.set_last_snapshot_at_ms(snapshot.timestamp * 1000);
        self.ring.push(snapshot);
    }

    async fn handle_latest(&self, entry: crate::types::LatestEntry) {
        let key = crate::types::AggregateKey::new(entry.source.clone(), entry.pair.clone());
        self.cache.set_with_ttl(&key.latest_cache_key(), entry.price.to_string(), self.cache_ttl);
        if let Err(e) = store::upsert_latest(&self.pool, &entry).await {
            warn!(source = %entry.source, pair = %entry.pair, "latest upsert failed: {e}");
        }
    }
}
