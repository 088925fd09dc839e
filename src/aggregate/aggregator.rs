use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::persist::PersistMsg;
use crate::types::{AggregateKey, Batch, LatestEntry, MinuteAggregate, Snapshot};

/// Sent by the Mode Manager on every mode switch: "discard whatever the
/// current minute has accumulated and adopt this epoch" — acked once done.
pub type EpochBarrier = (u64, oneshot::Sender<()>);

/// Consumes 1s batches from the fan-in merger, maintains the current
/// minute's running aggregates, and emits one Snapshot per minute boundary.
/// Also tracks the single most-recent tick per key and forwards it to the
/// persister immediately — latest price does not wait for the minute tick.
pub struct Aggregator {
    batches: mpsc::Receiver<Batch>,
    persist_tx: mpsc::Sender<PersistMsg>,
    epoch_rx: mpsc::Receiver<EpochBarrier>,
    epoch_rx_closed: bool,
    cancel: CancellationToken,
    epoch: u64,
    working: HashMap<AggregateKey, MinuteAggregate>,
}

impl Aggregator {
    pub fn new(
        batches: mpsc::Receiver<Batch>,
        persist_tx: mpsc::Sender<PersistMsg>,
        epoch_rx: mpsc::Receiver<EpochBarrier>,
        cancel: CancellationToken,
    ) -> Self {
        Self { batches, persist_tx, epoch_rx, epoch_rx_closed: false, cancel, epoch: 0, working: HashMap::new() }
    }

    pub async fn run(mut self) {
        let mut minute_tick = interval(Duration::from_secs(60));
        minute_tick.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("aggregator shutting down");
                    return;
                }
                _ = minute_tick.tick() => {
                    self.flush_minute().await;
                }
                // Guarded so a closed/unwired epoch channel (e.g. in a test
                // harness with no Mode Manager) doesn't spin this branch hot
                // once `recv` starts resolving `None` immediately every poll.
                barrier = self.epoch_rx.recv(), if !self.epoch_rx_closed => {
                    match barrier {
                        Some((epoch, ack)) => {
                            self.discard_for_new_epoch(epoch);
                            let _ = ack.send(());
                        }
                        None => self.epoch_rx_closed = true,
                    }
                }
                batch = self.batches.recv() => {
                    match batch {
                        Some(batch) => self.ingest(batch).await,
                        None => {
                            info!("aggregator input closed, flushing final minute");
                            self.flush_minute().await;
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Drops the in-flight minute unconditionally — mode-switch safety
    /// requires that no snapshot emitted after a switch ever contains a tick
    /// observed before it, so the partial minute is discarded rather than
    /// flushed. Idempotent and a no-op if `epoch` is already current.
    fn discard_for_new_epoch(&mut self, epoch: u64) {
        if epoch <= self.epoch {
            return;
        }
        if !self.working.is_empty() {
            warn!(from = self.epoch, to = epoch, keys = self.working.len(), "discarding in-flight minute on mode switch");
        }
        self.working.clear();
        self.epoch = epoch;
    }

    async fn ingest(&mut self, batch: Batch) {
        for tick in batch {
            // A tick from a generation that was already torn down (still in
            // flight through a channel when the switch happened) must never
            // reach a snapshot for the new generation.
            if tick.epoch < self.epoch {
                debug!(tick_epoch = tick.epoch, current_epoch = self.epoch, "dropping stale tick from a retired mode generation");
                continue;
            }
            // The reverse race: a tick from the new generation arrived before
            // its epoch barrier did. Adopt the epoch here too so the stale
            // partial minute is discarded before this tick is folded in.
            self.discard_for_new_epoch(tick.epoch);

            let direct = AggregateKey::new(tick.source.clone(), tick.pair.clone());
            self.working.entry(direct).or_default().observe(tick.price, tick.event_ts);

            let all = AggregateKey::all(tick.pair.clone());
            self.working.entry(all).or_default().observe(tick.price, tick.event_ts);

            let latest = LatestEntry {
                source: tick.source.clone(),
                pair: tick.pair.clone(),
                price: tick.price,
                event_ts: tick.event_ts,
            };
            let latest_all = LatestEntry {
                source: crate::types::ALL_SOURCE.to_string(),
                pair: tick.pair,
                price: tick.price,
                event_ts: tick.event_ts,
            };
            if self.persist_tx.send(PersistMsg::Latest(latest)).await.is_err() {
                debug!("persister channel closed while forwarding latest tick");
            }
            if self.persist_tx.send(PersistMsg::Latest(latest_all)).await.is_err() {
                debug!("persister channel closed while forwarding latest-all tick");
            }
        }
    }

    async fn flush_minute(&mut self) {
        if self.working.is_empty() {
            return;
        }
        let timestamp = crate::types::now_ms() / 1000;
        let entries = std::mem::take(&mut self.working);
        let count = entries.len();
        let snapshot = Snapshot { timestamp, entries };
        if self.persist_tx.send(PersistMsg::Minute(snapshot)).await.is_err() {
            debug!("persister channel closed while flushing minute snapshot");
        }
        debug!(keys = count, "flushed minute snapshot");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Tick;

    fn tick(source: &str, pair: &str, price: f64, ts: i64) -> Tick {
        Tick { source: source.to_string(), pair: pair.to_string(), price, event_ts: ts, epoch: 0 }
    }

    fn aggregator(batch_rx: mpsc::Receiver<Batch>, persist_tx: mpsc::Sender<PersistMsg>) -> Aggregator {
        let (_epoch_tx, epoch_rx) = mpsc::channel(1);
        Aggregator::new(batch_rx, persist_tx, epoch_rx, CancellationToken::new())
    }

    #[tokio::test]
    async fn ingest_populates_direct_and_all_keys() {
        let (_batch_tx, batch_rx) = mpsc::channel(1);
        let (persist_tx, mut persist_rx) = mpsc::channel(16);
        let mut agg = aggregator(batch_rx, persist_tx);

        agg.ingest(vec![tick("Exchange1", "BTCUSDT", 100.0, 1)]).await;

        assert_eq!(agg.working.len(), 2);
        assert!(agg.working.contains_key(&AggregateKey::new("Exchange1", "BTCUSDT")));
        assert!(agg.working.contains_key(&AggregateKey::all("BTCUSDT")));

        let msg = persist_rx.recv().await.unwrap();
        matches!(msg, PersistMsg::Latest(_));
    }

    #[tokio::test]
    async fn empty_minute_emits_no_snapshot() {
        let (_batch_tx, batch_rx) = mpsc::channel(1);
        let (persist_tx, mut persist_rx) = mpsc::channel(16);
        let mut agg = aggregator(batch_rx, persist_tx);

        agg.flush_minute().await;
        assert!(persist_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn nonempty_minute_emits_snapshot_and_clears_working() {
        let (_batch_tx, batch_rx) = mpsc::channel(1);
        let (persist_tx, mut persist_rx) = mpsc::channel(16);
        let mut agg = aggregator(batch_rx, persist_tx);

        agg.ingest(vec![tick("Exchange1", "BTCUSDT", 100.0, 1)]).await;
        persist_rx.recv().await.unwrap(); // drain the latest message
        agg.flush_minute().await;

        let msg = persist_rx.recv().await.unwrap();
        match msg {
            PersistMsg::Minute(snapshot) => assert_eq!(snapshot.entries.len(), 2),
            _ => panic!("expected a minute snapshot"),
        }
        assert!(agg.working.is_empty());
    }

    #[tokio::test]
    async fn stale_epoch_tick_is_dropped() {
        let (_batch_tx, batch_rx) = mpsc::channel(1);
        let (persist_tx, mut persist_rx) = mpsc::channel(16);
        let mut agg = aggregator(batch_rx, persist_tx);
        agg.epoch = 1;

        let mut stale = tick("Exchange1", "BTCUSDT", 100.0, 1);
        stale.epoch = 0;
        agg.ingest(vec![stale]).await;

        assert!(agg.working.is_empty());
        assert!(persist_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn epoch_barrier_discards_in_flight_minute() {
        let (_batch_tx, batch_rx) = mpsc::channel(1);
        let (persist_tx, mut persist_rx) = mpsc::channel(16);
        let mut agg = aggregator(batch_rx, persist_tx);

        agg.ingest(vec![tick("Exchange1", "BTCUSDT", 100.0, 1)]).await;
        persist_rx.recv().await.unwrap(); // drain the latest message
        assert!(!agg.working.is_empty());

        agg.discard_for_new_epoch(1);
        assert!(agg.working.is_empty());
        assert_eq!(agg.epoch, 1);

        // A tick still carrying the old epoch must not repopulate it.
        let mut stale = tick("Exchange1", "BTCUSDT", 999.0, 2);
        stale.epoch = 0;
        agg.ingest(vec![stale]).await;
        assert!(agg.working.is_empty());
    }
}
