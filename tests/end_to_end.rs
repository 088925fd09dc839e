//! Cross-module scenarios wiring the aggregator and persister together
//! without any network adapter or HTTP layer involved.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use marketflow::aggregate::{Aggregator, Ring};
use marketflow::api::HealthState;
use marketflow::cache::{Cache, MemoryCache};
use marketflow::ingest::worker;
use marketflow::persist::{PersistMsg, Writer};
use marketflow::store;
use marketflow::types::Tick;

async fn harness() -> (
    mpsc::Sender<Vec<Tick>>,
    Arc<Ring>,
    sqlx::SqlitePool,
    CancellationToken,
    tokio::task::JoinHandle<()>,
    tokio::task::JoinHandle<()>,
) {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test.db");
    // Keep the tempdir alive for the duration of the test by leaking it —
    // acceptable in a short-lived test process.
    std::mem::forget(dir);
    let pool = store::init_pool(db_path.to_str().unwrap()).await.unwrap();

    let ring = Arc::new(Ring::new());
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
    let health = Arc::new(HealthState::new());
    let cancel = CancellationToken::new();

    let (batch_tx, batch_rx) = mpsc::channel::<Vec<Tick>>(4);
    let (persist_tx, persist_rx) = mpsc::channel::<PersistMsg>(64);
    let (_epoch_tx, epoch_rx) = mpsc::channel(1);

    let aggregator = Aggregator::new(batch_rx, persist_tx, epoch_rx, cancel.child_token());
    let agg_handle = tokio::spawn(aggregator.run());

    let writer = Writer::new(
        persist_rx,
        pool.clone(),
        cache.clone(),
        ring.clone(),
        Duration::from_secs(60),
        cancel.child_token(),
        health.clone(),
    );
    let writer_handle = tokio::spawn(writer.run());

    (batch_tx, ring, pool, cancel, agg_handle, writer_handle)
}

fn tick(source: &str, pair: &str, price: f64, ts: i64) -> Tick {
    Tick { source: source.to_string(), pair: pair.to_string(), price, event_ts: ts, epoch: 0 }
}

/// Scenario 1: three ticks from one source in one minute produce matching
/// direct and All rows once the minute is force-flushed.
#[tokio::test]
async fn single_source_minute_produces_direct_and_all_rows() {
    let (batch_tx, _ring, pool, cancel, agg_handle, writer_handle) = harness().await;

    batch_tx
        .send(vec![
            tick("Exchange1", "BTCUSDT", 100.0, 1),
            tick("Exchange1", "BTCUSDT", 200.0, 2),
            tick("Exchange1", "BTCUSDT", 150.0, 3),
        ])
        .await
        .unwrap();

    // Force the minute to flush by closing the aggregator's input.
    drop(batch_tx);
    agg_handle.await.unwrap();

    // Give the writer a moment to drain the resulting persist messages.
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    let _ = writer_handle.await;

    let direct = store::avg_price(&pool, "Exchange1", "BTCUSDT", None).await.unwrap().unwrap();
    assert!((direct - 150.0).abs() < 1e-9);
    let direct_min = store::min_price(&pool, "Exchange1", "BTCUSDT", None).await.unwrap().unwrap();
    assert!((direct_min - 100.0).abs() < 1e-9);
    let direct_max = store::max_price(&pool, "Exchange1", "BTCUSDT", None).await.unwrap().unwrap();
    assert!((direct_max - 200.0).abs() < 1e-9);

    let all = store::avg_price(&pool, "All", "BTCUSDT", None).await.unwrap().unwrap();
    assert!((all - 150.0).abs() < 1e-9);
}

/// Scenario 2: two sources each contribute one tick; the All row reconciles
/// across both.
#[tokio::test]
async fn two_sources_reconcile_into_all_row() {
    let (batch_tx, _ring, pool, cancel, agg_handle, writer_handle) = harness().await;

    batch_tx
        .send(vec![tick("Exchange1", "ETHUSDT", 2000.0, 1), tick("Exchange2", "ETHUSDT", 2100.0, 2)])
        .await
        .unwrap();

    drop(batch_tx);
    agg_handle.await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    let _ = writer_handle.await;

    let all_avg = store::avg_price(&pool, "All", "ETHUSDT", None).await.unwrap().unwrap();
    assert!((all_avg - 2050.0).abs() < 1e-9);
    let all_min = store::min_price(&pool, "All", "ETHUSDT", None).await.unwrap().unwrap();
    assert!((all_min - 2000.0).abs() < 1e-9);
    let all_max = store::max_price(&pool, "All", "ETHUSDT", None).await.unwrap().unwrap();
    assert!((all_max - 2100.0).abs() < 1e-9);
}

/// Scenario 6: a line for an unknown symbol is dropped by the parse worker
/// and never reaches the aggregator, so no snapshot entry is ever created
/// for it.
#[tokio::test]
async fn unknown_symbol_line_never_becomes_a_snapshot_entry() {
    let (line_tx, line_rx) = mpsc::channel(4);
    let (tick_tx, tick_rx) = mpsc::channel(4);
    let (batch_tx, batch_rx) = mpsc::channel::<Vec<Tick>>(4);
    let (persist_tx, mut persist_rx) = mpsc::channel::<PersistMsg>(16);

    line_tx.send(r#"{"symbol":"UNKNOWN","price":1,"timestamp":0}"#.to_string()).await.unwrap();
    drop(line_tx);
    worker::run_worker("Exchange1".to_string(), 0, Arc::new(tokio::sync::Mutex::new(line_rx)), tick_tx.clone())
        .await;
    drop(tick_tx);
    assert!(tick_rx.try_recv().is_err());

    // Feed the (empty) tick stream straight into the aggregator as one
    // batch to confirm an empty batch flushes no snapshot either.
    let cancel = CancellationToken::new();
    let (_epoch_tx, epoch_rx) = mpsc::channel(1);
    let aggregator = Aggregator::new(batch_rx, persist_tx, epoch_rx, cancel.child_token());
    let handle = tokio::spawn(aggregator.run());
    batch_tx.send(Vec::new()).await.unwrap();
    drop(batch_tx);
    handle.await.unwrap();

    assert!(persist_rx.try_recv().is_err());
}
