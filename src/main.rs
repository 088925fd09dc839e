use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use marketflow::aggregate::{Aggregator, Ring};
use marketflow::api::{router, ApiState, HealthState};
use marketflow::cache::{Cache, MemoryCache};
use marketflow::config::{Config, BATCH_CHANNEL_CAPACITY, CHANNEL_CAPACITY, TICK_CHANNEL_CAPACITY};
use marketflow::error::Result;
use marketflow::persist::{PersistMsg, Writer};
use marketflow::pipeline::{Mode, ModeManager};
use marketflow::query::QueryMerger;
use marketflow::store;
use marketflow::types::AdapterEvent;
use marketflow::ingest;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(&cfg.log_level)).init();

    if let Err(e) = run(cfg).await {
        error!("fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    let pool = store::init_pool(&cfg.db_path).await?;
    info!(db_path = %cfg.db_path, "database ready");

    let initial_mode = Mode::from_str(&cfg.mode).unwrap_or(Mode::Test);
    let cache = Arc::new(MemoryCache::new());
    let ring = Arc::new(Ring::new());
    let health = Arc::new(HealthState::new());
    let cancel = CancellationToken::new();

    // Per-exchange tick channels feeding the fan-in merger. These survive
    // mode switches — only the adapter + worker pool behind them is torn
    // down and respawned.
    let (tick_tx1, tick_rx1) = mpsc::channel(TICK_CHANNEL_CAPACITY);
    let (tick_tx2, tick_rx2) = mpsc::channel(TICK_CHANNEL_CAPACITY);
    let (tick_tx3, tick_rx3) = mpsc::channel(TICK_CHANNEL_CAPACITY);

    let (batch_tx, batch_rx) = mpsc::channel(BATCH_CHANNEL_CAPACITY);
    let (persist_tx, persist_rx) = mpsc::channel::<PersistMsg>(CHANNEL_CAPACITY);
    let (events_tx, mut events_rx) = mpsc::channel::<AdapterEvent>(CHANNEL_CAPACITY);
    let (epoch_tx, epoch_rx) = mpsc::channel(8);

    tokio::spawn(ingest::run_merge(tick_rx1, tick_rx2, tick_rx3, batch_tx, cancel.child_token()));

    let aggregator = Aggregator::new(batch_rx, persist_tx, epoch_rx, cancel.child_token());
    tokio::spawn(aggregator.run());

    let cache_dyn: Arc<dyn Cache> = cache.clone();
    let writer = Writer::new(
        persist_rx,
        pool.clone(),
        cache_dyn.clone(),
        ring.clone(),
        Duration::from_secs(cfg.cache_ttl_secs),
        cancel.child_token(),
        health.clone(),
    );
    tokio::spawn(writer.run());

    let sweep_cache = cache.clone();
    let sweep_cancel = cancel.child_token();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = sweep_cancel.cancelled() => return,
                _ = tick.tick() => sweep_cache.sweep(),
            }
        }
    });

    let health_events = health.clone();
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                AdapterEvent::Connected { name } => {
                    health_events.set_adapters_connected(true);
                    info!(adapter = %name, "adapter connected");
                }
                AdapterEvent::Disconnected { name } => {
                    warn!(adapter = %name, "adapter disconnected");
                }
                AdapterEvent::Fatal { name } => {
                    health_events.inc_fatal_adapters();
                    error!(adapter = %name, "adapter exhausted reconnect attempts, still retrying");
                }
            }
        }
    });

    let mode_manager = ModeManager::new(vec![tick_tx1, tick_tx2, tick_tx3], events_tx, epoch_tx, initial_mode);
    mode_manager.start(initial_mode).await;

    let query = Arc::new(QueryMerger::new(pool.clone(), cache_dyn.clone(), ring.clone()));
    let api_state = ApiState { query, mode: mode_manager, health, cache: cache_dyn, pool: pool.clone() };
    let app = router(api_state);

    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(%bind_addr, "http api listening");

    let shutdown_cancel = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            shutdown_cancel.cancel();
        })
        .await?;

    Ok(())
}
