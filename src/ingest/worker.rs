use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::warn;

use crate::config::is_known_symbol;
use crate::types::{RawTick, Tick};

/// One parse worker: pulls raw JSON lines from the adapter's shared line
/// channel, parses and validates them, stamps the adapter's own identity as
/// the tick's source (never trusting anything the payload itself claims),
/// and forwards valid ticks onward. Several workers share one receiver so
/// a burst on one adapter doesn't serialize behind a single parser.
pub async fn run_worker(
    source: String,
    epoch: u64,
    lines: Arc<Mutex<mpsc::Receiver<String>>>,
    tick_tx: mpsc::Sender<Tick>,
) {
    loop {
        let line = {
            let mut rx = lines.lock().await;
            rx.recv().await
        };
        let Some(line) = line else { return };

        let raw: RawTick = match serde_json::from_str(&line) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(%source, "dropping unparseable line: {e}");
                continue;
            }
        };

        if !is_known_symbol(&raw.symbol) {
            warn!(%source, symbol = %raw.symbol, "dropping tick for unknown symbol");
            continue;
        }

        let tick = Tick { source: source.clone(), pair: raw.symbol, price: raw.price, event_ts: raw.timestamp, epoch };
        if tick_tx.send(tick).await.is_err() {
            return;
        }
    }
}

/// Spawns `count` workers sharing one line channel, all stamping `source`
/// and `epoch` (the mode generation this slot belongs to).
pub fn spawn_pool(
    source: String,
    epoch: u64,
    lines: mpsc::Receiver<String>,
    tick_tx: mpsc::Sender<Tick>,
    count: usize,
) -> Vec<tokio::task::JoinHandle<()>> {
    let shared = Arc::new(Mutex::new(lines));
    (0..count)
        .map(|_| {
            let shared = shared.clone();
            let tick_tx = tick_tx.clone();
            let source = source.clone();
            tokio::spawn(run_worker(source, epoch, shared, tick_tx))
        })
        .collect()
}
