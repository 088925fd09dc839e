use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{
    RECONNECT_BACKOFF_BASE_MS, RECONNECT_BACKOFF_CAP_MS, RECONNECT_MAX_ATTEMPTS, SYMBOLS,
};
use crate::types::AdapterEvent;

/// Connects to a live exchange feed over TCP, reads newline-delimited JSON
/// ticks, and forwards each raw line to the worker pool. Reconnects forever
/// on failure with exponential backoff capped at `RECONNECT_BACKOFF_CAP_MS`;
/// after `RECONNECT_MAX_ATTEMPTS` consecutive failures it reports itself
/// Fatal for health purposes but keeps retrying.
pub async fn run_live(
    name: String,
    addr: String,
    line_tx: mpsc::Sender<String>,
    cancel: CancellationToken,
    events: mpsc::Sender<AdapterEvent>,
) {
    let mut backoff_ms = RECONNECT_BACKOFF_BASE_MS;
    let mut attempts: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return;
        }

        match TcpStream::connect(&addr).await {
            Ok(stream) => {
                attempts = 0;
                backoff_ms = RECONNECT_BACKOFF_BASE_MS;
                let _ = events.send(AdapterEvent::Connected { name: name.clone() }).await;
                info!(adapter = %name, %addr, "connected");

                if !stream_lines(&name, stream, &line_tx, &cancel).await {
                    return;
                }

                let _ = events.send(AdapterEvent::Disconnected { name: name.clone() }).await;
                warn!(adapter = %name, "disconnected, will reconnect");
            }
            Err(e) => {
                attempts += 1;
                warn!(adapter = %name, attempt = attempts, "connect failed: {e}");
                if attempts == RECONNECT_MAX_ATTEMPTS {
                    let _ = events.send(AdapterEvent::Fatal { name: name.clone() }).await;
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_millis(backoff_ms)) => {}
        }
        backoff_ms = (backoff_ms * 2).min(RECONNECT_BACKOFF_CAP_MS);
    }
}

/// Reads lines until EOF, error, or cancellation. Returns false if the
/// caller should stop entirely (cancelled), true if it should reconnect.
async fn stream_lines(
    name: &str,
    stream: TcpStream,
    line_tx: &mpsc::Sender<String>,
    cancel: &CancellationToken,
) -> bool {
    let mut lines = BufReader::new(stream).lines();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return false,
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if line_tx.send(line).await.is_err() {
                            return false;
                        }
                    }
                    Ok(None) => return true,
                    Err(e) => {
                        warn!(adapter = %name, "read error: {e}");
                        return true;
                    }
                }
            }
        }
    }
}

/// Synthetic price-walk adapter for test mode. Generates a plausible tick
/// per symbol roughly every 200ms, formatted identically to the live wire
/// format so it flows through the same parse-worker pipeline.
pub async fn run_test(name: String, line_tx: mpsc::Sender<String>, cancel: CancellationToken) {
    let mut rng = ChaCha8Rng::from_entropy();
    let mut prices: Vec<f64> = SYMBOLS.iter().map(|_| rng.gen_range(10.0..60_000.0)).collect();
    let mut ticker = interval(Duration::from_millis(200));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                for (i, symbol) in SYMBOLS.iter().enumerate() {
                    let drift = rng.gen_range(-0.002..0.002);
                    prices[i] = (prices[i] * (1.0 + drift)).max(0.01);
                    let line = format!(
                        r#"{{"symbol":"{}","price":{:.4},"timestamp":{}}}"#,
                        symbol,
                        prices[i],
                        crate::types::now_ms(),
                    );
                    if line_tx.send(line).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}
