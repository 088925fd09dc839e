use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::types::{Batch, Tick};

/// Fans three per-exchange tick streams into one, buffering everything
/// received during each 1-second tumbling window and flushing it as a batch
/// on the tick boundary. A window with nothing in it emits no batch.
pub async fn run_merge(
    mut rx1: mpsc::Receiver<Tick>,
    mut rx2: mpsc::Receiver<Tick>,
    mut rx3: mpsc::Receiver<Tick>,
    batch_tx: mpsc::Sender<Batch>,
    cancel: CancellationToken,
) {
    let mut rx1 = Some(&mut rx1);
    let mut rx2 = Some(&mut rx2);
    let mut rx3 = Some(&mut rx3);
    let mut buffer: Batch = Vec::new();
    let mut flush = interval(Duration::from_secs(1));
    flush.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("fan-in merger shutting down");
                return;
            }
            _ = flush.tick() => {
                if !buffer.is_empty() {
                    let batch = std::mem::take(&mut buffer);
                    if batch_tx.send(batch).await.is_err() {
                        return;
                    }
                }
            }
            tick = recv_slot(&mut rx1) => {
                if let Some(tick) = tick { buffer.push(tick); }
            }
            tick = recv_slot(&mut rx2) => {
                if let Some(tick) = tick { buffer.push(tick); }
            }
            tick = recv_slot(&mut rx3) => {
                if let Some(tick) = tick { buffer.push(tick); }
            }
        }

        if rx1.is_none() && rx2.is_none() && rx3.is_none() {
            if !buffer.is_empty() {
                let batch = std::mem::take(&mut buffer);
                let _ = batch_tx.send(batch).await;
            }
            info!("all fan-in sources closed");
            return;
        }
    }
}

/// Awaits the next tick on a still-open slot; a closed slot never resolves,
/// which drops it out of the `select!` without spinning.
async fn recv_slot(slot: &mut Option<&mut mpsc::Receiver<Tick>>) -> Option<Tick> {
    match slot {
        Some(rx) => match rx.recv().await {
            Some(tick) => Some(tick),
            None => {
                *slot = None;
                std::future::pending().await
            }
        },
        None => std::future::pending().await,
    }
}
