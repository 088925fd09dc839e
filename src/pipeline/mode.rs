use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::aggregate::EpochBarrier;
use crate::config::{LIVE_EXCHANGE_ADDR, PARSE_WORKERS};
use crate::error::{AppError, Result};
use crate::ingest::{adapter, worker};
use crate::types::{AdapterEvent, Tick};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Live,
    Test,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Live => write!(f, "live"),
            Mode::Test => write!(f, "test"),
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "live" => Ok(Mode::Live),
            "test" => Ok(Mode::Test),
            other => Err(AppError::BadRequest(format!("unknown mode: {other}"))),
        }
    }
}

/// One exchange's currently running ingestion tasks (adapter + its worker
/// pool). Torn down and respawned as a unit on a mode switch; the tick
/// channel downstream of it is never recreated, so the merger and
/// aggregator never observe the switch at all.
struct Slot {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Slot {
    async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

/// Owns the live/test toggle for every exchange. A switch tears down each
/// exchange's adapter + worker pool, bumps the epoch and waits for the
/// aggregator to discard whatever it had accumulated under the old one, then
/// respawns the new generation — so no tick observed before the switch can
/// ever land in a snapshot emitted after it.
pub struct ModeManager {
    mode: Mutex<Mode>,
    slots: Mutex<Vec<Slot>>,
    epoch: Mutex<u64>,
    tick_txs: Vec<mpsc::Sender<Tick>>,
    events: mpsc::Sender<AdapterEvent>,
    epoch_tx: mpsc::Sender<EpochBarrier>,
}

impl ModeManager {
    pub fn new(
        tick_txs: Vec<mpsc::Sender<Tick>>,
        events: mpsc::Sender<AdapterEvent>,
        epoch_tx: mpsc::Sender<EpochBarrier>,
        initial: Mode,
    ) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(initial),
            slots: Mutex::new(Vec::new()),
            epoch: Mutex::new(0),
            tick_txs,
            events,
            epoch_tx,
        })
    }

    pub async fn current_mode(&self) -> Mode {
        *self.mode.lock().await
    }

    /// Spawns the initial set of adapters in `mode` without tearing anything
    /// down first. Called once at startup.
    pub async fn start(&self, mode: Mode) {
        let epoch = *self.epoch.lock().await;
        let mut slots = self.slots.lock().await;
        for (i, &(name, addr)) in LIVE_EXCHANGE_ADDR.iter().enumerate() {
            slots.push(self.spawn_slot(name, addr, mode, epoch, self.tick_txs[i].clone()));
        }
        *self.mode.lock().await = mode;
        info!(%mode, "pipeline started");
    }

    pub async fn switch_mode(&self, target: Mode) -> Result<()> {
        let current = self.current_mode().await;
        if current == target {
            return Err(AppError::BadRequest(format!("already in {target} mode")));
        }

        let switch = async {
            // Step 2: close every current adapter and let the fan-in merger
            // drain whatever they already sent before the cancel took effect.
            let mut slots = self.slots.lock().await;
            let old = std::mem::take(&mut *slots);
            for slot in old {
                slot.shutdown().await;
            }

            // Bump the epoch and block the new generation from starting
            // until the aggregator has acked discarding the old one's
            // in-flight minute — no partial snapshot crosses the switch.
            let next_epoch = {
                let mut epoch = self.epoch.lock().await;
                *epoch += 1;
                *epoch
            };
            let (ack_tx, ack_rx) = oneshot::channel();
            if self.epoch_tx.send((next_epoch, ack_tx)).await.is_ok() {
                let _ = ack_rx.await;
            }

            // Step 3: instantiate the new generation.
            for (i, &(name, addr)) in LIVE_EXCHANGE_ADDR.iter().enumerate() {
                slots.push(self.spawn_slot(name, addr, target, next_epoch, self.tick_txs[i].clone()));
            }
            *self.mode.lock().await = target;
        };

        match tokio::time::timeout(crate::config::MODE_SWITCH_TIMEOUT, switch).await {
            Ok(()) => {
                info!(mode = %target, "mode switch complete");
                Ok(())
            }
            Err(_) => {
                warn!(mode = %target, "mode switch timed out");
                Err(AppError::BadRequest(format!("switch to {target} timed out")))
            }
        }
    }

    fn spawn_slot(&self, name: &str, addr: &str, mode: Mode, epoch: u64, tick_tx: mpsc::Sender<Tick>) -> Slot {
        let cancel = CancellationToken::new();
        let (line_tx, line_rx) = mpsc::channel(crate::config::LINE_CHANNEL_CAPACITY);

        let mut handles = worker::spawn_pool(name.to_string(), epoch, line_rx, tick_tx, PARSE_WORKERS);

        let adapter_handle = match mode {
            Mode::Live => {
                let events = self.events.clone();
                tokio::spawn(adapter::run_live(name.to_string(), addr.to_string(), line_tx, cancel.clone(), events))
            }
            Mode::Test => tokio::spawn(adapter::run_test(name.to_string(), line_tx, cancel.clone())),
        };
        handles.push(adapter_handle);

        Slot { cancel, handles }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parses_known_values_only() {
        assert_eq!("live".parse::<Mode>().unwrap(), Mode::Live);
        assert_eq!("test".parse::<Mode>().unwrap(), Mode::Test);
        assert!("bogus".parse::<Mode>().is_err());
    }

    #[tokio::test]
    async fn switching_to_current_mode_is_rejected() {
        let (tx1, _rx1) = mpsc::channel(8);
        let (tx2, _rx2) = mpsc::channel(8);
        let (tx3, _rx3) = mpsc::channel(8);
        let (events_tx, _events_rx) = mpsc::channel(8);
        let (epoch_tx, _epoch_rx) = mpsc::channel(8);
        let manager = ModeManager::new(vec![tx1, tx2, tx3], events_tx, epoch_tx, Mode::Test);
        manager.start(Mode::Test).await;

        let result = manager.switch_mode(Mode::Test).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn switching_mode_bumps_epoch_and_acks_before_respawning() {
        let (tx1, _rx1) = mpsc::channel(8);
        let (tx2, _rx2) = mpsc::channel(8);
        let (tx3, _rx3) = mpsc::channel(8);
        let (events_tx, _events_rx) = mpsc::channel(8);
        let (epoch_tx, mut epoch_rx) = mpsc::channel(8);
        let manager = ModeManager::new(vec![tx1, tx2, tx3], events_tx, epoch_tx, Mode::Live);
        manager.start(Mode::Live).await;

        let acker = tokio::spawn(async move {
            let (epoch, ack) = epoch_rx.recv().await.unwrap();
            assert_eq!(epoch, 1);
            let _ = ack.send(());
        });

        manager.switch_mode(Mode::Test).await.unwrap();
        acker.await.unwrap();
    }
}
