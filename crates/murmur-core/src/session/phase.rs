use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Sync progress for the current identity. Only ever moves forward, one step
/// at a time, until it is reset to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadingPhase {
    #[default]
    Idle,
    Cache,
    Relays,
    Subscriptions,
    /// Live subscriptions are armed. Says nothing about being caught up.
    Ready,
}

impl LoadingPhase {
    pub fn next(self) -> Option<LoadingPhase> {
        match self {
            LoadingPhase::Idle => Some(LoadingPhase::Cache),
            LoadingPhase::Cache => Some(LoadingPhase::Relays),
            LoadingPhase::Relays => Some(LoadingPhase::Subscriptions),
            LoadingPhase::Subscriptions => Some(LoadingPhase::Ready),
            LoadingPhase::Ready => None,
        }
    }
}

impl fmt::Display for LoadingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoadingPhase::Idle => "idle",
            LoadingPhase::Cache => "cache",
            LoadingPhase::Relays => "relays",
            LoadingPhase::Subscriptions => "subscriptions",
            LoadingPhase::Ready => "ready",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PhaseError {
    #[error("Phase change from a stale pipeline (epoch {found}, current {current})")]
    Stale { found: u64, current: u64 },

    #[error("Phase cannot move from {from} to {to}")]
    OutOfOrder { from: LoadingPhase, to: LoadingPhase },
}

/// Publishes the loading phase to watchers. Transitions carry the epoch of the
/// pipeline that requested them; requests from an older epoch are refused.
pub struct PhaseMachine {
    tx: watch::Sender<LoadingPhase>,
    epoch: Mutex<u64>,
}

impl PhaseMachine {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(LoadingPhase::Idle);
        Self {
            tx,
            epoch: Mutex::new(0),
        }
    }

    pub fn current(&self) -> LoadingPhase {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LoadingPhase> {
        self.tx.subscribe()
    }

    /// Adopt `epoch` and leave `Idle`.
    pub fn begin(&self, epoch: u64) -> Result<(), PhaseError> {
        let mut current_epoch = self.epoch.lock();
        let from = self.current();
        if from != LoadingPhase::Idle {
            return Err(PhaseError::OutOfOrder {
                from,
                to: LoadingPhase::Cache,
            });
        }
        *current_epoch = epoch;
        self.step(LoadingPhase::Cache)
    }

    pub fn advance(&self, epoch: u64, to: LoadingPhase) -> Result<(), PhaseError> {
        let current_epoch = self.epoch.lock();
        if *current_epoch != epoch {
            return Err(PhaseError::Stale {
                found: epoch,
                current: *current_epoch,
            });
        }
        self.step(to)
    }

    /// Back to `Idle` under a new epoch, invalidating any running pipeline.
    pub fn reset(&self, epoch: u64) {
        let mut current_epoch = self.epoch.lock();
        *current_epoch = epoch;
        if self.tx.send_replace(LoadingPhase::Idle) != LoadingPhase::Idle {
            tracing::info!("loading phase reset to idle");
        }
    }

    // Caller holds the epoch lock.
    fn step(&self, to: LoadingPhase) -> Result<(), PhaseError> {
        let from = self.current();
        if from.next() != Some(to) {
            return Err(PhaseError::OutOfOrder { from, to });
        }
        self.tx.send_replace(to);
        tracing::info!(%from, %to, "loading phase advanced");
        Ok(())
    }
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}
