use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use super::{DurableStore, MessageStore};
use crate::models::RawEvent;

/// Debounced snapshot writer in front of a [`DurableStore`].
///
/// Holds at most one pending write. Every failure is logged and swallowed so
/// the engine keeps working network-only when storage is unavailable.
pub struct PersistenceCache {
    store: Arc<dyn DurableStore>,
    debounce: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl PersistenceCache {
    pub fn new(store: Arc<dyn DurableStore>, debounce: Duration) -> Self {
        Self {
            store,
            debounce,
            pending: Mutex::new(None),
        }
    }

    /// Stored-form events for `identity`, or nothing if absent or unreadable.
    /// The read runs on the blocking pool.
    pub async fn load(&self, identity: &str) -> Vec<RawEvent> {
        let store = self.store.clone();
        let identity = identity.to_string();
        match tokio::task::spawn_blocking(move || store.get(&identity)).await {
            Ok(Ok(Some(events))) => {
                tracing::debug!(count = events.len(), "loaded cached snapshot");
                events
            }
            Ok(Ok(None)) => Vec::new(),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "failed to read cached snapshot");
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(error = %e, "cache read task failed");
                Vec::new()
            }
        }
    }

    /// (Re)start the debounce timer. When it fires, the snapshot is taken from
    /// the store's state at that moment, and skipped if the store has moved to
    /// another epoch or owner in the meantime.
    pub fn schedule_write(&self, messages: Arc<Mutex<MessageStore>>, identity: String, epoch: u64) {
        let store = self.store.clone();
        let debounce = self.debounce;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;

            let events = {
                let messages = messages.lock();
                if messages.epoch() != epoch || messages.owner() != Some(identity.as_str()) {
                    tracing::debug!("dropping stale cache write");
                    return;
                }
                messages.flatten()
            };

            let count = events.len();
            match tokio::task::spawn_blocking(move || store.put(&identity, &events)).await {
                Ok(Ok(())) => tracing::debug!(count, "cache snapshot written"),
                Ok(Err(e)) => tracing::warn!(error = %e, "failed to write cache snapshot"),
                Err(e) => tracing::warn!(error = %e, "cache write task failed"),
            }
        });

        if let Some(previous) = self.pending.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Write the pending snapshot now instead of waiting for the timer. A
    /// no-op when nothing is pending.
    pub fn flush(&self, messages: &Mutex<MessageStore>) {
        let Some(handle) = self.pending.lock().take() else {
            return;
        };
        if handle.is_finished() {
            return;
        }
        handle.abort();

        let (identity, events) = {
            let messages = messages.lock();
            let Some(owner) = messages.owner() else {
                return;
            };
            (owner.to_string(), messages.flatten())
        };
        match self.store.put(&identity, &events) {
            Ok(()) => tracing::debug!(count = events.len(), "cache snapshot flushed"),
            Err(e) => tracing::warn!(error = %e, "failed to flush cache snapshot"),
        }
    }

    pub fn cancel_pending(&self) {
        if let Some(handle) = self.pending.lock().take() {
            handle.abort();
        }
    }

    /// Wipe the snapshot for `identity`, or every snapshot when `None`.
    pub fn clear(&self, identity: Option<&str>) {
        self.cancel_pending();
        let result = match identity {
            Some(identity) => self.store.delete(identity),
            None => self.store.clear_all(),
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to clear cached snapshots");
        }
    }
}
