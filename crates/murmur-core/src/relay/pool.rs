use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::time::{sleep_until, Instant};

use super::{DmFilter, EventStream, RelayConnection, RelayConnector, RelayError};
use crate::models::{RawEvent, RelayAccess, RelayMetadata};

/// Routes queries, subscriptions and publishes over the relays named in the
/// current metadata. Connections are opened on first use and kept for the
/// lifetime of the pool.
pub struct RelayPool {
    connector: Arc<dyn RelayConnector>,
    metadata: RwLock<RelayMetadata>,
    connections: Mutex<HashMap<String, Arc<dyn RelayConnection>>>,
    eose_grace: Duration,
}

impl RelayPool {
    pub fn new(
        connector: Arc<dyn RelayConnector>,
        metadata: RelayMetadata,
        eose_grace: Duration,
    ) -> Self {
        Self {
            connector,
            metadata: RwLock::new(metadata),
            connections: Mutex::new(HashMap::new()),
            eose_grace,
        }
    }

    pub fn metadata(&self) -> RelayMetadata {
        self.metadata.read().clone()
    }

    /// Last-writer-wins replacement of the relay metadata.
    pub fn propose_metadata(&self, candidate: RelayMetadata) -> bool {
        let accepted = self.metadata.write().propose(candidate);
        if accepted {
            tracing::info!(relays = ?self.metadata.read().relays, "relay metadata replaced");
        }
        accepted
    }

    /// Connection for `url`, opened on first request.
    pub fn connection(&self, url: &str) -> Arc<dyn RelayConnection> {
        self.connections
            .lock()
            .entry(url.to_string())
            .or_insert_with(|| {
                tracing::debug!(url, "opening relay connection");
                self.connector.open(url)
            })
            .clone()
    }

    pub fn open_connections(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.connections.lock().keys().cloned().collect();
        urls.sort();
        urls
    }

    fn targets(&self, access: RelayAccess) -> Result<Vec<Arc<dyn RelayConnection>>, RelayError> {
        let urls = self.metadata.read().targets(access);
        if urls.is_empty() {
            return Err(RelayError::NoRelays);
        }
        Ok(urls.iter().map(|url| self.connection(url)).collect())
    }

    /// Query every read relay. Once the first relay finishes, the others get
    /// a short grace window; the whole call never outlives `timeout`.
    /// Results are deduplicated by event id.
    pub async fn query(
        &self,
        filters: &[DmFilter],
        timeout: Duration,
    ) -> Result<Vec<RawEvent>, RelayError> {
        let targets = self.targets(RelayAccess::Read)?;
        let mut cutoff = Instant::now() + timeout;

        let mut pending: FuturesUnordered<_> = targets
            .into_iter()
            .map(|conn| async move {
                let result = conn.query(filters, timeout).await;
                (conn, result)
            })
            .collect();

        let mut seen = HashSet::new();
        let mut events = Vec::new();
        let mut answered = 0usize;
        let mut last_error = None;

        loop {
            tokio::select! {
                next = pending.next() => match next {
                    None => break,
                    Some((conn, Ok(batch))) => {
                        tracing::debug!(url = conn.url(), count = batch.len(), "relay query finished");
                        if answered == 0 {
                            cutoff = cutoff.min(Instant::now() + self.eose_grace);
                        }
                        answered += 1;
                        for event in batch {
                            if seen.insert(event.id.clone()) {
                                events.push(event);
                            }
                        }
                    }
                    Some((conn, Err(e))) => {
                        tracing::warn!(url = conn.url(), error = %e, "relay query failed");
                        last_error = Some(e);
                    }
                },
                _ = sleep_until(cutoff) => {
                    tracing::debug!(pending = pending.len(), "query cut off");
                    break;
                }
            }
        }

        if answered == 0 {
            return Err(last_error.unwrap_or(RelayError::Timeout));
        }
        Ok(events)
    }

    /// Merge live subscriptions on every read relay. Relays that refuse are
    /// skipped as long as at least one accepts.
    pub async fn subscribe(&self, filters: &[DmFilter]) -> Result<EventStream, RelayError> {
        let targets = self.targets(RelayAccess::Read)?;

        let results = futures::future::join_all(targets.iter().map(|conn| async move {
            (conn.url().to_string(), conn.subscribe(filters).await)
        }))
        .await;

        let mut streams = Vec::new();
        let mut last_error = None;
        for (url, result) in results {
            match result {
                Ok(stream) => streams.push(stream),
                Err(e) => {
                    tracing::warn!(url, error = %e, "relay subscription failed");
                    last_error = Some(e);
                }
            }
        }

        if streams.is_empty() {
            return Err(last_error.unwrap_or(RelayError::NoRelays));
        }
        Ok(futures::stream::select_all(streams).boxed())
    }

    /// Publish to every write relay. Succeeds when at least one relay accepts;
    /// returns the URLs that did.
    pub async fn publish(&self, event: &RawEvent) -> Result<Vec<String>, RelayError> {
        let targets = self.targets(RelayAccess::Write)?;

        let results = futures::future::join_all(targets.iter().map(|conn| async move {
            (conn.url().to_string(), conn.publish(event).await)
        }))
        .await;

        let mut accepted = Vec::new();
        let mut failures = Vec::new();
        for (url, result) in results {
            match result {
                Ok(()) => accepted.push(url),
                Err(e) => {
                    tracing::warn!(url, event_id = %event.id, error = %e, "publish failed");
                    failures.push(e.to_string());
                }
            }
        }

        if accepted.is_empty() {
            return Err(RelayError::Rejected(failures.join("; ")));
        }
        tracing::debug!(event_id = %event.id, relays = accepted.len(), "event published");
        Ok(accepted)
    }
}
