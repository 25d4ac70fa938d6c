use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use nostr_sdk::prelude::*;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::OnceCell;

use super::{DmFilter, EventStream, RelayError};
use crate::models::RawEvent;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_VERIFY_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// A single relay endpoint.
#[async_trait]
pub trait RelayConnection: Send + Sync {
    fn url(&self) -> &str;

    /// Fetch stored events matching any of `filters`, returning once the relay
    /// signals end-of-stored-events or `timeout` elapses.
    async fn query(
        &self,
        filters: &[DmFilter],
        timeout: Duration,
    ) -> Result<Vec<RawEvent>, RelayError>;

    async fn subscribe(&self, filters: &[DmFilter]) -> Result<EventStream, RelayError>;

    /// Resolves once the relay acknowledged the event.
    async fn publish(&self, event: &RawEvent) -> Result<(), RelayError>;
}

/// Opens connections by URL. The pool calls this at most once per URL.
pub trait RelayConnector: Send + Sync {
    fn open(&self, url: &str) -> Arc<dyn RelayConnection>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NostrConnector;

impl RelayConnector for NostrConnector {
    fn open(&self, url: &str) -> Arc<dyn RelayConnection> {
        Arc::new(NostrConnection::new(url))
    }
}

/// One nostr-sdk client bound to exactly one relay. The websocket is opened
/// on first use.
pub struct NostrConnection {
    url: String,
    client: Client,
    connected: OnceCell<()>,
}

impl NostrConnection {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            client: Client::builder().build(),
            connected: OnceCell::new(),
        }
    }

    async fn ensure_connected(&self) -> Result<(), RelayError> {
        self.connected
            .get_or_try_init(|| async {
                self.client
                    .add_relay(&self.url)
                    .await
                    .map_err(|e| self.connection_error(e))?;

                if tokio::time::timeout(CONNECT_TIMEOUT, self.client.connect())
                    .await
                    .is_err()
                {
                    return Err(RelayError::Connection {
                        url: self.url.clone(),
                        message: format!("connect timed out after {:?}", CONNECT_TIMEOUT),
                    });
                }

                // Status transitions asynchronously after connect() returns.
                let verify_start = std::time::Instant::now();
                loop {
                    let connected = self
                        .client
                        .relays()
                        .await
                        .values()
                        .any(|r| r.status() == RelayStatus::Connected);
                    if connected {
                        tracing::debug!(
                            url = %self.url,
                            elapsed = ?verify_start.elapsed(),
                            "relay connected"
                        );
                        return Ok(());
                    }
                    if verify_start.elapsed() >= CONNECT_VERIFY_TIMEOUT {
                        return Err(RelayError::Connection {
                            url: self.url.clone(),
                            message: format!(
                                "not connected after {:?} verification timeout",
                                CONNECT_VERIFY_TIMEOUT
                            ),
                        });
                    }
                    tokio::time::sleep(CONNECT_POLL_INTERVAL).await;
                }
            })
            .await
            .map(|_| ())
    }

    fn connection_error(&self, e: impl std::fmt::Display) -> RelayError {
        RelayError::Connection {
            url: self.url.clone(),
            message: e.to_string(),
        }
    }

    fn request_error(&self, e: impl std::fmt::Display) -> RelayError {
        RelayError::Request {
            url: self.url.clone(),
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl RelayConnection for NostrConnection {
    fn url(&self) -> &str {
        &self.url
    }

    async fn query(
        &self,
        filters: &[DmFilter],
        timeout: Duration,
    ) -> Result<Vec<RawEvent>, RelayError> {
        self.ensure_connected().await?;

        let mut out = Vec::new();
        for filter in filters {
            let events = self
                .client
                .fetch_events(filter.to_nostr()?, timeout)
                .await
                .map_err(|e| self.request_error(e))?;
            for event in events.into_iter() {
                match RawEvent::from_nostr(&event) {
                    Ok(raw) => out.push(raw),
                    Err(e) => tracing::debug!(url = %self.url, error = %e, "dropping unconvertible event"),
                }
            }
        }
        Ok(out)
    }

    async fn subscribe(&self, filters: &[DmFilter]) -> Result<EventStream, RelayError> {
        self.ensure_connected().await?;

        // Take the receiver before issuing REQs so nothing slips in between.
        let notifications = self.client.notifications();
        let mut ids = HashSet::new();
        for filter in filters {
            let output = self
                .client
                .subscribe(filter.to_nostr()?, None)
                .await
                .map_err(|e| self.request_error(e))?;
            ids.insert(output.val);
        }

        let guard = SubscriptionGuard {
            client: self.client.clone(),
            ids,
        };
        let url = self.url.clone();

        let stream = futures::stream::unfold(
            (notifications, guard, url),
            |(mut rx, guard, url)| async move {
                loop {
                    match rx.recv().await {
                        Ok(RelayPoolNotification::Event {
                            subscription_id,
                            event,
                            ..
                        }) if guard.ids.contains(&subscription_id) => {
                            match RawEvent::from_nostr(&event) {
                                Ok(raw) => return Some((raw, (rx, guard, url))),
                                Err(e) => {
                                    tracing::debug!(url = %url, error = %e, "dropping unconvertible event")
                                }
                            }
                        }
                        Ok(RelayPoolNotification::Shutdown) => return None,
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(url = %url, skipped, "live subscription lagged");
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            },
        );

        Ok(stream.boxed())
    }

    async fn publish(&self, event: &RawEvent) -> Result<(), RelayError> {
        self.ensure_connected().await?;

        let event = event
            .to_nostr()
            .map_err(|e| RelayError::Conversion(e.to_string()))?;

        let output = tokio::time::timeout(PUBLISH_TIMEOUT, self.client.send_event(&event))
            .await
            .map_err(|_| RelayError::Timeout)?
            .map_err(|e| self.request_error(e))?;

        if output.success.is_empty() {
            let reason = output
                .failed
                .values()
                .next()
                .cloned()
                .unwrap_or_else(|| "no acknowledgement".to_string());
            return Err(self.request_error(reason));
        }
        Ok(())
    }
}

/// Closes the relay-side subscriptions once the owning stream is dropped.
struct SubscriptionGuard {
    client: Client,
    ids: HashSet<SubscriptionId>,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let client = self.client.clone();
        let ids = std::mem::take(&mut self.ids);
        handle.spawn(async move {
            for id in ids {
                let _ = client.unsubscribe(&id).await;
            }
        });
    }
}
