//! In-memory relays and identity helpers shared by unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use nostr_sdk::prelude::*;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::constants::kinds;
use crate::crypto::{DmSigner, EventDraft, KeysSigner};
use crate::models::RawEvent;
use crate::relay::{DmFilter, EventStream, RelayConnection, RelayConnector, RelayError};
use crate::store::{DurableStore, StorageError};

pub fn signer_pair() -> (Arc<KeysSigner>, Arc<KeysSigner>) {
    (
        Arc::new(KeysSigner::new(Keys::generate())),
        Arc::new(KeysSigner::new(Keys::generate())),
    )
}

/// A signed kind-4 message from `sender` to `recipient`.
pub async fn legacy_dm(
    sender: &KeysSigner,
    recipient: &PublicKey,
    plaintext: &str,
    created_at: u64,
) -> RawEvent {
    let content = sender
        .nip04()
        .unwrap()
        .encrypt(recipient, plaintext)
        .await
        .unwrap();
    sender
        .sign(EventDraft {
            kind: kinds::ENCRYPTED_DM,
            content,
            tags: vec![vec!["p".to_string(), recipient.to_hex()]],
            created_at,
        })
        .await
        .unwrap()
}

/// An unsigned event with a single `p` tag, for routing tests.
pub fn raw_event(id: &str, kind: u16, author: &str, p: &str, created_at: u64) -> RawEvent {
    RawEvent {
        id: id.to_string(),
        pubkey: author.to_string(),
        created_at,
        kind,
        content: String::new(),
        tags: vec![vec!["p".to_string(), p.to_string()]],
        sig: String::new(),
    }
}

pub struct FakeRelay {
    url: String,
    events: Mutex<Vec<RawEvent>>,
    published: Mutex<Vec<RawEvent>>,
    live: broadcast::Sender<RawEvent>,
    delay: Mutex<Duration>,
    reject: AtomicBool,
    fail_queries: AtomicBool,
    queries: AtomicUsize,
}

impl FakeRelay {
    fn new(url: &str) -> Self {
        let (live, _) = broadcast::channel(256);
        Self {
            url: url.to_string(),
            events: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
            live,
            delay: Mutex::new(Duration::ZERO),
            reject: AtomicBool::new(false),
            fail_queries: AtomicBool::new(false),
            queries: AtomicUsize::new(0),
        }
    }

    /// Store an event and push it to live subscribers.
    pub fn store(&self, event: RawEvent) {
        self.events.lock().push(event.clone());
        let _ = self.live.send(event);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    pub fn set_fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<RawEvent> {
        self.published.lock().clone()
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Default)]
pub struct FakeNetwork {
    relays: Arc<Mutex<HashMap<String, Arc<FakeRelay>>>>,
    opens: Arc<Mutex<HashMap<String, usize>>>,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn relay(&self, url: &str) -> Arc<FakeRelay> {
        self.relays
            .lock()
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(FakeRelay::new(url)))
            .clone()
    }

    pub fn connector(&self) -> FakeConnector {
        FakeConnector {
            network: self.clone(),
        }
    }

    pub fn open_count(&self, url: &str) -> usize {
        self.opens.lock().get(url).copied().unwrap_or(0)
    }
}

pub struct FakeConnector {
    network: FakeNetwork,
}

impl RelayConnector for FakeConnector {
    fn open(&self, url: &str) -> Arc<dyn RelayConnection> {
        *self.network.opens.lock().entry(url.to_string()).or_insert(0) += 1;
        Arc::new(FakeConnection {
            relay: self.network.relay(url),
        })
    }
}

struct FakeConnection {
    relay: Arc<FakeRelay>,
}

#[async_trait]
impl RelayConnection for FakeConnection {
    fn url(&self) -> &str {
        &self.relay.url
    }

    async fn query(
        &self,
        filters: &[DmFilter],
        _timeout: Duration,
    ) -> Result<Vec<RawEvent>, RelayError> {
        self.relay.queries.fetch_add(1, Ordering::SeqCst);
        let delay = *self.relay.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.relay.fail_queries.load(Ordering::SeqCst) {
            return Err(RelayError::Request {
                url: self.relay.url.clone(),
                message: "query refused".to_string(),
            });
        }

        let stored = self.relay.events.lock().clone();
        let mut out = Vec::new();
        for filter in filters {
            let mut matched: Vec<RawEvent> =
                stored.iter().filter(|e| filter.matches(e)).cloned().collect();
            if let Some(limit) = filter.limit {
                matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                matched.truncate(limit);
            }
            out.extend(matched);
        }
        Ok(out)
    }

    async fn subscribe(&self, filters: &[DmFilter]) -> Result<EventStream, RelayError> {
        let rx = self.relay.live.subscribe();
        let filters = filters.to_vec();
        let stream = futures::stream::unfold((rx, filters), |(mut rx, filters)| async move {
            loop {
                match rx.recv().await {
                    Ok(event) if filters.iter().any(|f| f.matches(&event)) => {
                        return Some((event, (rx, filters)))
                    }
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn publish(&self, event: &RawEvent) -> Result<(), RelayError> {
        if self.relay.reject.load(Ordering::SeqCst) {
            return Err(RelayError::Request {
                url: self.relay.url.clone(),
                message: "blocked".to_string(),
            });
        }
        self.relay.published.lock().push(event.clone());
        self.relay.store(event.clone());
        Ok(())
    }
}

/// A durable store whose every operation fails.
pub struct BrokenStore;

impl DurableStore for BrokenStore {
    fn put(&self, _identity: &str, _events: &[RawEvent]) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("disk full".to_string()))
    }

    fn get(&self, _identity: &str) -> Result<Option<Vec<RawEvent>>, StorageError> {
        Err(StorageError::Unavailable("disk full".to_string()))
    }

    fn delete(&self, _identity: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("disk full".to_string()))
    }

    fn clear_all(&self) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("disk full".to_string()))
    }
}
