//! NIP-65 relay list: adopt the identity's published list, and publish edits.

use std::sync::Arc;

use tokio::sync::watch;

use super::engine::DmSession;
use super::send::SendError;
use crate::constants::{kinds, RELAY_LIST_QUERY_TIMEOUT};
use crate::crypto::EventDraft;
use crate::models::{unix_now, RelayEntry, RelayMetadata};
use crate::relay::{DmFilter, RelayPool};

/// Best-effort lookup of the newest relay list authored by `me`, proposed to
/// the pool as a last-writer-wins replacement.
pub(super) async fn sync_relay_list(
    pool: Arc<RelayPool>,
    me: String,
    mut cancel: watch::Receiver<bool>,
) {
    let filter = DmFilter::new()
        .kind(kinds::RELAY_LIST)
        .author(me.clone())
        .limit(1);

    let result = tokio::select! {
        _ = cancel.wait_for(|c| *c) => return,
        result = tokio::time::timeout(
            RELAY_LIST_QUERY_TIMEOUT,
            pool.query(std::slice::from_ref(&filter), RELAY_LIST_QUERY_TIMEOUT),
        ) => result,
    };

    let events = match result {
        Ok(Ok(events)) => events,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "relay list lookup failed");
            return;
        }
        Err(_) => {
            tracing::debug!("relay list lookup timed out");
            return;
        }
    };

    let Some(newest) = events
        .iter()
        .filter(|e| e.kind == kinds::RELAY_LIST && e.pubkey == me)
        .max_by_key(|e| e.created_at)
    else {
        return;
    };

    match RelayMetadata::from_relay_list(newest) {
        Some(candidate) => {
            if !pool.propose_metadata(candidate) {
                tracing::debug!("published relay list is not newer than local metadata");
            }
        }
        None => tracing::debug!("published relay list names no relays"),
    }
}

impl DmSession {
    /// Sign and publish `relays` as the identity's relay list, then adopt it
    /// locally. The announcement goes out over the current write relays.
    pub async fn publish_relay_list(
        &self,
        relays: Vec<RelayEntry>,
    ) -> Result<RelayMetadata, SendError> {
        let signer = self.signer().ok_or(SendError::NotLoggedIn)?;
        let relays: Vec<RelayEntry> = relays.into_iter().filter(RelayEntry::is_used).collect();
        if relays.is_empty() {
            return Err(SendError::EmptyRelayList);
        }

        // created_at doubles as updated_at and must beat the stored value.
        let created_at = unix_now().max(self.relay_metadata().updated_at + 1);
        let proposed = RelayMetadata::new(relays, created_at);

        let event = signer
            .sign(EventDraft {
                kind: kinds::RELAY_LIST,
                content: String::new(),
                tags: proposed.to_tags(),
                created_at,
            })
            .await
            .map_err(|e| SendError::Sign(e.to_string()))?;

        self.inner.pool.publish(&event).await?;
        self.propose_relay_metadata(proposed.clone());
        tracing::info!(relays = proposed.relays.len(), "relay list published");
        Ok(proposed)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::CoreConfig;
    use crate::constants::kinds;
    use crate::models::{RelayEntry, RelayMetadata};
    use crate::session::{DmSession, SendError};
    use crate::store::MemoryStore;
    use crate::testing::{signer_pair, FakeNetwork};
    use std::sync::Arc;

    fn session(network: &FakeNetwork) -> DmSession {
        let mut config = CoreConfig::new(std::env::temp_dir().join("murmur-test"));
        config.relays = RelayMetadata::new(vec![RelayEntry::read_write("wss://old.test")], 0);
        config.query_timeout_ms = 1_000;
        DmSession::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(network.connector()),
        )
    }

    #[tokio::test]
    async fn test_publish_relay_list_requires_identity() {
        let network = FakeNetwork::new();
        let result = session(&network)
            .publish_relay_list(vec![RelayEntry::read_write("wss://new.test")])
            .await;
        assert!(matches!(result, Err(SendError::NotLoggedIn)));
    }

    #[tokio::test]
    async fn test_publish_relay_list_drops_unused_entries() {
        let network = FakeNetwork::new();
        let (alice, _) = signer_pair();
        let session = session(&network);
        session.login(alice.clone());

        let off = RelayEntry {
            url: "wss://off.test".to_string(),
            read: false,
            write: false,
        };
        let adopted = session
            .publish_relay_list(vec![RelayEntry::read_write("wss://new.test"), off.clone()])
            .await
            .unwrap();
        assert_eq!(adopted.relays, vec![RelayEntry::read_write("wss://new.test")]);

        // What a later fetch would read back matches what was adopted.
        let published = network
            .relay("wss://old.test")
            .published()
            .into_iter()
            .find(|e| e.kind == kinds::RELAY_LIST)
            .unwrap();
        assert_eq!(RelayMetadata::from_relay_list(&published), Some(adopted));

        let result = session.publish_relay_list(vec![off]).await;
        assert!(matches!(result, Err(SendError::EmptyRelayList)));
    }

    #[tokio::test]
    async fn test_publish_relay_list_announces_and_adopts() {
        let network = FakeNetwork::new();
        let (alice, _) = signer_pair();
        let session = session(&network);
        session.login(alice.clone());

        let adopted = session
            .publish_relay_list(vec![
                RelayEntry::read_write("wss://new.test"),
                RelayEntry {
                    url: "wss://inbox.test".to_string(),
                    read: true,
                    write: false,
                },
            ])
            .await
            .unwrap();

        let published: Vec<_> = network
            .relay("wss://old.test")
            .published()
            .into_iter()
            .filter(|e| e.kind == kinds::RELAY_LIST)
            .collect();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].created_at, adopted.updated_at);
        assert_eq!(
            published[0].tags[1],
            vec!["r".to_string(), "wss://inbox.test".to_string(), "read".to_string()]
        );
        assert_eq!(session.relay_metadata(), adopted);

        // A second edit in the same second still wins.
        let again = session
            .publish_relay_list(vec![RelayEntry::read_write("wss://third.test")])
            .await
            .unwrap();
        assert!(again.updated_at > adopted.updated_at);
        assert_eq!(session.relay_metadata().relays[0].url, "wss://third.test");
    }
}
