use nostr_sdk::prelude::PublicKey;

use super::engine::DmSession;
use crate::crypto::{build_nip04, OutgoingGiftWrap, SignerError, WrapError};
use crate::models::{unix_now, DecryptedMessage, FileAttachment, Protocol};
use crate::relay::RelayError;

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("{0} not supported by signer")]
    CapabilityMissing(Protocol),

    #[error("Encryption failed: {0}")]
    Encrypt(String),

    #[error("Signing failed: {0}")]
    Sign(String),

    #[error("Publish failed: {0}")]
    Publish(#[from] RelayError),

    #[error("Relay list names no relay to read from or write to")]
    EmptyRelayList,
}

impl From<WrapError> for SendError {
    fn from(e: WrapError) -> Self {
        match e {
            WrapError::CapabilityMissing(protocol) => SendError::CapabilityMissing(protocol),
            WrapError::Signer(SignerError::Sign(message)) => SendError::Sign(message),
            other => SendError::Encrypt(other.to_string()),
        }
    }
}

impl DmSession {
    /// Encrypt, sign and publish a DM to `partner` (hex or npub).
    ///
    /// Nothing is added to the conversation unless a relay accepted the event.
    /// For NIP-17 the recipient's wrap must be accepted; the copy wrapped for
    /// our own inbox is best-effort.
    pub async fn send(
        &self,
        partner: &str,
        plaintext: &str,
        protocol: Protocol,
        attachments: &[FileAttachment],
    ) -> Result<DecryptedMessage, SendError> {
        let (signer, gift_wraps) = {
            let state = self.inner.state.lock();
            let signer = state.signer.clone().ok_or(SendError::NotLoggedIn)?;
            let gift_wraps = state
                .scope
                .as_ref()
                .map(|s| s.decryptor.gift_wraps().clone());
            (signer, gift_wraps)
        };
        let epoch = self.inner.messages.lock().epoch();

        let capable = match protocol {
            Protocol::Nip04 => signer.nip04().is_some(),
            Protocol::Nip17 => signer.nip44().is_some(),
        };
        if !capable {
            return Err(SendError::CapabilityMissing(protocol));
        }

        let recipient = PublicKey::parse(partner)
            .map_err(|_| SendError::InvalidRecipient(partner.to_string()))?;
        let extra_tags: Vec<Vec<String>> = attachments
            .iter()
            .map(FileAttachment::to_imeta_tag)
            .collect();

        let mut message = match protocol {
            Protocol::Nip04 => {
                let event =
                    build_nip04(signer.as_ref(), &recipient, plaintext, &extra_tags).await?;
                self.inner.pool.publish(&event).await?;
                DecryptedMessage::new(event, plaintext.to_string())
            }
            Protocol::Nip17 => {
                let outgoing =
                    OutgoingGiftWrap::build(signer.as_ref(), &recipient, plaintext, &extra_tags)
                        .await?;
                // Our own copy will come back over the live subscription.
                if let Some(gift_wraps) = &gift_wraps {
                    gift_wraps.register(&outgoing.for_self.id);
                }

                self.inner.pool.publish(&outgoing.for_recipient).await?;
                if let Err(e) = self.inner.pool.publish(&outgoing.for_self).await {
                    tracing::warn!(error = %e, "failed to publish self-addressed gift wrap");
                }

                let mut message = DecryptedMessage::new(outgoing.rumor, plaintext.to_string());
                message.wrapper = Some(outgoing.for_self);
                message
            }
        };
        message.is_sending = true;
        message.client_first_seen = Some(unix_now());

        self.apply(epoch, vec![(recipient.to_hex(), message.clone())]);
        tracing::info!(id = %message.id(), %protocol, "message sent");
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use nostr_sdk::prelude::{Keys, ToBech32};

    use crate::config::CoreConfig;
    use crate::constants::kinds;
    use crate::crypto::{DmSigner, KeysSigner, MessageDecryptor};
    use crate::models::{RelayEntry, RelayMetadata};
    use crate::session::LoadingPhase;
    use crate::store::MemoryStore;
    use crate::testing::{signer_pair, FakeNetwork};

    const RELAY: &str = "wss://relay.test";

    fn session(network: &FakeNetwork) -> DmSession {
        let mut config = CoreConfig::new(std::env::temp_dir().join("murmur-test"));
        config.relays = RelayMetadata::new(vec![RelayEntry::read_write(RELAY)], 0);
        config.query_timeout_ms = 1_000;
        DmSession::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(network.connector()),
        )
    }

    async fn ready(session: &DmSession, signer: Arc<dyn DmSigner>) {
        session.login(signer);
        let mut rx = session.subscribe_phase();
        tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|p| *p == LoadingPhase::Ready),
        )
        .await
        .unwrap()
        .unwrap();
    }

    #[tokio::test]
    async fn test_send_without_login_is_rejected() {
        let network = FakeNetwork::new();
        let result = session(&network)
            .send("abc", "hi", Protocol::Nip04, &[])
            .await;
        assert!(matches!(result, Err(SendError::NotLoggedIn)));
    }

    #[tokio::test]
    async fn test_send_nip04_without_capability_adds_nothing() {
        let network = FakeNetwork::new();
        let session = session(&network);
        let signer = Arc::new(KeysSigner::new(Keys::generate()).without_nip04());
        ready(&session, signer).await;
        let before = session.message_count();

        let result = session.send("abc", "hi", Protocol::Nip04, &[]).await;
        assert!(matches!(
            result,
            Err(SendError::CapabilityMissing(Protocol::Nip04))
        ));
        assert_eq!(session.message_count(), before);
        assert!(network.relay(RELAY).published().is_empty());
    }

    #[tokio::test]
    async fn test_send_nip17_without_capability_adds_nothing() {
        let network = FakeNetwork::new();
        let session = session(&network);
        let (_, bob) = signer_pair();
        let signer = Arc::new(KeysSigner::new(Keys::generate()).without_nip44());
        ready(&session, signer).await;

        let result = session
            .send(&bob.public_key().to_hex(), "hi", Protocol::Nip17, &[])
            .await;
        assert!(matches!(
            result,
            Err(SendError::CapabilityMissing(Protocol::Nip17))
        ));
        assert_eq!(session.message_count(), 0);
    }

    #[tokio::test]
    async fn test_send_to_invalid_recipient() {
        let network = FakeNetwork::new();
        let session = session(&network);
        let (alice, _) = signer_pair();
        ready(&session, alice).await;

        let result = session.send("abc", "hi", Protocol::Nip04, &[]).await;
        assert!(matches!(result, Err(SendError::InvalidRecipient(_))));
        assert_eq!(session.message_count(), 0);
    }

    #[tokio::test]
    async fn test_send_nip04_publishes_and_records() {
        let network = FakeNetwork::new();
        let session = session(&network);
        let (alice, bob) = signer_pair();
        ready(&session, alice).await;

        let message = session
            .send(&bob.public_key().to_hex(), "hello", Protocol::Nip04, &[])
            .await
            .unwrap();
        assert!(message.is_sending);
        assert_eq!(message.decrypted_content, "hello");

        let published = network.relay(RELAY).published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].kind, kinds::ENCRYPTED_DM);
        assert_ne!(published[0].content, "hello");

        // The recipient can read it.
        let reader = MessageDecryptor::new(bob.clone());
        let (partner, received) = reader.decrypt(&published[0]).await.unwrap();
        assert_eq!(received.decrypted_content, "hello");
        assert_eq!(partner, session.identity().unwrap());

        let summaries = session.conversations();
        assert_eq!(summaries[0].partner_id, bob.public_key().to_hex());
        assert_eq!(summaries[0].unread_count, 0);
    }

    #[tokio::test]
    async fn test_send_nip17_echo_does_not_duplicate() {
        let network = FakeNetwork::new();
        let session = session(&network);
        let (alice, bob) = signer_pair();
        ready(&session, alice.clone()).await;

        let attachment = FileAttachment::new("https://files.test/cat.png", "image/png");
        let message = session
            .send(
                &bob.public_key().to_bech32().unwrap(),
                "sealed",
                Protocol::Nip17,
                &[attachment],
            )
            .await
            .unwrap();

        let published = network.relay(RELAY).published();
        assert_eq!(published.len(), 2);
        assert!(published.iter().all(|e| e.kind == kinds::GIFT_WRAP));
        assert!(published.iter().all(|e| e.pubkey != alice.public_key().to_hex()));
        assert_eq!(message.event.kind, kinds::PRIVATE_DM);
        assert!(message.event.tags.iter().any(|t| t[0] == "imeta"));
        assert_eq!(message.stored_form().kind, kinds::GIFT_WRAP);

        // Give the live subscription time to deliver the self-addressed echo.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(session.message_count(), 1);
        let page = session.page(&bob.public_key().to_hex(), 50);
        assert_eq!(page.messages[0].id(), message.id());
    }

    #[tokio::test]
    async fn test_rejected_publish_adds_nothing() {
        let network = FakeNetwork::new();
        network.relay(RELAY).set_reject(true);
        let session = session(&network);
        let (alice, bob) = signer_pair();
        ready(&session, alice).await;

        for protocol in [Protocol::Nip04, Protocol::Nip17] {
            let result = session
                .send(&bob.public_key().to_hex(), "hi", protocol, &[])
                .await;
            assert!(matches!(result, Err(SendError::Publish(_))));
        }
        assert_eq!(session.message_count(), 0);
    }
}
