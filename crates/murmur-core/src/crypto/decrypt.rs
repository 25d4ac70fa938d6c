use std::collections::HashSet;
use std::sync::Arc;

use nostr_sdk::prelude::*;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::signer::DmSigner;
use crate::constants::kinds;
use crate::models::{conversation_partner, unix_now, DecryptedMessage, Protocol, RawEvent};

#[derive(Debug, thiserror::Error)]
pub enum DecryptError {
    #[error("{0} not supported by signer")]
    CapabilityMissing(Protocol),

    #[error("Decryption failed: {0}")]
    Decrypt(String),

    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Unexpected kind {found}, expected {expected}")]
    WrongKind { expected: u16, found: u16 },

    #[error("Seal signature is invalid")]
    InvalidSignature,

    #[error("Rumor author does not match seal author")]
    AuthorMismatch,

    #[error("Rumor id does not match its contents")]
    IdMismatch,

    #[error("No conversation partner found")]
    NoPartner,

    #[error("Gift wrap {0} already processed")]
    AlreadyProcessed(String),
}

/// Outer-wrap ids that have already been unwrapped in this session.
#[derive(Debug, Clone, Default)]
pub struct GiftWrapIdSet {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl GiftWrapIdSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().contains(id)
    }

    /// Atomic check+insert: true only for the first caller with this id.
    pub fn register(&self, id: &str) -> bool {
        self.inner.lock().insert(id.to_string())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Unsigned rumor as serialized inside a seal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RumorPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl From<&RawEvent> for RumorPayload {
    fn from(event: &RawEvent) -> Self {
        Self {
            id: Some(event.id.clone()),
            pubkey: event.pubkey.clone(),
            created_at: event.created_at,
            kind: event.kind,
            tags: event.tags.clone(),
            content: event.content.clone(),
        }
    }
}

/// Decrypts incoming DMs for one identity.
///
/// NIP-04 failures are fail-soft (the message survives with an error annotation);
/// NIP-17 failures are fail-closed (the event is dropped).
#[derive(Clone)]
pub struct MessageDecryptor {
    signer: Arc<dyn DmSigner>,
    me: String,
    gift_wraps: GiftWrapIdSet,
}

impl MessageDecryptor {
    pub fn new(signer: Arc<dyn DmSigner>) -> Self {
        let me = signer.public_key().to_hex();
        Self {
            signer,
            me,
            gift_wraps: GiftWrapIdSet::new(),
        }
    }

    pub fn me(&self) -> &str {
        &self.me
    }

    pub fn signer(&self) -> &Arc<dyn DmSigner> {
        &self.signer
    }

    pub fn gift_wraps(&self) -> &GiftWrapIdSet {
        &self.gift_wraps
    }

    /// Decrypt any supported DM event, returning the conversation partner with it.
    pub async fn decrypt(&self, event: &RawEvent) -> Option<(String, DecryptedMessage)> {
        match event.kind {
            kinds::ENCRYPTED_DM => {
                let partner = conversation_partner(event, &self.me)?;
                Some((partner, self.decrypt_nip04(event).await))
            }
            kinds::GIFT_WRAP => {
                let message = self.decrypt_nip17(event).await?;
                let partner = conversation_partner(&message.event, &self.me)?;
                Some((partner, message))
            }
            _ => None,
        }
    }

    /// Legacy decrypt. Never fails: errors end up in `DecryptedMessage::error`.
    pub async fn decrypt_nip04(&self, event: &RawEvent) -> DecryptedMessage {
        let (decrypted_content, error) = match self.try_decrypt_nip04(event).await {
            Ok(plaintext) => (plaintext, None),
            Err(e) => {
                tracing::debug!(id = %event.id, "nip04 decrypt failed: {}", e);
                (String::new(), Some(e.to_string()))
            }
        };

        DecryptedMessage {
            event: event.clone(),
            wrapper: None,
            decrypted_content,
            error,
            is_sending: false,
            client_first_seen: Some(unix_now()),
        }
    }

    async fn try_decrypt_nip04(&self, event: &RawEvent) -> Result<String, DecryptError> {
        let cipher = self
            .signer
            .nip04()
            .ok_or(DecryptError::CapabilityMissing(Protocol::Nip04))?;
        let partner = conversation_partner(event, &self.me).ok_or(DecryptError::NoPartner)?;
        let partner =
            PublicKey::parse(&partner).map_err(|e| DecryptError::Malformed(e.to_string()))?;

        cipher
            .decrypt(&partner, &event.content)
            .await
            .map_err(|e| DecryptError::Decrypt(e.to_string()))
    }

    /// Gift-wrap decrypt. Any structural problem discards the event.
    pub async fn decrypt_nip17(&self, wrap: &RawEvent) -> Option<DecryptedMessage> {
        match self.unwrap_gift(wrap).await {
            Ok(message) => Some(message),
            Err(DecryptError::AlreadyProcessed(_)) => None,
            Err(e) => {
                tracing::debug!(id = %wrap.id, "discarding gift wrap: {}", e);
                None
            }
        }
    }

    /// wrap → seal → rumor. The wrap id is registered only once every stage succeeded.
    pub async fn unwrap_gift(&self, wrap: &RawEvent) -> Result<DecryptedMessage, DecryptError> {
        if self.gift_wraps.contains(&wrap.id) {
            return Err(DecryptError::AlreadyProcessed(wrap.id.clone()));
        }

        let seal = self.open_wrap(wrap).await?;
        let rumor = self.open_seal(&seal).await?;
        conversation_partner(&rumor, &self.me).ok_or(DecryptError::NoPartner)?;

        if !self.gift_wraps.register(&wrap.id) {
            return Err(DecryptError::AlreadyProcessed(wrap.id.clone()));
        }

        Ok(DecryptedMessage {
            decrypted_content: rumor.content.clone(),
            event: rumor,
            wrapper: Some(wrap.clone()),
            error: None,
            is_sending: false,
            client_first_seen: Some(unix_now()),
        })
    }

    async fn open_wrap(&self, wrap: &RawEvent) -> Result<RawEvent, DecryptError> {
        expect_kind(wrap.kind, kinds::GIFT_WRAP)?;
        let seal_json = self.nip44_decrypt(&wrap.pubkey, &wrap.content).await?;

        let seal: Event = serde_json::from_str(&seal_json)
            .map_err(|e| DecryptError::Malformed(e.to_string()))?;
        expect_kind(seal.kind.as_u16(), kinds::SEAL)?;
        seal.verify().map_err(|_| DecryptError::InvalidSignature)?;

        RawEvent::from_nostr(&seal).map_err(|e| DecryptError::Malformed(e.to_string()))
    }

    async fn open_seal(&self, seal: &RawEvent) -> Result<RawEvent, DecryptError> {
        let rumor_json = self.nip44_decrypt(&seal.pubkey, &seal.content).await?;

        let payload: RumorPayload = serde_json::from_str(&rumor_json)
            .map_err(|e| DecryptError::Malformed(e.to_string()))?;
        expect_kind(payload.kind, kinds::PRIVATE_DM)?;
        if payload.pubkey != seal.pubkey {
            return Err(DecryptError::AuthorMismatch);
        }

        let mut rumor = RawEvent {
            id: String::new(),
            pubkey: payload.pubkey,
            created_at: payload.created_at,
            kind: payload.kind,
            content: payload.content,
            tags: payload.tags,
            sig: String::new(),
        };
        rumor.id = rumor.computed_id();
        if payload.id.is_some_and(|id| id != rumor.id) {
            return Err(DecryptError::IdMismatch);
        }
        Ok(rumor)
    }

    async fn nip44_decrypt(&self, author: &str, ciphertext: &str) -> Result<String, DecryptError> {
        let cipher = self
            .signer
            .nip44()
            .ok_or(DecryptError::CapabilityMissing(Protocol::Nip17))?;
        let author =
            PublicKey::parse(author).map_err(|e| DecryptError::Malformed(e.to_string()))?;
        cipher
            .decrypt(&author, ciphertext)
            .await
            .map_err(|e| DecryptError::Decrypt(e.to_string()))
    }
}

fn expect_kind(found: u16, expected: u16) -> Result<(), DecryptError> {
    if found == expected {
        Ok(())
    } else {
        Err(DecryptError::WrongKind { expected, found })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::signer::{EventDraft, KeysSigner};
    use crate::crypto::wrap::{build_rumor, gift_wrap, seal_rumor, wrap_seal};
    use crate::testing::{legacy_dm, signer_pair};

    #[tokio::test]
    async fn test_nip04_decrypts_received_and_sent() {
        let (alice, bob) = signer_pair();
        let event = legacy_dm(&alice, &bob.public_key(), "hi bob", 100).await;

        let bob_side = MessageDecryptor::new(bob.clone());
        let (partner, message) = bob_side.decrypt(&event).await.unwrap();
        assert_eq!(partner, alice.public_key().to_hex());
        assert_eq!(message.decrypted_content, "hi bob");
        assert!(message.error.is_none());

        let alice_side = MessageDecryptor::new(alice.clone());
        let (partner, message) = alice_side.decrypt(&event).await.unwrap();
        assert_eq!(partner, bob.public_key().to_hex());
        assert_eq!(message.decrypted_content, "hi bob");
    }

    #[tokio::test]
    async fn test_nip04_failure_is_fail_soft() {
        let (alice, bob) = signer_pair();
        let mut event = legacy_dm(&alice, &bob.public_key(), "hi bob", 100).await;
        event.content = "not-a-ciphertext".to_string();

        let message = MessageDecryptor::new(bob).decrypt_nip04(&event).await;
        assert!(message.decrypted_content.is_empty());
        assert!(message.error.as_deref().is_some_and(|e| !e.is_empty()));
        assert_eq!(message.id(), event.id);
    }

    #[tokio::test]
    async fn test_nip04_without_capability_is_annotated() {
        let (alice, bob) = signer_pair();
        let event = legacy_dm(&alice, &bob.public_key(), "hi", 100).await;
        let bob_without_nip04 = Arc::new(
            KeysSigner::new(Keys::generate()).without_nip04(),
        );

        let message = MessageDecryptor::new(bob_without_nip04)
            .decrypt_nip04(&event)
            .await;
        assert_eq!(message.error.as_deref(), Some("nip04 not supported by signer"));
        assert!(message.decrypted_content.is_empty());
    }

    #[tokio::test]
    async fn test_gift_wrap_unwraps_to_rumor() {
        let (alice, bob) = signer_pair();
        let rumor = build_rumor(&alice.public_key(), &bob.public_key(), "sealed hello", &[], 500);
        let wrap = gift_wrap(alice.as_ref(), &bob.public_key(), &rumor).await.unwrap();

        let decryptor = MessageDecryptor::new(bob);
        let (partner, message) = decryptor.decrypt(&wrap).await.unwrap();
        assert_eq!(partner, alice.public_key().to_hex());
        assert_eq!(message.decrypted_content, "sealed hello");
        assert_eq!(message.id(), rumor.id);
        assert_eq!(message.created_at(), 500);
        assert_eq!(message.wrapper.as_ref(), Some(&wrap));
        assert!(decryptor.gift_wraps().contains(&wrap.id));
    }

    #[tokio::test]
    async fn test_same_gift_wrap_is_processed_once() {
        let (alice, bob) = signer_pair();
        let rumor = build_rumor(&alice.public_key(), &bob.public_key(), "once", &[], 500);
        let wrap = gift_wrap(alice.as_ref(), &bob.public_key(), &rumor).await.unwrap();

        let decryptor = MessageDecryptor::new(bob);
        assert!(decryptor.decrypt_nip17(&wrap).await.is_some());
        assert!(decryptor.decrypt_nip17(&wrap).await.is_none());
        assert_eq!(decryptor.gift_wraps().len(), 1);
    }

    #[tokio::test]
    async fn test_wrong_seal_kind_is_discarded() {
        let (alice, bob) = signer_pair();
        let rumor = build_rumor(&alice.public_key(), &bob.public_key(), "x", &[], 500);
        let rumor_json = serde_json::to_string(&RumorPayload::from(&rumor)).unwrap();
        let content = alice
            .nip44()
            .unwrap()
            .encrypt(&bob.public_key(), &rumor_json)
            .await
            .unwrap();
        // Signed like a seal, but kind 1
        let fake_seal = alice
            .sign(EventDraft {
                kind: 1,
                content,
                tags: Vec::new(),
                created_at: 500,
            })
            .await
            .unwrap();
        let wrap = wrap_seal(&fake_seal, &bob.public_key()).unwrap();

        let decryptor = MessageDecryptor::new(bob);
        let result = decryptor.unwrap_gift(&wrap).await;
        assert!(matches!(
            result,
            Err(DecryptError::WrongKind { expected: 13, found: 1 })
        ));
        assert!(decryptor.decrypt_nip17(&wrap).await.is_none());
        assert!(!decryptor.gift_wraps().contains(&wrap.id));
    }

    #[tokio::test]
    async fn test_rumor_author_must_match_seal_author() {
        let (alice, bob) = signer_pair();
        let mallory = Arc::new(KeysSigner::new(Keys::generate()));
        // Mallory seals a rumor that claims Alice wrote it
        let rumor = build_rumor(&alice.public_key(), &bob.public_key(), "forged", &[], 500);
        let seal = seal_rumor(mallory.as_ref(), &bob.public_key(), &rumor).await.unwrap();
        let wrap = wrap_seal(&seal, &bob.public_key()).unwrap();

        let result = MessageDecryptor::new(bob).unwrap_gift(&wrap).await;
        assert!(matches!(result, Err(DecryptError::AuthorMismatch)));
    }

    #[tokio::test]
    async fn test_wrong_rumor_kind_is_discarded() {
        let (alice, bob) = signer_pair();
        let mut rumor = build_rumor(&alice.public_key(), &bob.public_key(), "x", &[], 500);
        rumor.kind = 1;
        rumor.id = rumor.computed_id();
        let seal = seal_rumor(alice.as_ref(), &bob.public_key(), &rumor).await.unwrap();
        let wrap = wrap_seal(&seal, &bob.public_key()).unwrap();

        let decryptor = MessageDecryptor::new(bob);
        assert!(matches!(
            decryptor.unwrap_gift(&wrap).await,
            Err(DecryptError::WrongKind { expected: 14, found: 1 })
        ));
        assert!(decryptor.decrypt_nip17(&wrap).await.is_none());
        assert!(!decryptor.gift_wraps().contains(&wrap.id));
    }

    #[tokio::test]
    async fn test_rumor_with_forged_id_is_discarded() {
        let (alice, bob) = signer_pair();
        let mut rumor = build_rumor(&alice.public_key(), &bob.public_key(), "x", &[], 500);
        rumor.id = "f".repeat(64);
        let seal = seal_rumor(alice.as_ref(), &bob.public_key(), &rumor).await.unwrap();
        let wrap = wrap_seal(&seal, &bob.public_key()).unwrap();

        let decryptor = MessageDecryptor::new(bob);
        assert!(matches!(
            decryptor.unwrap_gift(&wrap).await,
            Err(DecryptError::IdMismatch)
        ));
        assert!(decryptor.decrypt_nip17(&wrap).await.is_none());
        assert!(!decryptor.gift_wraps().contains(&wrap.id));
    }

    #[tokio::test]
    async fn test_seal_with_bad_signature_is_discarded() {
        let (alice, bob) = signer_pair();
        let rumor = build_rumor(&alice.public_key(), &bob.public_key(), "x", &[], 500);
        let mut seal = seal_rumor(alice.as_ref(), &bob.public_key(), &rumor).await.unwrap();
        // Flip one nibble of the signature; it still parses but no longer verifies
        let last = seal.sig.pop().unwrap();
        seal.sig.push(if last == '0' { '1' } else { '0' });
        let wrap = wrap_seal(&seal, &bob.public_key()).unwrap();

        let decryptor = MessageDecryptor::new(bob);
        assert!(matches!(
            decryptor.unwrap_gift(&wrap).await,
            Err(DecryptError::InvalidSignature)
        ));
        assert!(decryptor.decrypt_nip17(&wrap).await.is_none());
        assert!(!decryptor.gift_wraps().contains(&wrap.id));
    }

    #[tokio::test]
    async fn test_gift_wrap_for_someone_else_is_discarded() {
        let (alice, bob) = signer_pair();
        let carol = Arc::new(KeysSigner::new(Keys::generate()));
        let rumor = build_rumor(&alice.public_key(), &bob.public_key(), "for bob", &[], 500);
        let wrap = gift_wrap(alice.as_ref(), &bob.public_key(), &rumor).await.unwrap();

        let result = MessageDecryptor::new(carol).unwrap_gift(&wrap).await;
        assert!(matches!(result, Err(DecryptError::Decrypt(_))));
    }

    #[tokio::test]
    async fn test_non_dm_kinds_are_ignored() {
        let (alice, bob) = signer_pair();
        let mut event = legacy_dm(&alice, &bob.public_key(), "hi", 100).await;
        event.kind = 1;
        assert!(MessageDecryptor::new(bob).decrypt(&event).await.is_none());
    }
}
