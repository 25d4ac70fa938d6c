use nostr_sdk::nips::nip44;
use nostr_sdk::prelude::*;

use super::decrypt::RumorPayload;
use super::signer::{DmSigner, EventDraft, SignerError};
use crate::constants::{kinds, GIFT_WRAP_TIMESTAMP_JITTER_SECS};
use crate::models::{compute_event_id, unix_now, Protocol, RawEvent};

#[derive(Debug, thiserror::Error)]
pub enum WrapError {
    #[error("{0} not supported by signer")]
    CapabilityMissing(Protocol),

    #[error(transparent)]
    Signer(#[from] SignerError),

    #[error("Gift wrap failed: {0}")]
    Wrap(String),

    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

fn p_tag(recipient: &PublicKey) -> Vec<String> {
    vec!["p".to_string(), recipient.to_hex()]
}

fn jittered_timestamp() -> Timestamp {
    Timestamp::tweaked(0..GIFT_WRAP_TIMESTAMP_JITTER_SECS)
}

/// Signed kind 4 event carrying `content` encrypted for `recipient`.
pub async fn build_nip04(
    signer: &dyn DmSigner,
    recipient: &PublicKey,
    content: &str,
    extra_tags: &[Vec<String>],
) -> Result<RawEvent, WrapError> {
    let cipher = signer
        .nip04()
        .ok_or(WrapError::CapabilityMissing(Protocol::Nip04))?;
    let ciphertext = cipher.encrypt(recipient, content).await?;

    let mut tags = vec![p_tag(recipient)];
    tags.extend(extra_tags.iter().cloned());

    let event = signer
        .sign(EventDraft {
            kind: kinds::ENCRYPTED_DM,
            content: ciphertext,
            tags,
            created_at: unix_now(),
        })
        .await?;
    Ok(event)
}

/// Unsigned kind 14 rumor with its id filled in.
pub fn build_rumor(
    author: &PublicKey,
    recipient: &PublicKey,
    content: &str,
    extra_tags: &[Vec<String>],
    created_at: u64,
) -> RawEvent {
    let pubkey = author.to_hex();
    let mut tags = vec![p_tag(recipient)];
    tags.extend(extra_tags.iter().cloned());
    let id = compute_event_id(&pubkey, created_at, kinds::PRIVATE_DM, &tags, content);

    RawEvent {
        id,
        pubkey,
        created_at,
        kind: kinds::PRIVATE_DM,
        content: content.to_string(),
        tags,
        sig: String::new(),
    }
}

/// Kind 13 seal: the rumor encrypted to `addressee`, signed by the author.
pub async fn seal_rumor(
    signer: &dyn DmSigner,
    addressee: &PublicKey,
    rumor: &RawEvent,
) -> Result<RawEvent, WrapError> {
    let cipher = signer
        .nip44()
        .ok_or(WrapError::CapabilityMissing(Protocol::Nip17))?;
    let rumor_json = serde_json::to_string(&RumorPayload::from(rumor))?;
    let content = cipher.encrypt(addressee, &rumor_json).await?;

    let seal = signer
        .sign(EventDraft {
            kind: kinds::SEAL,
            content,
            tags: Vec::new(),
            created_at: jittered_timestamp().as_u64(),
        })
        .await?;
    Ok(seal)
}

/// Kind 1059 wrap around a seal, signed by a throwaway key.
pub fn wrap_seal(seal: &RawEvent, addressee: &PublicKey) -> Result<RawEvent, WrapError> {
    let ephemeral = Keys::generate();
    let seal_json = serde_json::to_string(seal)?;
    let ciphertext = nip44::encrypt(
        ephemeral.secret_key(),
        addressee,
        seal_json,
        nip44::Version::V2,
    )
    .map_err(|e| WrapError::Wrap(e.to_string()))?;

    let wrap = EventBuilder::new(Kind::GiftWrap, ciphertext)
        .tag(Tag::public_key(*addressee))
        .custom_created_at(jittered_timestamp())
        .sign_with_keys(&ephemeral)
        .map_err(|e| WrapError::Wrap(e.to_string()))?;
    Ok(RawEvent::from_nostr(&wrap)?)
}

pub async fn gift_wrap(
    signer: &dyn DmSigner,
    addressee: &PublicKey,
    rumor: &RawEvent,
) -> Result<RawEvent, WrapError> {
    let seal = seal_rumor(signer, addressee, rumor).await?;
    wrap_seal(&seal, addressee)
}

/// A NIP-17 message wrapped twice: once for the recipient, once for the author's own inbox.
#[derive(Debug, Clone)]
pub struct OutgoingGiftWrap {
    pub rumor: RawEvent,
    pub for_recipient: RawEvent,
    pub for_self: RawEvent,
}

impl OutgoingGiftWrap {
    pub async fn build(
        signer: &dyn DmSigner,
        recipient: &PublicKey,
        content: &str,
        extra_tags: &[Vec<String>],
    ) -> Result<Self, WrapError> {
        if signer.nip44().is_none() {
            return Err(WrapError::CapabilityMissing(Protocol::Nip17));
        }

        let me = signer.public_key();
        let rumor = build_rumor(&me, recipient, content, extra_tags, unix_now());
        let for_recipient = gift_wrap(signer, recipient, &rumor).await?;
        let for_self = gift_wrap(signer, &me, &rumor).await?;

        Ok(Self {
            rumor,
            for_recipient,
            for_self,
        })
    }
}
