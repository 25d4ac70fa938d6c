use std::borrow::Cow;

use async_trait::async_trait;
use nostr_sdk::nips::{nip04, nip44};
use nostr_sdk::prelude::*;

use crate::models::RawEvent;

#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("Encryption failed: {0}")]
    Encrypt(String),

    #[error("Decryption failed: {0}")]
    Decrypt(String),

    #[error("Signing failed: {0}")]
    Sign(String),
}

/// An encrypt/decrypt primitive keyed by the counterparty's public key.
#[async_trait]
pub trait Cipher: Send + Sync {
    async fn encrypt(&self, counterparty: &PublicKey, plaintext: &str)
        -> Result<String, SignerError>;

    async fn decrypt(
        &self,
        counterparty: &PublicKey,
        ciphertext: &str,
    ) -> Result<String, SignerError>;
}

/// Unsigned event fields handed to a signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDraft {
    pub kind: u16,
    pub content: String,
    pub tags: Vec<Vec<String>>,
    pub created_at: u64,
}

/// The identity capability. Either primitive may be missing; callers ask on every use.
#[async_trait]
pub trait DmSigner: Send + Sync {
    fn public_key(&self) -> PublicKey;

    /// Legacy NIP-04 primitive.
    fn nip04(&self) -> Option<&dyn Cipher>;

    /// NIP-44 primitive used by seals and gift wraps.
    fn nip44(&self) -> Option<&dyn Cipher>;

    async fn sign(&self, draft: EventDraft) -> Result<RawEvent, SignerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scheme {
    Nip04,
    Nip44,
}

struct KeysCipher {
    keys: Keys,
    scheme: Scheme,
}

#[async_trait]
impl Cipher for KeysCipher {
    async fn encrypt(
        &self,
        counterparty: &PublicKey,
        plaintext: &str,
    ) -> Result<String, SignerError> {
        let result = match self.scheme {
            Scheme::Nip04 => nip04::encrypt(self.keys.secret_key(), counterparty, plaintext)
                .map_err(|e| e.to_string()),
            Scheme::Nip44 => nip44::encrypt(
                self.keys.secret_key(),
                counterparty,
                plaintext,
                nip44::Version::V2,
            )
            .map_err(|e| e.to_string()),
        };
        result.map_err(SignerError::Encrypt)
    }

    async fn decrypt(
        &self,
        counterparty: &PublicKey,
        ciphertext: &str,
    ) -> Result<String, SignerError> {
        let result = match self.scheme {
            Scheme::Nip04 => nip04::decrypt(self.keys.secret_key(), counterparty, ciphertext)
                .map_err(|e| e.to_string()),
            Scheme::Nip44 => nip44::decrypt(self.keys.secret_key(), counterparty, ciphertext)
                .map_err(|e| e.to_string()),
        };
        result.map_err(SignerError::Decrypt)
    }
}

/// Local-key signer. Both primitives are enabled unless switched off.
pub struct KeysSigner {
    keys: Keys,
    nip04: Option<KeysCipher>,
    nip44: Option<KeysCipher>,
}

impl KeysSigner {
    pub fn new(keys: Keys) -> Self {
        Self {
            nip04: Some(KeysCipher {
                keys: keys.clone(),
                scheme: Scheme::Nip04,
            }),
            nip44: Some(KeysCipher {
                keys: keys.clone(),
                scheme: Scheme::Nip44,
            }),
            keys,
        }
    }

    pub fn without_nip04(mut self) -> Self {
        self.nip04 = None;
        self
    }

    pub fn without_nip44(mut self) -> Self {
        self.nip44 = None;
        self
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }
}

/// Convert `["name", values…]` rows into SDK tags.
pub(crate) fn to_sdk_tags(tags: &[Vec<String>]) -> Vec<Tag> {
    tags.iter()
        .filter_map(|row| {
            let (name, values) = row.split_first()?;
            Some(Tag::custom(
                TagKind::Custom(Cow::Owned(name.clone())),
                values.to_vec(),
            ))
        })
        .collect()
}

#[async_trait]
impl DmSigner for KeysSigner {
    fn public_key(&self) -> PublicKey {
        self.keys.public_key()
    }

    fn nip04(&self) -> Option<&dyn Cipher> {
        self.nip04.as_ref().map(|c| c as &dyn Cipher)
    }

    fn nip44(&self) -> Option<&dyn Cipher> {
        self.nip44.as_ref().map(|c| c as &dyn Cipher)
    }

    async fn sign(&self, draft: EventDraft) -> Result<RawEvent, SignerError> {
        let event = EventBuilder::new(Kind::from(draft.kind), draft.content)
            .tags(to_sdk_tags(&draft.tags))
            .custom_created_at(Timestamp::from(draft.created_at))
            .sign_with_keys(&self.keys)
            .map_err(|e| SignerError::Sign(e.to_string()))?;
        RawEvent::from_nostr(&event).map_err(|e| SignerError::Sign(e.to_string()))
    }
}
