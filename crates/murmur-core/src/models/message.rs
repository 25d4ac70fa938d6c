use std::fmt;
use std::str::FromStr;

use nostr_sdk::Event;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::constants::kinds;

/// A signed Nostr event exactly as it travels on the wire (NIP-01 JSON).
///
/// Rumors are unsigned, so `sig` defaults to empty when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub content: String,
    pub tags: Vec<Vec<String>>,
    #[serde(default)]
    pub sig: String,
}

impl RawEvent {
    pub fn from_nostr(event: &Event) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::to_value(event)?)
    }

    pub fn to_nostr(&self) -> Result<Event, serde_json::Error> {
        serde_json::from_value(serde_json::to_value(self)?)
    }

    /// First value of the first tag named `name`.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().map(String::as_str) == Some(name))
            .and_then(|t| t.get(1))
            .map(String::as_str)
    }

    /// Recipient named by the `p` tag.
    pub fn recipient(&self) -> Option<&str> {
        self.tag_value("p").filter(|v| !v.is_empty())
    }

    pub fn protocol(&self) -> Option<Protocol> {
        match self.kind {
            kinds::ENCRYPTED_DM => Some(Protocol::Nip04),
            kinds::GIFT_WRAP | kinds::PRIVATE_DM => Some(Protocol::Nip17),
            _ => None,
        }
    }

    /// Recompute the NIP-01 id from the event's fields.
    pub fn computed_id(&self) -> String {
        compute_event_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )
    }
}

/// NIP-01 event id: sha256 of `[0, pubkey, created_at, kind, tags, content]`.
pub fn compute_event_id(
    pubkey: &str,
    created_at: u64,
    kind: u16,
    tags: &[Vec<String>],
    content: &str,
) -> String {
    let canonical = serde_json::json!([0, pubkey, created_at, kind, tags, content]);
    let digest = Sha256::digest(canonical.to_string().as_bytes());
    hex::encode(digest)
}

/// The other participant of a DM: the recipient when `me` authored it, else the author.
pub fn conversation_partner(event: &RawEvent, me: &str) -> Option<String> {
    let recipient = event.recipient()?;
    if event.pubkey == me {
        Some(recipient.to_string())
    } else {
        Some(event.pubkey.clone())
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// The two mutually incompatible DM encryption schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Legacy single-layer scheme (kind 4). Leaks sender and recipient.
    Nip04,
    /// Gift wrap → seal → rumor (kinds 1059 → 13 → 14).
    Nip17,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Nip04 => write!(f, "nip04"),
            Protocol::Nip17 => write!(f, "nip17"),
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nip04" | "legacy" => Ok(Protocol::Nip04),
            "nip17" | "giftwrap" | "gift-wrap" => Ok(Protocol::Nip17),
            other => Err(format!("Unknown protocol: {}", other)),
        }
    }
}

/// A DM ready for display.
///
/// `event` is what the user sees: the kind 4 event itself, or the unwrapped rumor.
/// `wrapper` holds the outer gift wrap so the message can be persisted as ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptedMessage {
    pub event: RawEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrapper: Option<RawEvent>,
    pub decrypted_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Published by this session and not read back from a relay.
    #[serde(default)]
    pub is_sending: bool,
    /// Local receipt time, distinct from the protocol `created_at`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_first_seen: Option<u64>,
}

impl DecryptedMessage {
    pub fn new(event: RawEvent, decrypted_content: String) -> Self {
        Self {
            event,
            wrapper: None,
            decrypted_content,
            error: None,
            is_sending: false,
            client_first_seen: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.event.id
    }

    pub fn created_at(&self) -> u64 {
        self.event.created_at
    }

    pub fn author(&self) -> &str {
        &self.event.pubkey
    }

    pub fn protocol(&self) -> Protocol {
        if self.wrapper.is_some() || self.event.kind == kinds::PRIVATE_DM {
            Protocol::Nip17
        } else {
            Protocol::Nip04
        }
    }

    /// The ciphertext event this message was derived from.
    pub fn stored_form(&self) -> &RawEvent {
        self.wrapper.as_ref().unwrap_or(&self.event)
    }

    pub fn is_unreadable(&self) -> bool {
        self.error.is_some()
    }
}
