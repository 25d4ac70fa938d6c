use serde::{Deserialize, Serialize};

use super::message::RawEvent;
use crate::constants::kinds;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelayEntry {
    pub url: String,
    pub read: bool,
    pub write: bool,
}

impl RelayEntry {
    pub fn read_write(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            read: true,
            write: true,
        }
    }

    /// False for an entry flagged neither read nor write.
    pub fn is_used(&self) -> bool {
        self.read || self.write
    }

    /// NIP-65 `r` tag. The marker is omitted when the relay is used both ways.
    pub fn to_tag(&self) -> Vec<String> {
        let mut tag = vec!["r".to_string(), self.url.clone()];
        match (self.read, self.write) {
            (true, false) => tag.push("read".to_string()),
            (false, true) => tag.push("write".to_string()),
            _ => {}
        }
        tag
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayAccess {
    Read,
    Write,
}

/// The user's relay set with per-relay read/write flags.
///
/// `updated_at` only moves forward: see [`RelayMetadata::propose`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayMetadata {
    pub relays: Vec<RelayEntry>,
    pub updated_at: u64,
}

impl RelayMetadata {
    pub fn new(relays: Vec<RelayEntry>, updated_at: u64) -> Self {
        let mut metadata = Self {
            relays: Vec::with_capacity(relays.len()),
            updated_at,
        };
        for relay in relays {
            if !metadata.relays.iter().any(|r| r.url == relay.url) {
                metadata.relays.push(relay);
            }
        }
        metadata
    }

    /// Last-writer-wins replacement. Returns true when `candidate` was adopted.
    pub fn propose(&mut self, candidate: RelayMetadata) -> bool {
        if candidate.updated_at <= self.updated_at {
            return false;
        }
        *self = candidate;
        true
    }

    /// Relays flagged for `access`, or every relay when none is flagged.
    pub fn targets(&self, access: RelayAccess) -> Vec<String> {
        let flagged: Vec<String> = self
            .relays
            .iter()
            .filter(|r| match access {
                RelayAccess::Read => r.read,
                RelayAccess::Write => r.write,
            })
            .map(|r| r.url.clone())
            .collect();

        if flagged.is_empty() {
            self.relays.iter().map(|r| r.url.clone()).collect()
        } else {
            flagged
        }
    }

    /// Parse a NIP-65 relay list event. Returns `None` when it lists no relays.
    pub fn from_relay_list(event: &RawEvent) -> Option<Self> {
        if event.kind != kinds::RELAY_LIST {
            return None;
        }

        let relays: Vec<RelayEntry> = event
            .tags
            .iter()
            .filter(|t| t.first().map(String::as_str) == Some("r"))
            .filter_map(|t| {
                let url = t.get(1)?.clone();
                let marker = t.get(2).map(String::as_str);
                Some(RelayEntry {
                    url,
                    read: marker.is_none() || marker == Some("read"),
                    write: marker.is_none() || marker == Some("write"),
                })
            })
            .collect();

        if relays.is_empty() {
            return None;
        }
        Some(Self::new(relays, event.created_at))
    }

    /// `r` tags for every used entry. An unmarked tag means read+write, so
    /// entries with neither flag have no tag form.
    pub fn to_tags(&self) -> Vec<Vec<String>> {
        self.relays
            .iter()
            .filter(|r| r.is_used())
            .map(RelayEntry::to_tag)
            .collect()
    }
}
