use nostr_sdk::prelude::*;
use serde::Serialize;

use super::RelayError;
use crate::models::RawEvent;

/// The subset of NIP-01 filters the DM engine needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DmFilter {
    pub kinds: Vec<u16>,
    pub authors: Vec<String>,
    /// Values of the `#p` tag filter.
    pub p_tags: Vec<String>,
    pub since: Option<u64>,
    pub limit: Option<usize>,
}

impl DmFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: u16) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn author(mut self, pubkey: impl Into<String>) -> Self {
        self.authors.push(pubkey.into());
        self
    }

    pub fn p_tag(mut self, pubkey: impl Into<String>) -> Self {
        self.p_tags.push(pubkey.into());
        self
    }

    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Local evaluation, used for in-memory relays. `limit` is not applied here.
    pub fn matches(&self, event: &RawEvent) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind) {
            return false;
        }
        if !self.authors.is_empty() && !self.authors.contains(&event.pubkey) {
            return false;
        }
        if !self.p_tags.is_empty() {
            let tagged = event.tags.iter().any(|t| {
                t.first().map(String::as_str) == Some("p")
                    && t.get(1).is_some_and(|v| self.p_tags.contains(v))
            });
            if !tagged {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.created_at < since {
                return false;
            }
        }
        true
    }

    pub fn to_nostr(&self) -> Result<Filter, RelayError> {
        let mut filter = Filter::new();

        if !self.kinds.is_empty() {
            filter = filter.kinds(self.kinds.iter().map(|k| Kind::from(*k)));
        }
        if !self.authors.is_empty() {
            let authors = self
                .authors
                .iter()
                .map(|a| PublicKey::parse(a))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| RelayError::Filter(e.to_string()))?;
            filter = filter.authors(authors);
        }
        if !self.p_tags.is_empty() {
            filter = filter.custom_tags(
                SingleLetterTag::lowercase(Alphabet::P),
                self.p_tags.clone(),
            );
        }
        if let Some(since) = self.since {
            filter = filter.since(Timestamp::from(since));
        }
        if let Some(limit) = self.limit {
            filter = filter.limit(limit);
        }

        Ok(filter)
    }
}
