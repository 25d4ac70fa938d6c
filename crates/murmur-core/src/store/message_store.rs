use std::collections::HashMap;

use super::aggregator::build_summaries;
use crate::models::{
    ConversationPage, ConversationSummary, DecryptedMessage, ParticipantData, RawEvent,
};

/// Per-partner message timelines for the current identity.
///
/// Owned behind one lock by the session; every read-modify-write happens while
/// that lock is held. `epoch` changes on every reset so work started for an
/// earlier identity (or before a clear) can tell it is stale.
#[derive(Debug, Default)]
pub struct MessageStore {
    owner: Option<String>,
    epoch: u64,
    conversations: HashMap<String, ParticipantData>,
    read_timestamps: HashMap<String, u64>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Drop all state and start a new epoch for `owner`.
    pub fn reset(&mut self, owner: Option<String>) -> u64 {
        self.owner = owner;
        self.conversations.clear();
        self.read_timestamps.clear();
        self.epoch += 1;
        self.epoch
    }

    /// Idempotent by message id. Returns whether anything changed.
    pub fn insert(&mut self, partner: &str, message: DecryptedMessage) -> bool {
        self.conversations
            .entry(partner.to_string())
            .or_default()
            .insert(message)
    }

    pub fn conversation(&self, partner: &str) -> Option<&ParticipantData> {
        self.conversations.get(partner)
    }

    pub fn partner_count(&self) -> usize {
        self.conversations.len()
    }

    pub fn message_count(&self) -> usize {
        self.conversations.values().map(|c| c.messages.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn page(&self, partner: &str, visible_count: usize) -> ConversationPage {
        ConversationPage::from_participant(self.conversations.get(partner), visible_count)
    }

    /// Session-only; not persisted with the snapshot.
    pub fn mark_read(&mut self, partner: &str, at: u64) {
        self.read_timestamps.insert(partner.to_string(), at);
    }

    pub fn summaries(&self) -> Vec<ConversationSummary> {
        build_summaries(
            &self.conversations,
            &self.read_timestamps,
            self.owner.as_deref(),
        )
    }

    /// Every message in stored (ciphertext) form, ready for a snapshot write.
    pub fn flatten(&self) -> Vec<RawEvent> {
        self.conversations
            .values()
            .flat_map(|c| c.messages.iter().map(|m| m.stored_form().clone()))
            .collect()
    }
}
