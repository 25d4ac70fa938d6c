use serde::{Deserialize, Serialize};

use super::message::{DecryptedMessage, Protocol};
use crate::constants::PAGE_SIZE;

/// All messages exchanged with one partner.
///
/// `messages` is ordered by `created_at` ascending and holds each id at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantData {
    pub messages: Vec<DecryptedMessage>,
    pub last_activity: u64,
    pub has_nip04: bool,
    pub has_nip17: bool,
}

impl ParticipantData {
    pub fn contains(&self, id: &str) -> bool {
        self.messages.iter().any(|m| m.id() == id)
    }

    /// Append then re-sort. Existing entries are never touched.
    /// Returns false when the id is already present.
    pub fn insert(&mut self, message: DecryptedMessage) -> bool {
        if self.contains(message.id()) {
            return false;
        }

        self.last_activity = self.last_activity.max(message.created_at());
        match message.protocol() {
            Protocol::Nip04 => self.has_nip04 = true,
            Protocol::Nip17 => self.has_nip17 = true,
        }
        self.messages.push(message);
        self.messages.sort_by_key(|m| m.created_at());
        true
    }

    pub fn last_message(&self) -> Option<&DecryptedMessage> {
        self.messages.last()
    }
}

/// Read-model row for the conversation list. Derived on demand, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub partner_id: String,
    pub last_message: Option<DecryptedMessage>,
    pub last_activity: u64,
    pub has_nip04: bool,
    pub has_nip17: bool,
    pub is_known: bool,
    pub is_request: bool,
    pub unread_count: usize,
}

/// A window onto the newest messages of one conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationPage {
    pub messages: Vec<DecryptedMessage>,
    pub has_more: bool,
    pub total_count: usize,
    pub last_message: Option<DecryptedMessage>,
    pub last_activity: u64,
}

impl ConversationPage {
    pub fn from_participant(data: Option<&ParticipantData>, visible_count: usize) -> Self {
        let Some(data) = data else {
            return Self::default();
        };

        let total_count = data.messages.len();
        let start = total_count.saturating_sub(visible_count);
        Self {
            messages: data.messages[start..].to_vec(),
            has_more: total_count > visible_count,
            total_count,
            last_message: data.last_message().cloned(),
            last_activity: data.last_activity,
        }
    }

    /// Window size after "load earlier".
    pub fn earlier_window(&self) -> usize {
        (self.messages.len() + PAGE_SIZE).min(self.total_count.max(PAGE_SIZE))
    }
}
