use std::collections::HashMap;

use crate::models::{ConversationSummary, ParticipantData};

/// Read-model rows for the conversation list, newest activity first.
///
/// A message counts as unread when the partner wrote it after the partner's
/// last-read mark. Partners without a mark have every message unread.
pub fn build_summaries(
    conversations: &HashMap<String, ParticipantData>,
    read_timestamps: &HashMap<String, u64>,
    owner: Option<&str>,
) -> Vec<ConversationSummary> {
    let mut summaries: Vec<ConversationSummary> = conversations
        .iter()
        .map(|(partner, data)| {
            let read_at = read_timestamps.get(partner).copied().unwrap_or(0);
            let unread_count = data
                .messages
                .iter()
                .filter(|m| Some(m.author()) != owner && m.created_at() > read_at)
                .count();

            ConversationSummary {
                partner_id: partner.clone(),
                last_message: data.last_message().cloned(),
                last_activity: data.last_activity,
                has_nip04: data.has_nip04,
                has_nip17: data.has_nip17,
                is_known: true,
                is_request: false,
                unread_count,
            }
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.last_activity
            .cmp(&a.last_activity)
            .then_with(|| a.partner_id.cmp(&b.partner_id))
    });
    summaries
}
