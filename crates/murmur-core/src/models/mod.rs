pub mod attachment;
pub mod conversation;
pub mod message;
pub mod relay_metadata;

pub use attachment::FileAttachment;
pub use conversation::{ConversationPage, ConversationSummary, ParticipantData};
pub use message::{
    compute_event_id, conversation_partner, unix_now, DecryptedMessage, Protocol, RawEvent,
};
pub use relay_metadata::{RelayAccess, RelayEntry, RelayMetadata};
