pub mod config;
pub mod constants;
pub mod crypto;
pub mod models;
pub mod relay;
pub mod runtime;
pub mod session;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use config::CoreConfig;
pub use crypto::{DmSigner, KeysSigner, MessageDecryptor};
pub use models::{
    ConversationPage, ConversationSummary, DecryptedMessage, FileAttachment, Protocol, RawEvent,
    RelayEntry, RelayMetadata,
};
pub use relay::{NostrConnector, RelayPool};
pub use runtime::{CoreHandle, DataChange, DmCommand, DmRuntime};
pub use session::{DmSession, LoadingPhase, SendError};
pub use store::{DurableStore, MemoryStore, SqliteStore};
