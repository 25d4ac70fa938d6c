//! Protocol constants and tuning values shared across the engine.

use std::time::Duration;

/// Relays used when no configuration has been provided.
pub const DEFAULT_RELAYS: &[&str] = &["wss://relay.damus.io", "wss://nos.lol", "wss://relay.primal.net"];

/// Quiet period before the in-memory message set is flushed to durable storage.
pub const CACHE_WRITE_DEBOUNCE: Duration = Duration::from_secs(15);

/// Overall bound on the historical query phase.
pub const HISTORY_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a historical query keeps waiting for slower relays once the first one
/// has signalled end-of-stored-events.
pub const EOSE_GRACE: Duration = Duration::from_millis(200);

/// Bound on the NIP-65 relay list lookup.
pub const RELAY_LIST_QUERY_TIMEOUT: Duration = Duration::from_secs(3);

/// Per-filter limit for historical queries.
pub const HISTORY_LIMIT: usize = 200;

/// Messages shown per page of a conversation view.
pub const PAGE_SIZE: usize = 50;

/// NIP-59 wraps and seals carry timestamps randomized up to two days into the past.
pub const GIFT_WRAP_TIMESTAMP_JITTER_SECS: u64 = 2 * 24 * 60 * 60;

// Nostr event kinds handled by the engine
pub mod kinds {
    /// NIP-04 encrypted direct message
    pub const ENCRYPTED_DM: u16 = 4;
    /// NIP-59 seal
    pub const SEAL: u16 = 13;
    /// NIP-17 private direct message (rumor)
    pub const PRIVATE_DM: u16 = 14;
    /// NIP-59 gift wrap
    pub const GIFT_WRAP: u16 = 1059;
    /// NIP-65 relay list metadata
    pub const RELAY_LIST: u16 = 10002;
}
