//! Relay access: per-URL connections opened lazily and reused, with read/write
//! routing driven by the current [`RelayMetadata`](crate::models::RelayMetadata).

pub mod connection;
pub mod filter;
pub mod pool;

use futures::stream::BoxStream;

use crate::models::RawEvent;

pub use connection::{NostrConnection, NostrConnector, RelayConnection, RelayConnector};
pub use filter::DmFilter;
pub use pool::RelayPool;

/// Unbounded stream of live events. Dropping it ends the subscription.
pub type EventStream = BoxStream<'static, RawEvent>;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("No relays configured")]
    NoRelays,

    #[error("Connection to {url} failed: {message}")]
    Connection { url: String, message: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("Event rejected by every relay: {0}")]
    Rejected(String),

    #[error("Invalid filter: {0}")]
    Filter(String),

    #[error("Event conversion failed: {0}")]
    Conversion(String),
}
