pub mod aggregator;
pub mod cache;
pub mod durable;
pub mod message_store;

pub use aggregator::build_summaries;
pub use cache::PersistenceCache;
pub use durable::{DurableStore, MemoryStore, SqliteStore, StorageError};
pub use message_store::MessageStore;
