use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::{unix_now, RawEvent};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Per-identity snapshots of stored-form events. `put` replaces the whole
/// snapshot for that identity.
pub trait DurableStore: Send + Sync {
    fn put(&self, identity: &str, events: &[RawEvent]) -> Result<(), StorageError>;
    fn get(&self, identity: &str) -> Result<Option<Vec<RawEvent>>, StorageError>;
    fn delete(&self, identity: &str) -> Result<(), StorageError>;
    fn clear_all(&self) -> Result<(), StorageError>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS dm_snapshots (
                identity TEXT PRIMARY KEY,
                events TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl DurableStore for SqliteStore {
    fn put(&self, identity: &str, events: &[RawEvent]) -> Result<(), StorageError> {
        let json = serde_json::to_string(events)?;
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO dm_snapshots (identity, events, updated_at) VALUES (?1, ?2, ?3)",
            params![identity, json, unix_now() as i64],
        )?;
        Ok(())
    }

    fn get(&self, identity: &str) -> Result<Option<Vec<RawEvent>>, StorageError> {
        let json: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT events FROM dm_snapshots WHERE identity = ?1",
                params![identity],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| serde_json::from_str(&j).map_err(StorageError::from))
            .transpose()
    }

    fn delete(&self, identity: &str) -> Result<(), StorageError> {
        self.conn.lock().execute(
            "DELETE FROM dm_snapshots WHERE identity = ?1",
            params![identity],
        )?;
        Ok(())
    }

    fn clear_all(&self) -> Result<(), StorageError> {
        self.conn.lock().execute("DELETE FROM dm_snapshots", [])?;
        Ok(())
    }
}

/// Process-local store, used when the data directory cannot be opened.
#[derive(Default)]
pub struct MemoryStore {
    snapshots: Mutex<HashMap<String, Vec<RawEvent>>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `put` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl DurableStore for MemoryStore {
    fn put(&self, identity: &str, events: &[RawEvent]) -> Result<(), StorageError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.snapshots
            .lock()
            .insert(identity.to_string(), events.to_vec());
        Ok(())
    }

    fn get(&self, identity: &str) -> Result<Option<Vec<RawEvent>>, StorageError> {
        Ok(self.snapshots.lock().get(identity).cloned())
    }

    fn delete(&self, identity: &str) -> Result<(), StorageError> {
        self.snapshots.lock().remove(identity);
        Ok(())
    }

    fn clear_all(&self) -> Result<(), StorageError> {
        self.snapshots.lock().clear();
        Ok(())
    }
}
