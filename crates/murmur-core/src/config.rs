use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::constants::{
    CACHE_WRITE_DEBOUNCE, DEFAULT_RELAYS, EOSE_GRACE, HISTORY_LIMIT, HISTORY_QUERY_TIMEOUT,
};
use crate::models::{RelayEntry, RelayMetadata};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoreConfig {
    pub data_dir: PathBuf,
    /// Initial relay set; replaced at runtime by newer NIP-65 lists.
    pub relays: RelayMetadata,
    pub cache_debounce_ms: u64,
    pub query_timeout_ms: u64,
    pub eose_grace_ms: u64,
    pub history_limit: usize,
}

impl CoreConfig {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Load config from a JSON file. Missing fields fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: CoreConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn cache_debounce(&self) -> Duration {
        Duration::from_millis(self.cache_debounce_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn eose_grace(&self) -> Duration {
        Duration::from_millis(self.eose_grace_ms)
    }

    pub fn cache_db_path(&self) -> PathBuf {
        self.data_dir.join("dm_cache.db")
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .map(|dir| dir.join("murmur"))
            .unwrap_or_else(|| PathBuf::from("murmur_data"));

        Self {
            data_dir,
            relays: RelayMetadata::new(
                DEFAULT_RELAYS
                    .iter()
                    .map(|url| RelayEntry::read_write(*url))
                    .collect(),
                0,
            ),
            cache_debounce_ms: CACHE_WRITE_DEBOUNCE.as_millis() as u64,
            query_timeout_ms: HISTORY_QUERY_TIMEOUT.as_millis() as u64,
            eose_grace_ms: EOSE_GRACE.as_millis() as u64,
            history_limit: HISTORY_LIMIT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_minimal() {
        let config: CoreConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.cache_debounce(), CACHE_WRITE_DEBOUNCE);
        assert_eq!(config.eose_grace(), Duration::from_millis(200));
        assert_eq!(config.relays.relays.len(), DEFAULT_RELAYS.len());
        assert_eq!(config.relays.updated_at, 0);
    }

    #[test]
    fn test_parse_config_with_relays() {
        let json = r#"{
            "dataDir": "/tmp/murmur-test",
            "relays": {
                "relays": [{"url": "wss://relay.example.com", "read": true, "write": false}],
                "updatedAt": 42
            },
            "cacheDebounceMs": 500
        }"#;
        let config: CoreConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/murmur-test"));
        assert_eq!(config.relays.relays.len(), 1);
        assert!(!config.relays.relays[0].write);
        assert_eq!(config.relays.updated_at, 42);
        assert_eq!(config.cache_debounce(), Duration::from_millis(500));
        assert_eq!(config.history_limit, HISTORY_LIMIT);
    }

    #[test]
    fn test_load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = CoreConfig::load(&dir.path().join("missing.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
