use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use murmur_core::CoreConfig;
use nostr_sdk::nips::nip49::EncryptedSecretKey;
use nostr_sdk::prelude::*;
use serde::{Deserialize, Serialize};

/// Environment variable consulted when the config file carries no credentials.
pub const KEY_ENV_VAR: &str = "MURMUR_KEY";

/// CLI configuration that can be loaded from a JSON file
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CliConfig {
    /// Directory for the message cache database
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Engine configuration file (relays, timeouts)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub core_config: Option<PathBuf>,

    /// Credentials for nostr authentication
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

/// Nostr credentials configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    /// nsec (unencrypted) or ncryptsec (encrypted) key
    pub key: String,

    /// Password for ncryptsec decryption (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl CliConfig {
    /// `<config dir>/murmur/cli.json`, used when no `--config` is given.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("murmur").join("cli.json"))
    }

    /// Load config from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: CliConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Engine configuration, with `dataDir` taking precedence over the engine file.
    pub fn core_config(&self) -> Result<CoreConfig> {
        let mut config = match &self.core_config {
            Some(path) => CoreConfig::load(path)?,
            None => CoreConfig::default(),
        };
        if let Some(data_dir) = &self.data_dir {
            config.data_dir = data_dir.clone();
        }
        Ok(config)
    }

    /// Credentials from the config file, else from `MURMUR_KEY`.
    pub fn credentials(&self) -> Option<Credentials> {
        self.credentials.clone().or_else(|| {
            std::env::var(KEY_ENV_VAR).ok().map(|key| Credentials {
                key,
                password: None,
            })
        })
    }
}

impl Credentials {
    pub fn keys(&self) -> Result<Keys> {
        let key = self.key.trim();
        if key.starts_with("ncryptsec") {
            let password = self.password.as_deref().ok_or_else(|| {
                anyhow::anyhow!("Password required for ncryptsec but not provided in config")
            })?;
            let encrypted = EncryptedSecretKey::from_bech32(key)?;
            let secret_key = encrypted.decrypt(password)?;
            Ok(Keys::new(secret_key))
        } else if key.starts_with("nsec") {
            let secret_key = SecretKey::from_bech32(key)?;
            Ok(Keys::new(secret_key))
        } else {
            Err(anyhow::anyhow!(
                "Invalid key format: expected nsec or ncryptsec"
            ))
        }
    }
}
