use serde::{Serialize, Deserialize};
use std::fs;
use std::path::Path;
use log::info;
use thiserror::Error;

mod storage;
mod trie;

pub use storage::StorageConfig;
pub use trie::TrieConfig;

/// Error type for configuration files
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Main configuration for the state trie service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration
    pub storage: StorageConfig,

    /// Trie configuration
    pub trie: TrieConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_str = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&config_str)?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let config_str = toml::to_string_pretty(self)?;
        fs::write(path, config_str)?;
        Ok(())
    }

    /// Generate a default configuration file if it doesn't exist
    pub fn generate_default<P: AsRef<Path>>(path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();

        if path.exists() {
            info!("Config file already exists at {:?}", path);
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        Config::default().save(path)?;

        info!("Generated default config at {:?}", path);
        Ok(())
    }
}
