//! Configuration management with YAML support

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Result;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,

    #[serde(default)]
    pub service: ServiceConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

/// Logging configuration; `RUST_LOG` takes precedence when set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Conversation grouping options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// File unregistered SIP addresses under `user@host`
    #[serde(default = "default_enabled")]
    pub canonical_uri_keys: bool,

    /// Memoise directory answers for the duration of one build
    #[serde(default = "default_enabled")]
    pub cache_directory_lookups: bool,
}

/// Rebuild/publication service options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Buffered updates per subscriber before it starts lagging
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

// Default value functions
fn default_database_path() -> String {
    "~/.local/share/callbook/callbook.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_channel_capacity() -> usize {
    16
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            canonical_uri_keys: true,
            cache_directory_lookups: true,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    /// Searches in order:
    /// 1. Provided path
    /// 2. ./callbook.yaml (current directory)
    /// 3. <config dir>/callbook/callbook.yaml
    pub fn load(path: &str) -> Result<Self> {
        let mut search_paths = vec![
            PathBuf::from(shellexpand::tilde(path).to_string()),
            PathBuf::from("callbook.yaml"),
        ];
        if let Some(dir) = dirs::config_dir() {
            search_paths.push(dir.join("callbook").join("callbook.yaml"));
        }

        for search_path in &search_paths {
            if search_path.exists() {
                let content = std::fs::read_to_string(search_path)?;
                let config: Config = serde_yaml::from_str(&content)?;
                return Ok(config);
            }
        }

        // No config file found, use defaults
        Ok(Config::default())
    }

    /// Get the database path, expanding ~ to home directory
    pub fn database_path(&self) -> PathBuf {
        let expanded = shellexpand::tilde(&self.database.path).to_string();
        PathBuf::from(expanded)
    }
}
