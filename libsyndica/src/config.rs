//! Configuration management for Syndica

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ConfigError, Result};
use crate::types::PlatformId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    /// Per-platform application registrations. Platforms absent here are
    /// not connectable.
    #[serde(default)]
    pub platforms: Vec<PlatformAppConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

/// Tuning knobs for the scheduled-publish dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Seconds between polls for due work items.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Maximum due items claimed per tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Maximum items published concurrently within a tick.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Per-request timeout for platform HTTP calls.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
}

fn default_poll_interval() -> u64 {
    60
}

fn default_batch_size() -> u32 {
    20
}

fn default_max_concurrency() -> usize {
    4
}

fn default_call_timeout() -> u64 {
    30
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
            max_concurrency: default_max_concurrency(),
            call_timeout_secs: default_call_timeout(),
        }
    }
}

/// Application registration for one platform.
///
/// A tagged sum type, not a bag of optional fields: each variant carries
/// exactly the settings its platform needs, so a config that names a
/// platform without its required fields fails to parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "platform", rename_all = "lowercase")]
pub enum PlatformAppConfig {
    Mastodon {
        /// Instance base URL, e.g. `https://mastodon.social`.
        base_url: String,
        client_id: String,
        client_secret: String,
    },
    Linkedin {
        client_id: String,
        client_secret: String,
    },
}

impl PlatformAppConfig {
    pub fn platform(&self) -> PlatformId {
        match self {
            PlatformAppConfig::Mastodon { .. } => PlatformId::Mastodon,
            PlatformAppConfig::Linkedin { .. } => PlatformId::Linkedin,
        }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/syndica/syndica.db".to_string(),
            },
            dispatcher: DispatcherConfig::default(),
            platforms: Vec::new(),
        }
    }

    /// Find the app registration for a platform, if configured.
    pub fn platform_app(&self, platform: PlatformId) -> Option<&PlatformAppConfig> {
        self.platforms.iter().find(|p| p.platform() == platform)
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("SYNDICA_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("syndica").join("config.toml"))
}

/// Resolve the data directory path following XDG Base Directory spec
pub fn resolve_data_path() -> Result<PathBuf> {
    let data_dir =
        dirs::data_dir().ok_or_else(|| ConfigError::MissingField("data directory".to_string()))?;

    Ok(data_dir.join("syndica"))
}
