//! Configuration schema for Larder
//!
//! Configuration is stored at `~/.config/larder/config.toml`

use crate::cache::manager::{CacheSettings, DEFAULT_LOCK_TIMEOUT, DEFAULT_STALE_LOCK_GRACE};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Cache settings
    pub cache: CacheConfig,
}

impl Config {
    /// Runtime settings for a cache manager
    pub fn cache_settings(&self) -> CacheSettings {
        let secs = |n: u64| (n > 0).then(|| Duration::from_secs(n));

        CacheSettings {
            root_directory: self.cache.root_directory.clone(),
            default_ttl: secs(self.cache.default_ttl_secs),
            lock_timeout: secs(self.cache.lock_timeout_secs),
            stale_lock_grace: Duration::from_secs(self.cache.stale_lock_grace_secs),
            journal: self.general.journal,
        }
    }
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,

    /// Record cache mutations in `<root>/journal.log`
    pub journal: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            journal: true,
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding entries, locks and the journal
    pub root_directory: PathBuf,

    /// Freshness window for entries stored without one (0 = no age limit)
    pub default_ttl_secs: u64,

    /// Maximum wait for a busy entry (0 = wait forever)
    pub lock_timeout_secs: u64,

    /// Heartbeat age after which a lock is reclaimed
    pub stale_lock_grace_secs: u64,

    /// Prune down to this total size in MB (0 = unlimited)
    pub max_total_mb: u64,

    /// Prune entries older than N days (0 = disabled)
    pub max_age_days: u64,
}

impl CacheConfig {
    /// Default cache root under the platform cache directory
    pub fn default_root() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("larder")
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root_directory: Self::default_root(),
            default_ttl_secs: 0,
            lock_timeout_secs: DEFAULT_LOCK_TIMEOUT.as_secs(),
            stale_lock_grace_secs: DEFAULT_STALE_LOCK_GRACE.as_secs(),
            max_total_mb: 0,
            max_age_days: 0,
        }
    }
}
