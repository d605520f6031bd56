//! Static configuration loaded from TOML
//!
//! Every field has a default, so an absent or partial file is valid. User
//! settings that change at runtime (API key, AI toggle, enabled categories)
//! live in the key-value store instead, see [`crate::settings`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::cache::CACHE_VERSION;
use crate::category::Category;
use crate::error::{Result, TriageError};

const APP_DIR: &str = "inbox-triage";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TriageConfig {
    pub cache: CacheConfig,
    pub scheduler: SchedulerConfig,
    pub scan: ScanConfig,
    pub classifier: ClassifierConfig,
    pub remote: RemoteConfig,
    pub store: StoreConfig,
}

/// Classification cache lifetime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Days an epoch stays valid after the last clear
    pub ttl_days: u32,
    /// Expected cache version; raising it forces a clear on next bootstrap
    pub version: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_days: 7,
            version: CACHE_VERSION,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.ttl_days))
    }
}

/// Reclassification polling policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_retries: u32,
    pub poll_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            poll_interval_ms: 250,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Periodic full scan
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub interval_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

impl ScanConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Local rule tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Minimum number of distinct keyword hits for a local match to be trusted
    pub min_score: u32,
    /// Extra keywords per category name, merged into the built-in lists
    pub keywords: BTreeMap<String, Vec<String>>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_score: 2,
            keywords: BTreeMap::new(),
        }
    }
}

impl ClassifierConfig {
    /// Extra keywords with their category names resolved. Unknown names are
    /// logged and skipped.
    pub fn extra_keywords(&self) -> Vec<(Category, Vec<String>)> {
        self.keywords
            .iter()
            .filter_map(|(name, words)| match Category::parse(name) {
                Some(Category::Other) | None => {
                    warn!(category = %name, "Ignoring keywords for unknown category");
                    None
                }
                Some(category) => Some((category, words.clone())),
            })
            .collect()
    }
}

/// Remote classifier endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of an OpenAI-compatible API
    pub endpoint: String,
    pub model: String,
    pub timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout_ms: 5000,
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Persistent store location
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite file; defaults to the platform data directory
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path.clone().or_else(|| {
            dirs::data_local_dir().map(|dir| dir.join(APP_DIR).join("triage.sqlite"))
        })
    }
}

impl TriageConfig {
    /// Load configuration from a specific path
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading configuration from: {:?}", path);

        let content = fs::read_to_string(path)
            .map_err(|e| TriageError::Config(format!("Failed to read config: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| TriageError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load the first config found in the default paths, or defaults
    pub fn discover() -> Result<Self> {
        for path in default_config_paths() {
            if path.exists() {
                info!("Found config at: {:?}", path);
                return Self::load(&path);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }
}

/// Get default config paths
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join(APP_DIR).join("config.toml"));
    }

    if let Some(home_dir) = dirs::home_dir() {
        paths.push(home_dir.join(".config").join(APP_DIR).join("config.toml"));
    }

    paths
}
