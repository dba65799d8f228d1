//! Configuration for the dashboard data core.
//!
//! Loaded from `~/.churnboard/config.json`. A missing file yields defaults;
//! a malformed file is an error so a typo never silently reverts budgets.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreConfig {
    /// Base URL of the dashboard API the collaborators live behind.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Override for the state directory (cache + config). Defaults to
    /// `~/.churnboard`.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    /// Fallback project when a load gives none and no prior load exists.
    #[serde(default)]
    pub default_project_id: Option<String>,
    /// Fallback dataset: the durable leg of the identity resolution chain.
    #[serde(default)]
    pub default_dataset_id: Option<String>,
    #[serde(default)]
    pub cache: CacheSettings,
    /// Training-status poll interval, seconds.
    #[serde(default = "default_training_poll_secs")]
    pub training_poll_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSettings {
    /// How long a cached snapshot stays servable, seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    /// Hard cap on one serialized payload, bytes.
    #[serde(default = "default_max_entry_bytes")]
    pub max_entry_bytes: usize,
    /// Hard cap on array payload length.
    #[serde(default = "default_max_elements")]
    pub max_elements: usize,
    /// Total budget for the cache directory, bytes. Writes past this trigger
    /// the eviction-and-retry pass.
    #[serde(default = "default_max_store_bytes")]
    pub max_store_bytes: u64,
}

fn default_api_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_training_poll_secs() -> u64 {
    5
}

fn default_cache_ttl_secs() -> u64 {
    600
}

fn default_max_entry_bytes() -> usize {
    2 * 1024 * 1024
}

fn default_max_elements() -> usize {
    5000
}

fn default_max_store_bytes() -> u64 {
    5 * 1024 * 1024
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
            max_entry_bytes: default_max_entry_bytes(),
            max_elements: default_max_elements(),
            max_store_bytes: default_max_store_bytes(),
        }
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            state_dir: None,
            default_project_id: None,
            default_dataset_id: None,
            cache: CacheSettings::default(),
            training_poll_secs: default_training_poll_secs(),
        }
    }
}

impl CoreConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    pub fn training_poll_interval(&self) -> Duration {
        Duration::from_secs(self.training_poll_secs)
    }

    /// Resolve the state directory: explicit override, else `~/.churnboard`.
    pub fn state_dir(&self) -> Result<PathBuf, String> {
        if let Some(dir) = &self.state_dir {
            return Ok(dir.clone());
        }
        let home = dirs::home_dir().ok_or("Could not find home directory")?;
        Ok(home.join(".churnboard"))
    }

    /// The directory cache entry files live in.
    pub fn cache_dir(&self) -> Result<PathBuf, String> {
        Ok(self.state_dir()?.join("cache"))
    }
}

/// Canonical config file path (`~/.churnboard/config.json`).
pub fn config_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or("Could not find home directory")?;
    Ok(home.join(".churnboard").join("config.json"))
}

/// Load configuration from `~/.churnboard/config.json`.
///
/// A missing file is not an error; first-run callers get defaults.
pub fn load_config() -> Result<CoreConfig, String> {
    let path = config_path()?;
    if !path.exists() {
        return Ok(CoreConfig::default());
    }

    let content =
        fs::read_to_string(&path).map_err(|e| format!("Failed to read config: {}", e))?;
    serde_json::from_str(&content).map_err(|e| format!("Failed to parse config: {}", e))
}

/// Write configuration back to `~/.churnboard/config.json`, creating the
/// state directory if needed.
pub fn save_config(config: &CoreConfig) -> Result<(), String> {
    let path = config_path()?;
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| format!("Failed to create config dir: {}", e))?;
        }
    }

    let content = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    crate::util::atomic_write_str(&path, &content).map_err(|e| format!("Write error: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.cache.max_entry_bytes, 2 * 1024 * 1024);
        assert_eq!(config.cache.max_elements, 5000);
        assert_eq!(config.training_poll_secs, 5);
        assert_eq!(config.cache_ttl(), Duration::from_secs(600));
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: CoreConfig =
            serde_json::from_str(r#"{"apiBaseUrl":"https://risk.example.com"}"#).unwrap();
        assert_eq!(config.api_base_url, "https://risk.example.com");
        assert_eq!(config.cache.ttl_secs, 600);
        assert!(config.default_dataset_id.is_none());
    }

    #[test]
    fn test_explicit_state_dir_wins() {
        let config = CoreConfig {
            state_dir: Some(PathBuf::from("/tmp/churnboard-test")),
            ..CoreConfig::default()
        };
        assert_eq!(
            config.cache_dir().unwrap(),
            PathBuf::from("/tmp/churnboard-test/cache")
        );
    }
}
