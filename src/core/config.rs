//! Configuration management for pagepilot
//!
//! Supports environment variables, config files, and runtime overrides.
//! Every budget, interval and cap used by the index, detectors, serializer
//! and executor lives here.
//!
//! Config file location: ~/.config/pagepilot/config.toml

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use crate::core::error::{PilotError, Result};

/// Main configuration for pagepilot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Element index configuration
    #[serde(default)]
    pub index: IndexConfig,
    /// Scroll detector configuration
    #[serde(default)]
    pub scroll: ScrollConfig,
    /// Media detector configuration
    #[serde(default)]
    pub media: MediaConfig,
    /// Outbound serializer limits
    #[serde(default)]
    pub serializer: SerializerConfig,
    /// Action executor configuration
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Element index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Interval between periodic scans in ms
    pub scan_interval_ms: u64,
    /// Wall-clock budget of a single scan pass in ms
    pub max_scan_millis: u64,
    /// Maximum elements visited in a single scan pass
    pub max_elements_per_scan: usize,
    /// Maximum number of cached entries before eviction
    pub max_entries: usize,
    /// Maximum characters of extracted text
    pub max_text_length: usize,
    /// Delay between a DOM mutation and the rescan it triggers in ms
    pub mutation_debounce_ms: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: env_or("PAGEPILOT_SCAN_INTERVAL_MS", 2000),
            max_scan_millis: env_or("PAGEPILOT_MAX_SCAN_MILLIS", 8),
            max_elements_per_scan: env_or("PAGEPILOT_MAX_ELEMENTS_PER_SCAN", 500),
            max_entries: env_or("PAGEPILOT_MAX_ENTRIES", 1000),
            max_text_length: 200,
            mutation_debounce_ms: 250,
        }
    }
}

/// Scroll detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrollConfig {
    /// Minimum spacing between two record updates of one element in ms
    pub update_interval_ms: u64,
    /// Periodic rescan interval in ms
    pub rescan_interval_ms: u64,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: 100,
            rescan_interval_ms: env_or("PAGEPILOT_DETECTOR_RESCAN_MS", 3000),
        }
    }
}

/// Media detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Periodic rescan interval in ms
    pub rescan_interval_ms: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            rescan_interval_ms: env_or("PAGEPILOT_DETECTOR_RESCAN_MS", 3000),
        }
    }
}

/// Limits applied to everything leaving the page context
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerializerConfig {
    /// Maximum nesting depth of an outbound value
    pub max_depth: usize,
    /// Maximum characters of any outbound string
    pub max_string_length: usize,
    /// Maximum selector candidates per element
    pub max_selectors: usize,
    /// Maximum attributes per element
    pub max_attributes: usize,
    /// Elements per batch chunk
    pub chunk_size: usize,
}

impl Default for SerializerConfig {
    fn default() -> Self {
        Self {
            max_depth: 10,
            max_string_length: 500,
            max_selectors: 5,
            max_attributes: 15,
            chunk_size: 50,
        }
    }
}

/// Action executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Default delay between two commands of a batch in ms
    pub default_delay_ms: u64,
    /// Whether the cursor affordance is shown before element effects
    pub cursor_enabled: bool,
    /// Duration of the cursor movement animation in ms
    pub cursor_animation_ms: u64,
    /// Default window scroll amount in pixels
    pub scroll_amount: f64,
    /// How long to wait for a custom dropdown to render in ms
    pub dropdown_wait_ms: u64,
    /// Polling interval while waiting for a custom dropdown in ms
    pub dropdown_poll_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_delay_ms: env_or("PAGEPILOT_DEFAULT_DELAY_MS", 300),
            cursor_enabled: env::var("PAGEPILOT_CURSOR")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
            cursor_animation_ms: 250,
            scroll_amount: 300.0,
            dropdown_wait_ms: 500,
            dropdown_poll_ms: 50,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is not set
    pub level: String,
    /// Emit JSON formatted log lines
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: env::var("PAGEPILOT_LOG").unwrap_or_else(|_| "info".to_string()),
            json: env::var("PAGEPILOT_LOG_JSON")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pagepilot")
    }

    /// Get the config file path
    pub fn config_file() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load configuration from file, environment, and defaults
    /// Priority: CLI args > config file > env vars > defaults
    pub fn load() -> Self {
        // Try to load .env file if it exists
        let _ = dotenvy::dotenv();

        if let Ok(config) = Self::load_from_file() {
            return config;
        }

        // Fall back to defaults (which respect env vars)
        Self::default()
    }

    /// Load configuration from the default file only
    pub fn load_from_file() -> Result<Self> {
        Self::load_from_path(&Self::config_file())
    }

    /// Load configuration from an explicit path
    pub fn load_from_path(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Err(PilotError::config("Config file not found"));
        }

        let content = fs::read_to_string(path)
            .map_err(|e| PilotError::config(format!("Failed to read config: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| PilotError::config(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_file();
        self.save_to_path(&path)?;
        Ok(path)
    }

    /// Save configuration to an explicit path, creating its directory
    pub fn save_to_path(&self, path: &std::path::Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            if !dir.exists() {
                fs::create_dir_all(dir)
                    .map_err(|e| PilotError::config(format!("Failed to create config dir: {}", e)))?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| PilotError::config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, content)
            .map_err(|e| PilotError::config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Generate a default config file content for display
    pub fn default_config_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config)
            .unwrap_or_else(|_| String::from("# Error generating config"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.serializer.max_depth, 10);
        assert_eq!(config.serializer.chunk_size, 50);
        assert_eq!(config.index.max_text_length, 200);
        assert_eq!(config.executor.dropdown_wait_ms, 500);
    }

    #[test]
    fn test_partial_toml() {
        let config = Config::from_toml(
            r#"
            [index]
            max_entries = 42

            [executor]
            cursor_enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(config.index.max_entries, 42);
        assert!(!config.executor.cursor_enabled);
        assert_eq!(config.serializer.max_depth, 10);
    }

    #[test]
    fn test_config_serialization() {
        let toml_str = Config::default_config_toml();
        assert!(toml_str.contains("max_scan_millis"));
        assert!(toml_str.contains("dropdown_wait_ms"));
    }

    #[test]
    fn test_save_to_path_round_trips() {
        let dir = env::temp_dir().join(format!("pagepilot-config-{}", std::process::id()));
        let path = dir.join("nested").join("config.toml");
        let mut config = Config::default();
        config.index.max_entries = 77;
        config.logging.json = true;

        config.save_to_path(&path).unwrap();
        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded.index.max_entries, 77);
        assert!(loaded.logging.json);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_config_dir() {
        let dir = Config::config_dir();
        assert!(dir.to_string_lossy().contains("pagepilot"));
    }
}
