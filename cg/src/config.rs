//! consentgen configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::connector::ConnectorConfig;
use crate::limiter::RateLimitConfig;
use crate::template::{ConsentCategory, DEFAULT_DATA_LAYER_KEY, DEFAULT_VARIABLE_NAME, TemplateStore, TriggerKind};
use crate::writer::SnapshotMode;

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Tag manager API access
    pub connector: ConnectorConfig,

    /// Create-call budget
    #[serde(rename = "rate-limit")]
    pub rate_limit: RateLimitConfig,

    /// Existence check behavior
    pub check: CheckConfig,

    /// Template and expansion axes
    pub templates: TemplatesConfig,
}

impl Config {
    /// Validate configuration before use
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.max_calls == 0 {
            return Err(eyre::eyre!("rate-limit.max-calls must be at least 1"));
        }
        if self.rate_limit.window_ms == 0 {
            return Err(eyre::eyre!("rate-limit.window-ms must be at least 1"));
        }
        if self.templates.variable_name.trim().is_empty() {
            return Err(eyre::eyre!("templates.variable-name must not be empty"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Project-local config: ./consentgen.yml
        let local_config = PathBuf::from("consentgen.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // User config: ~/.config/consentgen/consentgen.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("consentgen").join("consentgen.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is set up
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let path = match config_path {
            Some(path) => path.clone(),
            None => PathBuf::from("consentgen.yml"),
        };
        let content = fs::read_to_string(path).ok()?;
        let config: Self = serde_yaml::from_str(&content).ok()?;
        config.log_level
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Existence check behavior
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckConfig {
    /// Sort nested lists before comparing payloads
    #[serde(rename = "normalize-order")]
    pub normalize_order: bool,

    /// Re-list the remote collection before every entity
    #[serde(rename = "snapshot-per-item")]
    pub snapshot_per_item: bool,
}

impl CheckConfig {
    pub fn snapshot_mode(&self) -> SnapshotMode {
        if self.snapshot_per_item {
            SnapshotMode::PerItem
        } else {
            SnapshotMode::PerBatch
        }
    }
}

/// Template and expansion axes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplatesConfig {
    /// Name of the consent data-layer variable
    #[serde(rename = "variable-name")]
    pub variable_name: String,

    /// Data-layer key the variable reads
    #[serde(rename = "data-layer-key")]
    pub data_layer_key: String,

    /// Trigger kinds to expand (empty means all)
    pub kinds: Vec<TriggerKind>,

    /// Consent categories to expand (empty means all)
    pub categories: Vec<ConsentCategory>,
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            variable_name: DEFAULT_VARIABLE_NAME.to_string(),
            data_layer_key: DEFAULT_DATA_LAYER_KEY.to_string(),
            kinds: Vec::new(),
            categories: Vec::new(),
        }
    }
}

impl TemplatesConfig {
    pub fn store(&self) -> TemplateStore {
        TemplateStore::new(&self.variable_name, &self.data_layer_key)
    }
}
