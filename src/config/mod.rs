//! Configuration management for the civic ledger
//!
//! Configuration is a TOML file with one section per component, optional
//! named profiles, and `CIVIC_SECTION__KEY` environment overrides.

use crate::department::Department;
use crate::error::{CivicError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod validator;

pub use validator::{parse_duration, ConfigValidator};

/// Schema version this build understands
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub classifier: ClassifierConfig,
    pub pipeline: PipelineConfig,
    pub clustering: ClusteringConfig,
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

/// Classification collaborator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// When false every complaint takes the fallback path
    pub enabled: bool,
    pub endpoint: String,
    pub model: String,
    pub timeout: String,
    pub max_concurrent: usize,
}

impl ClassifierConfig {
    pub fn timeout(&self) -> Result<Duration> {
        parse_duration(&self.timeout)
    }
}

/// Submission pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub queue_size: usize,
    pub ambiguous_categories: Vec<String>,
    pub default_department: String,
}

/// Hotspot clustering configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringConfig {
    pub threshold_degrees: f64,
}

/// Daemon configuration for process and IPC management
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    pub pid_file: PathBuf,
    pub log_file: PathBuf,
    pub max_connections: usize,
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classifier_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classifier_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classifier_timeout: Option<String>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CivicError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| CivicError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Load from `path` if given, else from the default location, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };

        match Self::load(&path) {
            Ok(config) => Ok(config),
            Err(CivicError::ConfigNotFound { .. }) => {
                tracing::debug!("No config at {:?}, using defaults", path);
                let mut config = Self::default();
                config.apply_env_overrides();
                ConfigValidator::validate(&config)?;
                Ok(config)
            }
            Err(e) => Err(e),
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CivicError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| CivicError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply a profile's overrides, then re-validate
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| CivicError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(enabled) = overrides.classifier_enabled {
            self.classifier.enabled = enabled;
        }
        if let Some(model) = overrides.classifier_model {
            self.classifier.model = model;
        }
        if let Some(timeout) = overrides.classifier_timeout {
            self.classifier.timeout = timeout;
        }

        ConfigValidator::validate(self)
    }

    /// Apply environment variable overrides
    /// Environment variables in format: CIVIC_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("AI_SERVICE_URL") {
            self.classifier.endpoint = url;
        }

        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("CIVIC_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "CLASSIFIER__ENABLED" => {
                self.classifier.enabled =
                    value.parse().map_err(|_| CivicError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as boolean", value),
                    })?;
            }
            "CLASSIFIER__ENDPOINT" => {
                self.classifier.endpoint = value.to_string();
            }
            "CLASSIFIER__MODEL" => {
                self.classifier.model = value.to_string();
            }
            "CLASSIFIER__TIMEOUT" => {
                self.classifier.timeout = value.to_string();
            }
            "STORAGE__DATA_DIR" => {
                self.storage.data_dir = PathBuf::from(value);
            }
            "CLUSTERING__THRESHOLD_DEGREES" => {
                self.clustering.threshold_degrees =
                    value.parse().map_err(|_| CivicError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as a number", value),
                    })?;
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Department used when nothing better is known
    pub fn default_department(&self) -> Department {
        Department::from_label(&self.pipeline.default_department)
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| CivicError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("civic-ledger").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| CivicError::Config("Cannot determine home directory".to_string()))?;

        Ok(home_dir.join(".civic-ledger"))
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = PathBuf::from("~/.civic-ledger");

        let mut profiles = HashMap::new();
        profiles.insert(
            "offline".to_string(),
            ProfileOverrides {
                classifier_enabled: Some(false),
                ..Default::default()
            },
        );

        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir: data_dir.clone(),
            },
            classifier: ClassifierConfig {
                enabled: true,
                endpoint: "http://localhost:11434/api/generate".to_string(),
                model: "mistral".to_string(),
                timeout: "30s".to_string(),
                max_concurrent: 4,
            },
            pipeline: PipelineConfig {
                queue_size: 256,
                ambiguous_categories: vec!["other".to_string(), "others".to_string()],
                default_department: Department::DEFAULT.label().to_string(),
            },
            clustering: ClusteringConfig {
                threshold_degrees: crate::clustering::HOTSPOT_THRESHOLD_DEGREES,
            },
            daemon: DaemonConfig {
                socket_path: data_dir.join("daemon.sock"),
                pid_file: data_dir.join("daemon.pid"),
                log_file: data_dir.join("logs").join("daemon.log"),
                max_connections: 32,
            },
            profiles,
        }
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_path(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
