//! Settings storage
//!
//! Operator preferences: where llama-swap lives, where models and the config
//! file are, and how often to poll.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::{get_data_dir, StorageError};
use crate::types::launch::ValidationError;

pub const DEFAULT_LLAMA_SWAP_URL: &str = "http://localhost:8090";
pub const DEFAULT_MODELS_PATH: &str = "./models";
pub const DEFAULT_CONFIG_PATH: &str = "./config.yaml";

/// Dashboard settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Base URL of the llama-swap server
    pub llama_swap_url: String,
    /// Directory scanned for `.gguf` files and used for downloads
    pub models_path: PathBuf,
    /// llama-swap `config.yaml`
    pub config_file_path: PathBuf,
    /// Seconds before a status probe gives up
    pub connection_timeout: u64,
    /// Seconds between status probes
    pub refresh_interval: u64,
    /// Activity log capacity
    pub max_log_entries: usize,
    /// Scan `models_path` when refreshing the model list
    pub auto_detect_models: bool,
    /// Back up `config.yaml` before every write
    pub backup_on_change: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            llama_swap_url: env_or("LLAMA_SWAP_URL", DEFAULT_LLAMA_SWAP_URL),
            models_path: PathBuf::from(env_or("MODELS_PATH", DEFAULT_MODELS_PATH)),
            config_file_path: PathBuf::from(env_or("CONFIG_PATH", DEFAULT_CONFIG_PATH)),
            connection_timeout: 30,
            refresh_interval: 30,
            max_log_entries: 1000,
            auto_detect_models: true,
            backup_on_change: true,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl Settings {
    /// Reject values the dashboard cannot run with.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let url = self.llama_swap_url.trim();
        if url.is_empty() {
            return Err(ValidationError::Missing("llama-swap URL"));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ValidationError::Invalid {
                field: "llama-swap URL",
                reason: "must start with http:// or https://".to_string(),
            });
        }

        for (field, value) in [
            ("connection timeout", self.connection_timeout),
            ("refresh interval", self.refresh_interval),
            ("max log entries", self.max_log_entries as u64),
        ] {
            if value == 0 {
                return Err(ValidationError::Invalid {
                    field,
                    reason: "must be a positive integer".to_string(),
                });
            }
        }

        Ok(())
    }

    /// OpenAI-compatible API root, e.g. `http://localhost:8090/v1`
    pub fn api_endpoint(&self) -> String {
        format!("{}/v1", self.llama_swap_url.trim().trim_end_matches('/'))
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval)
    }

    /// Build settings from a JSON value, recovering each field on its own.
    /// Missing, mistyped or non-positive fields take their default.
    pub fn from_value(value: &Value) -> Self {
        let defaults = Self::default();

        let text = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let positive = |key: &str| value.get(key).and_then(Value::as_u64).filter(|n| *n > 0);
        let flag = |key: &str| value.get(key).and_then(Value::as_bool);

        Self {
            llama_swap_url: text("llama_swap_url").unwrap_or(defaults.llama_swap_url),
            models_path: text("models_path")
                .map(PathBuf::from)
                .unwrap_or(defaults.models_path),
            config_file_path: text("config_file_path")
                .map(PathBuf::from)
                .unwrap_or(defaults.config_file_path),
            connection_timeout: positive("connection_timeout").unwrap_or(defaults.connection_timeout),
            refresh_interval: positive("refresh_interval").unwrap_or(defaults.refresh_interval),
            max_log_entries: positive("max_log_entries")
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(defaults.max_log_entries),
            auto_detect_models: flag("auto_detect_models").unwrap_or(defaults.auto_detect_models),
            backup_on_change: flag("backup_on_change").unwrap_or(defaults.backup_on_change),
        }
    }
}

/// JSON settings file
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data dir>/settings.json`
    pub fn default_location() -> Self {
        Self::new(get_data_dir().join("settings.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings from disk
    ///
    /// Never fails: an unreadable file yields defaults, a partially valid one
    /// keeps every field that parses.
    pub fn load(&self) -> Settings {
        match self.load_internal() {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Failed to load settings, using defaults: {}", e);
                Settings::default()
            }
        }
    }

    fn load_internal(&self) -> Result<Settings, StorageError> {
        if !self.path.exists() {
            tracing::info!("Settings file not found, using defaults");
            return Ok(Settings::default());
        }

        let json = fs::read_to_string(&self.path)?;
        let value: Value = serde_json::from_str(&json)?;

        tracing::debug!("Loaded settings from {}", self.path.display());
        Ok(Settings::from_value(&value))
    }

    /// Validate and write settings. Returns the effective API endpoint.
    pub fn save(&self, settings: &Settings) -> Result<String, StorageError> {
        settings.validate()?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(settings)?;
        fs::write(&self.path, json)?;

        tracing::debug!("Saved settings to {}", self.path.display());
        Ok(settings.api_endpoint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.connection_timeout, 30);
        assert_eq!(settings.refresh_interval, 30);
        assert_eq!(settings.max_log_entries, 1000);
        assert!(settings.auto_detect_models);
        assert!(settings.backup_on_change);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut settings = Settings::default();
        settings.refresh_interval = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.llama_swap_url = "  ".to_string();
        assert_eq!(
            settings.validate(),
            Err(ValidationError::Missing("llama-swap URL"))
        );

        let mut settings = Settings::default();
        settings.llama_swap_url = "localhost:8090".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_api_endpoint() {
        let mut settings = Settings::default();
        settings.llama_swap_url = "http://gpu-box:8080/".to_string();
        assert_eq!(settings.api_endpoint(), "http://gpu-box:8080/v1");
    }

    #[test]
    fn test_partial_record_keeps_valid_fields() {
        let value = serde_json::json!({
            "llama_swap_url": "http://10.0.0.2:9000",
            "refresh_interval": "fast",
            "connection_timeout": 0,
            "max_log_entries": 50,
            "backup_on_change": false,
            "auto_detect_models": "yes"
        });
        let settings = Settings::from_value(&value);
        let defaults = Settings::default();

        assert_eq!(settings.llama_swap_url, "http://10.0.0.2:9000");
        assert_eq!(settings.refresh_interval, defaults.refresh_interval);
        assert_eq!(settings.connection_timeout, defaults.connection_timeout);
        assert_eq!(settings.max_log_entries, 50);
        assert!(!settings.backup_on_change);
        assert_eq!(settings.auto_detect_models, defaults.auto_detect_models);
    }

    #[test]
    fn test_load_missing_or_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json"));
        assert_eq!(store.load(), Settings::default());

        std::fs::write(store.path(), "{ not json").unwrap();
        assert_eq!(store.load(), Settings::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("nested").join("settings.json"));

        let mut settings = Settings::default();
        settings.refresh_interval = 10;
        settings.models_path = PathBuf::from("/srv/models");

        let endpoint = store.save(&settings).unwrap();
        assert_eq!(endpoint, settings.api_endpoint());
        assert_eq!(store.load(), settings);
    }

    #[test]
    fn test_save_rejects_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json"));
        let mut settings = Settings::default();
        settings.max_log_entries = 0;

        assert!(matches!(store.save(&settings), Err(StorageError::Validation(_))));
        assert!(!store.path().exists());
    }
}
