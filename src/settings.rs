// System settings manager.
//
// Holds the single runtime-editable settings record: the chat-completion API
// credentials and model parameters, plus the log-store connection. The record
// is persisted as JSON and seeded from environment variables on first start.
// Applying a changed record to the LLM client and log sink is done by
// `AppState::apply_settings`, so this module only validates, merges and stores.
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::persist::write_json_atomically;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to access settings file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to decode settings: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid settings: {0}")]
    ValidationError(String),
}

/// The runtime settings record. Exactly one exists per process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemSettings {
    /// Base URL of the OpenAI-compatible API, e.g. `https://host/v1`
    pub openai_api_url: String,

    pub openai_api_key: String,

    pub model_name: String,

    /// Sampling temperature, 0 to 2
    pub temperature: f64,

    pub mongodb_url: String,

    pub mongodb_database: String,

    pub mongodb_collection: String,

    /// When false the log sink stays disconnected and records nothing
    #[serde(default = "log_enabled_by_default")]
    pub log_enabled: bool,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn log_enabled_by_default() -> bool {
    true
}

impl SystemSettings {
    /// Builds the default record from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the default record, reading each variable through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Self {
            openai_api_url: var("OPENAI_API_URL", "https://api.example.com/v1"),
            openai_api_key: var("OPENAI_API_KEY", "your-api-key-here"),
            model_name: var("MODEL_NAME", "qwen-max"),
            temperature: lookup("TEMPERATURE")
                .and_then(|t| t.parse::<f64>().ok())
                .filter(|t| t.is_finite())
                .unwrap_or(0.1),
            mongodb_url: var("MONGODB_URL", "mongodb://localhost:27017"),
            mongodb_database: var("MONGODB_DATABASE", "api_logs"),
            mongodb_collection: var("MONGODB_COLLECTION", "call_logs"),
            log_enabled: var("LOG_ENABLED", "true").eq_ignore_ascii_case("true"),
            updated_at: Utc::now(),
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(SettingsError::ValidationError(format!(
                "temperature must be between 0 and 2, got {}",
                self.temperature
            )));
        }

        if !self.openai_api_url.starts_with("http://") && !self.openai_api_url.starts_with("https://") {
            return Err(SettingsError::ValidationError(
                "openai_api_url must start with http:// or https://".into(),
            ));
        }

        if self.model_name.is_empty() {
            return Err(SettingsError::ValidationError(
                "model_name cannot be empty".into(),
            ));
        }

        Ok(())
    }
}

/// Owns the settings record and its file.
pub struct SettingsManager {
    path: PathBuf,
    settings: RwLock<SystemSettings>,
}

impl SettingsManager {
    /// Loads the record from `path`, or seeds it from the environment when
    /// the file does not exist. A seeded record is not written until the
    /// first update.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        Self::load_with(path, SystemSettings::from_env)
    }

    pub fn load_with<F>(path: impl AsRef<Path>, seed: F) -> Result<Self, SettingsError>
    where
        F: FnOnce() -> SystemSettings,
    {
        let path = path.as_ref().to_path_buf();
        let settings = if path.exists() {
            let content = fs::read_to_string(&path)?;
            let settings: SystemSettings = serde_json::from_str(&content)?;
            settings.validate()?;
            info!("Loaded system settings from {}", path.display());
            settings
        } else {
            info!(
                "Settings file {} not found, seeding from environment",
                path.display()
            );
            seed()
        };

        Ok(Self {
            path,
            settings: RwLock::new(settings),
        })
    }

    /// Snapshot of the current record.
    pub fn current(&self) -> SystemSettings {
        self.settings.read().clone()
    }

    /// Shallow-merges the top-level keys of `patch` over the current record,
    /// validates and persists the result, and returns it.
    ///
    /// The in-memory record only changes once the file has been written.
    pub fn update(&self, patch: &Value) -> Result<SystemSettings, SettingsError> {
        let Value::Object(fields) = patch else {
            return Err(SettingsError::ValidationError(
                "settings update must be a JSON object".into(),
            ));
        };

        let mut guard = self.settings.write();
        let mut merged = serde_json::to_value(&*guard)?;
        if let Value::Object(current) = &mut merged {
            for (key, value) in fields {
                current.insert(key.clone(), value.clone());
            }
        }

        let mut next: SystemSettings = serde_json::from_value(merged)?;
        next.updated_at = Utc::now();
        next.validate()?;

        self.persist(&next)?;
        *guard = next.clone();
        debug!("System settings updated (model={})", next.model_name);
        Ok(next)
    }

    fn persist(&self, settings: &SystemSettings) -> Result<(), SettingsError> {
        write_json_atomically(&self.path, settings)?;
        Ok(())
    }
}
