/// Bootstrap configuration for the gateway process.
///
/// This module handles loading, parsing, and validating the settings needed
/// before the gateway can serve anything: where to listen, where the endpoint
/// and system-settings files live, and which legacy URL prefix to expose.
/// Runtime-editable settings (LLM credentials, log store) live in
/// [`crate::settings`] instead.
///
/// # Configuration Flow
///
/// 1. Load configuration from a YAML file or environment variables
/// 2. Apply environment overrides on top of the file
/// 3. Validate all required settings
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur when loading or validating configuration.
#[derive(Debug, Error)]
#[allow(clippy::enum_variant_names)]
pub enum ConfigError {
    /// File I/O errors when reading the configuration file
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// YAML parsing errors in the configuration file
    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] serde_yml::Error),

    /// Configuration validation errors
    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Root configuration structure containing all bootstrap settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration settings
    pub server: ServerConfig,

    /// Locations of the persisted JSON documents
    #[serde(default)]
    pub storage: StorageConfig,

    /// URL routing settings
    #[serde(default)]
    pub routing: RoutingConfig,
}

/// Server configuration settings.
///
/// Controls how the gateway listens for connections.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// IP address to bind the server to
    pub host: String,

    /// Port number to listen on
    pub port: u16,

    /// Logging level (e.g., "INFO", "DEBUG", "ERROR")
    pub debug_level: String,
}

/// Paths of the endpoint table and the system settings record.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// JSON file mapping endpoint name to endpoint config
    #[serde(default = "default_endpoints_file")]
    pub endpoints_file: String,

    /// JSON file holding the system settings record
    #[serde(default = "default_settings_file")]
    pub settings_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoints_file: default_endpoints_file(),
            settings_file: default_settings_file(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutingConfig {
    /// First path segment of the path-addressed endpoints, without slashes
    #[serde(default = "default_legacy_prefix")]
    pub legacy_prefix: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            legacy_prefix: default_legacy_prefix(),
        }
    }
}

fn default_endpoints_file() -> String {
    "api_configs.json".to_string()
}

fn default_settings_file() -> String {
    "system_config.json".to_string()
}

fn default_legacy_prefix() -> String {
    "YiDiJiuYi".to_string()
}

/// Loads configuration from environment variables, falling back to defaults.
fn load_from_env() -> Config {
    info!("Loading configuration from environment variables");

    let server = ServerConfig {
        host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
        port: env::var("SERVER_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(5000),
        debug_level: env::var("SERVER_DEBUG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
    };

    let storage = StorageConfig {
        endpoints_file: env::var("ENDPOINTS_FILE").unwrap_or_else(|_| default_endpoints_file()),
        settings_file: env::var("SETTINGS_FILE").unwrap_or_else(|_| default_settings_file()),
    };

    let routing = RoutingConfig {
        legacy_prefix: env::var("LEGACY_PREFIX").unwrap_or_else(|_| default_legacy_prefix()),
    };

    Config {
        server,
        storage,
        routing,
    }
}

/// Loads configuration from a YAML file or environment variables.
///
/// The file is used when it exists, with environment variables overriding
/// individual values. Otherwise the configuration comes from the environment
/// alone. Either way the result is validated before being returned.
///
/// # Example
///
/// ```ignore
/// let config = config::load_config("config.yaml")?;
/// println!("Gateway will listen on {}:{}", config.server.host, config.server.port);
/// ```
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    if Path::new(path).exists() {
        info!("Loading configuration from file: {}", path);

        let content = fs::read_to_string(path)?;
        debug!("Successfully read configuration file");

        let mut config: Config = serde_yml::from_str(&content)?;
        debug!("Successfully parsed YAML configuration");

        override_with_env(&mut config);

        config.validate()?;
        info!("Configuration validated successfully");

        Ok(config)
    } else {
        info!(
            "Configuration file not found: {}. Using environment variables.",
            path
        );
        let config = load_from_env();
        config.validate()?;
        info!("Configuration from environment variables validated successfully");
        Ok(config)
    }
}

/// Override configuration values with environment variables if present
fn override_with_env(config: &mut Config) {
    if let Ok(host) = env::var("SERVER_HOST") {
        config.server.host = host;
    }

    if let Ok(port) = env::var("SERVER_PORT") {
        if let Ok(port) = port.parse() {
            config.server.port = port;
        }
    }

    if let Ok(debug_level) = env::var("SERVER_DEBUG_LEVEL") {
        config.server.debug_level = debug_level;
    }

    if let Ok(endpoints_file) = env::var("ENDPOINTS_FILE") {
        config.storage.endpoints_file = endpoints_file;
    }

    if let Ok(settings_file) = env::var("SETTINGS_FILE") {
        config.storage.settings_file = settings_file;
    }

    if let Ok(legacy_prefix) = env::var("LEGACY_PREFIX") {
        config.routing.legacy_prefix = legacy_prefix;
    }
}

impl Config {
    /// Validates all configuration settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.is_empty() {
            return Err(ConfigError::ValidationError(
                "Server host cannot be empty".into(),
            ));
        }

        if self.storage.endpoints_file.is_empty() || self.storage.settings_file.is_empty() {
            return Err(ConfigError::ValidationError(
                "Storage file paths cannot be empty".into(),
            ));
        }

        // The prefix becomes a single route segment.
        let prefix = &self.routing.legacy_prefix;
        if prefix.is_empty() || prefix.contains('/') || prefix.contains('{') {
            return Err(ConfigError::ValidationError(format!(
                "Legacy prefix must be a single non-empty path segment, got {:?}",
                prefix
            )));
        }

        // These first segments already carry fixed routes.
        if RESERVED_PREFIXES.contains(&prefix.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Legacy prefix {:?} collides with a built-in route",
                prefix
            )));
        }

        Ok(())
    }
}

const RESERVED_PREFIXES: [&str; 3] = ["api", "config", "system-config"];
