// Configuration management for trellis handler mappings

pub mod env;
pub mod error;
pub mod loader;
pub mod settings;
pub mod validation;

pub use env::EnvLoader;
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};
pub use settings::{CorsSettings, MappingSettings, NamingSettings};
pub use validation::{ConfigValidator, Validate};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use trellis_core::logging::debug;

/// Key under which file configuration nests the mapping settings.
pub const MAPPING_KEY: &str = "mapping";

/// Flat keys that override the nested mapping settings, as set from the
/// environment (`TRELLIS_URL_DECODE=false`).
const MAPPING_OVERRIDES: [&str; 4] = [
    "detect_in_ancestor_contexts",
    "url_decode",
    "naming",
    "log_level",
];

/// Main configuration manager
///
/// A key/value store filled from the environment, `.env` files and config
/// files. Later loads override earlier ones.
#[derive(Clone)]
pub struct ConfigManager {
    config: Arc<RwLock<HashMap<String, Value>>>,
    env_prefix: Option<String>,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            config: Arc::new(RwLock::new(HashMap::new())),
            env_prefix: None,
        }
    }

    /// Create with environment variable prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            env_prefix: Some(prefix.into()),
            ..Self::new()
        }
    }

    /// Load configuration from environment variables
    pub fn load_env(&self) -> Result<()> {
        let loader = EnvLoader::new(self.env_prefix.clone());
        let env_vars = loader.load_values()?;
        debug!(count = env_vars.len(), prefix = ?self.env_prefix, "Loaded environment configuration");

        let mut config = self.config.write();
        config.extend(env_vars);
        Ok(())
    }

    /// Load configuration from a .env file, then from the environment
    ///
    /// Without a path a missing `.env` is not an error.
    pub fn load_dotenv(&self, path: Option<&Path>) -> Result<()> {
        match path {
            Some(path) => {
                dotenvy::from_path(path).map_err(|e| ConfigError::LoadError(e.to_string()))?;
            }
            None => {
                dotenvy::dotenv().ok();
            }
        }
        self.load_env()
    }

    /// Load configuration from file
    pub fn load_file(&self, path: impl AsRef<Path>, format: FileFormat) -> Result<()> {
        let path = path.as_ref();
        let data = ConfigLoader::new(format).load_file(path)?;
        debug!(path = %path.display(), format = ?format, "Loaded configuration file");
        self.merge_value(data)
    }

    /// Load a file, picking the format from its extension
    pub fn load_file_auto(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let format = ConfigLoader::auto(path)?.format();
        self.load_file(path, format)
    }

    fn merge_value(&self, data: Value) -> Result<()> {
        match data {
            Value::Object(map) => {
                let mut config = self.config.write();
                config.extend(map);
                Ok(())
            }
            other => Err(ConfigError::ParseError(format!(
                "configuration root must be a table, found {}",
                other
            ))),
        }
    }

    /// Set a configuration value
    pub fn set<T: serde::Serialize>(&self, key: &str, value: T) -> Result<()> {
        let json_value = serde_json::to_value(value)
            .map_err(|e| ConfigError::SerializationError(e.to_string()))?;

        self.config.write().insert(key.to_string(), json_value);
        Ok(())
    }

    /// Get a configuration value
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .config
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| ConfigError::KeyNotFound(key.to_string()))?;

        serde_json::from_value(value).map_err(|e| ConfigError::DeserializationError(e.to_string()))
    }

    /// Get a configuration value with default
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    pub fn get_string(&self, key: &str) -> Result<String> {
        self.get(key)
    }

    pub fn get_int(&self, key: &str) -> Result<i64> {
        self.get(key)
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        self.get(key)
    }

    /// Check if a key exists
    pub fn has(&self, key: &str) -> bool {
        self.config.read().contains_key(key)
    }

    /// All configuration keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.config.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Copy every value of `other` into this manager
    pub fn merge(&self, other: &ConfigManager) {
        if Arc::ptr_eq(&self.config, &other.config) {
            return;
        }
        let other_config = other.config.read().clone();
        self.config.write().extend(other_config);
    }

    /// Deserialize the whole store into `T` and validate it
    pub fn load_validated<T: DeserializeOwned + Validate>(&self) -> Result<T> {
        let json_value = Value::Object(
            self.config
                .read()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        );

        let validated: T = serde_json::from_value(json_value)
            .map_err(|e| ConfigError::DeserializationError(e.to_string()))?;
        validated.validate()?;
        Ok(validated)
    }

    /// Mapping settings from the `mapping` table, with flat keys such as
    /// `url_decode` taking precedence, validated.
    pub fn mapping_settings(&self) -> Result<MappingSettings> {
        let section = {
            let config = self.config.read();
            let mut section = match config.get(MAPPING_KEY) {
                Some(Value::Object(map)) => map.clone(),
                Some(other) => {
                    return Err(ConfigError::ValidationError(format!(
                        "'{}' must be a table, found {}",
                        MAPPING_KEY, other
                    )));
                }
                None => serde_json::Map::new(),
            };
            for key in MAPPING_OVERRIDES {
                if let Some(value) = config.get(key) {
                    section.insert(key.to_string(), value.clone());
                }
            }
            section
        };

        let settings: MappingSettings = serde_json::from_value(Value::Object(section))
            .map_err(|e| ConfigError::DeserializationError(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigManager")
            .field("keys", &self.keys())
            .field("env_prefix", &self.env_prefix)
            .finish()
    }
}
