// Environment variable loading

use crate::{ConfigError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::env;

/// Prefix used by [`EnvLoader::trellis`].
pub const DEFAULT_PREFIX: &str = "TRELLIS";

/// Environment variable loader
///
/// With a prefix, only variables starting with it are read and the prefix is
/// stripped: `TRELLIS_URL_DECODE` becomes `url_decode`.
#[derive(Debug, Clone, Default)]
pub struct EnvLoader {
    prefix: Option<String>,
}

impl EnvLoader {
    pub fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    /// Loader for `TRELLIS_*` variables
    pub fn trellis() -> Self {
        Self::new(Some(DEFAULT_PREFIX.to_string()))
    }

    /// Load all matching environment variables as raw strings
    pub fn load(&self) -> Result<HashMap<String, String>> {
        Ok(self.collect(env::vars()))
    }

    /// Load all matching environment variables, typing booleans and numbers
    pub fn load_values(&self) -> Result<HashMap<String, Value>> {
        Ok(self
            .load()?
            .into_iter()
            .map(|(key, raw)| (key, parse_value(&raw)))
            .collect())
    }

    fn collect<I>(&self, vars: I) -> HashMap<String, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config = HashMap::new();
        for (key, value) in vars {
            match &self.prefix {
                Some(prefix) => {
                    if let Some(rest) = key.strip_prefix(prefix.as_str()) {
                        let trimmed = rest.trim_start_matches('_');
                        if !trimmed.is_empty() {
                            config.insert(trimmed.to_lowercase(), value);
                        }
                    }
                }
                None => {
                    config.insert(key.to_lowercase(), value);
                }
            }
        }
        config
    }

    /// Load a specific environment variable
    pub fn load_var(&self, key: &str) -> Result<String> {
        env::var(self.full_key(key)).map_err(ConfigError::EnvError)
    }

    /// Load with default value
    pub fn load_var_or(&self, key: &str, default: &str) -> String {
        self.load_var(key).unwrap_or_else(|_| default.to_string())
    }

    fn full_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}_{}", prefix, key.to_uppercase()),
            None => key.to_uppercase(),
        }
    }
}

/// Interpret a raw string the way a config file would: booleans and numbers
/// are typed, anything else stays a string.
pub fn parse_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    match trimmed {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => {
            if let Ok(int) = trimmed.parse::<i64>() {
                Value::from(int)
            } else if let Some(float) = trimmed
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
            {
                Value::Number(float)
            } else {
                Value::String(raw.to_string())
            }
        }
    }
}
