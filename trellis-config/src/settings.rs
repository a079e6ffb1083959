//! Handler mapping settings.
//!
//! ```toml
//! [mapping]
//! detect_in_ancestor_contexts = false
//! url_decode = true
//! naming = "initials"
//! log_level = "debug"
//!
//! [mapping.cors."/api/**"]
//! allowed_origins = ["https://app.example.com"]
//! allowed_methods = ["GET", "POST"]
//! allow_credentials = true
//! max_age = 3600
//! ```

use crate::validation::{ConfigValidator, Validate};
use crate::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use trellis_core::logging::{LogConfig, LogLevel};
use trellis_core::{
    CorsConfig, HandlerMethodMapping, HttpMethod, InitialsNamingStrategy, MappingOptions,
    MappingStrategy, NamingStrategy, RouteMapping,
};

/// How registrations get their logical names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamingSettings {
    /// Registrations are not named
    #[default]
    None,
    /// [`InitialsNamingStrategy`]
    Initials,
}

/// CORS settings for one path pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsSettings {
    pub allowed_origins: Vec<String>,
    /// Wildcard origin patterns such as `https://*.example.com`
    pub allowed_origin_patterns: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub exposed_headers: Vec<String>,
    pub allow_credentials: bool,
    /// Seconds; unset keeps the default of 30 minutes
    pub max_age: Option<u64>,
}

impl Default for CorsSettings {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allowed_origin_patterns: Vec::new(),
            allowed_methods: vec!["GET".to_string(), "HEAD".to_string(), "POST".to_string()],
            allowed_headers: Vec::new(),
            exposed_headers: Vec::new(),
            allow_credentials: false,
            max_age: None,
        }
    }
}

impl CorsSettings {
    pub fn to_cors_config(&self) -> Result<CorsConfig> {
        let mut config = CorsConfig::new()
            .allow_methods(self.allowed_methods.clone())
            .allow_credentials(self.allow_credentials);
        for origin in &self.allowed_origins {
            config = config.allow_origin(origin.as_str());
        }
        for pattern in &self.allowed_origin_patterns {
            config = config.allow_origin_pattern(pattern.as_str());
        }
        if !self.allowed_headers.is_empty() {
            config = config.allow_headers(self.allowed_headers.clone());
        }
        if !self.exposed_headers.is_empty() {
            config = config.expose_headers(self.exposed_headers.clone());
        }
        if let Some(max_age) = self.max_age {
            config = config.max_age(max_age);
        }
        config.validate_allow_credentials()?;
        Ok(config)
    }
}

impl Validate for CorsSettings {
    fn validate(&self) -> Result<()> {
        for origin in &self.allowed_origins {
            ConfigValidator::is_origin(origin, "cors.allowed_origins")?;
        }
        for pattern in &self.allowed_origin_patterns {
            ConfigValidator::not_empty(pattern, "cors.allowed_origin_patterns")?;
        }
        for method in &self.allowed_methods {
            if method != "*" && HttpMethod::parse(method).is_none() {
                return Err(ConfigError::ValidationError(format!(
                    "cors.allowed_methods: unknown HTTP method '{}'",
                    method
                )));
            }
        }
        if self.allow_credentials && self.allowed_origins.iter().any(|o| o == "*") {
            return Err(ConfigError::ValidationError(
                "cors: allow_credentials cannot be combined with origin '*'; \
                 use allowed_origin_patterns = [\"*\"] instead"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Settings for a [`HandlerMethodMapping`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingSettings {
    pub detect_in_ancestor_contexts: bool,
    pub url_decode: bool,
    pub naming: NamingSettings,
    /// Global CORS configs by path pattern
    pub cors: BTreeMap<String, CorsSettings>,
    pub log_level: Option<String>,
}

impl Default for MappingSettings {
    fn default() -> Self {
        let options = MappingOptions::default();
        Self {
            detect_in_ancestor_contexts: options.detect_in_ancestor_contexts,
            url_decode: options.url_decode,
            naming: NamingSettings::default(),
            cors: BTreeMap::new(),
            log_level: None,
        }
    }
}

impl MappingSettings {
    pub fn options(&self) -> MappingOptions {
        MappingOptions {
            detect_in_ancestor_contexts: self.detect_in_ancestor_contexts,
            url_decode: self.url_decode,
        }
    }

    pub fn naming_strategy(&self) -> Option<Arc<dyn NamingStrategy<RouteMapping>>> {
        match self.naming {
            NamingSettings::None => None,
            NamingSettings::Initials => Some(Arc::new(InitialsNamingStrategy)),
        }
    }

    /// Global CORS configs, longest pattern first.
    ///
    /// The mapping applies the first pattern that matches, so `/api/**`
    /// is tried before `/**`.
    pub fn cors_mappings(&self) -> Result<Vec<(String, CorsConfig)>> {
        let mut patterns: Vec<&String> = self.cors.keys().collect();
        patterns.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        patterns
            .into_iter()
            .map(|pattern| Ok((pattern.clone(), self.cors[pattern].to_cors_config()?)))
            .collect()
    }

    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level.as_deref().and_then(LogLevel::parse)
    }

    /// Logging setup at the configured level, otherwise the defaults.
    pub fn log_config(&self) -> LogConfig {
        match self.log_level() {
            Some(level) => LogConfig::new().level(level),
            None => LogConfig::new(),
        }
    }

    /// Apply these settings to a mapping that has not been initialized yet.
    pub fn apply<S>(
        &self,
        mapping: HandlerMethodMapping<RouteMapping, S>,
    ) -> Result<HandlerMethodMapping<RouteMapping, S>>
    where
        S: MappingStrategy<RouteMapping>,
    {
        self.validate()?;
        let mut mapping = mapping.with_options(self.options());
        if let Some(naming) = self.naming_strategy() {
            mapping = mapping.with_naming_strategy(naming);
        }
        for (pattern, config) in self.cors_mappings()? {
            mapping = mapping.with_cors_mapping(pattern, config);
        }
        Ok(mapping)
    }
}

impl Validate for MappingSettings {
    fn validate(&self) -> Result<()> {
        if let Some(level) = &self.log_level {
            if LogLevel::parse(level).is_none() {
                return Err(ConfigError::ValidationError(format!(
                    "log_level: unknown level '{}'",
                    level
                )));
            }
        }
        for (pattern, cors) in &self.cors {
            ConfigValidator::is_path_pattern(pattern, "cors")?;
            cors.validate()?;
        }
        Ok(())
    }
}
