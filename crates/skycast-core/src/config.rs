use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::ConfigError;

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Add an error
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            return String::new();
        }
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application configuration directory (also holds the cache database)
    pub config_dir: PathBuf,

    /// Remote forecast endpoint settings
    #[serde(default)]
    pub forecast: ForecastConfig,

    /// Durable cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Banner/staleness thresholds
    #[serde(default)]
    pub status: StatusConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastConfig {
    /// Base URL; forecasts are fetched from `<base_url>/forecasts/<data_source>`
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Backend profile tag, e.g. "real" or "mock"
    #[serde(default = "default_data_source")]
    pub data_source: String,

    /// Bearer token sent with every request (can be set via SKYCAST_API_TOKEN)
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Hard timeout per attempt, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_base_url() -> String {
    "http://localhost:8080/api".to_string()
}

fn default_data_source() -> String {
    "real".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    2
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            data_source: default_data_source(),
            auth_token: std::env::var("SKYCAST_API_TOKEN").ok(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Version tag written into every cache entry; mismatches are discarded on load
    #[serde(default = "default_schema_version")]
    pub schema_version: String,

    /// Storage key of the forecast cache entry
    #[serde(default = "default_cache_key")]
    pub cache_key: String,

    /// Prefix of per-timestamp banner dismissal keys
    #[serde(default = "default_dismissal_key_prefix")]
    pub dismissal_key_prefix: String,

    /// SQLite file name, relative to `config_dir`
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// Maximum bytes the store may hold
    #[serde(default = "default_quota_bytes")]
    pub quota_bytes: u64,
}

fn default_schema_version() -> String {
    "1.0".to_string()
}

fn default_cache_key() -> String {
    "skycast.forecast_cache".to_string()
}

fn default_dismissal_key_prefix() -> String {
    "skycast.banner_dismissed.".to_string()
}

fn default_database_file() -> String {
    "skycast.db".to_string()
}

fn default_quota_bytes() -> u64 {
    5 * 1024 * 1024
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            cache_key: default_cache_key(),
            dismissal_key_prefix: default_dismissal_key_prefix(),
            database_file: default_database_file(),
            quota_bytes: default_quota_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    /// Cached data older than this shows the "may be outdated" warning
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    /// Cached data older than this is classified as very old
    #[serde(default = "default_very_old_after_secs")]
    pub very_old_after_secs: u64,
}

fn default_stale_after_secs() -> u64 {
    5 * 60
}

fn default_very_old_after_secs() -> u64 {
    24 * 60 * 60
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after_secs(),
            very_old_after_secs: default_very_old_after_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("skycast");

        Self {
            config_dir,
            forecast: ForecastConfig::default(),
            cache: CacheConfig::default(),
            status: StatusConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating it if it doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path, writing defaults there if missing
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            tracing::info!("No config at {}, writing defaults", config_path.display());
            let mut config = Self::default();
            if let Some(parent) = config_path.parent() {
                config.config_dir = parent.to_path_buf();
            }
            config.save_to(config_path)?;
            return Ok(config);
        }

        let contents =
            std::fs::read_to_string(config_path).context("Failed to read config file")?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(e.to_string()))
            .context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings.
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        let config = Self::load()?;
        let validation = config.validate();

        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.error_summary()).into());
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    /// Validate the configuration
    ///
    /// Returns a ValidationResult containing any errors or warnings.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.validate_url(&self.forecast.base_url, "forecast.base_url", &mut result);

        let source = &self.forecast.data_source;
        if source.is_empty() {
            result.add_error("forecast.data_source", "Data source must not be empty");
        } else if !source
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            result.add_error(
                "forecast.data_source",
                format!("Data source must be a plain path segment, got: {}", source),
            );
        }

        if self.forecast.timeout_ms == 0 {
            result.add_error("forecast.timeout_ms", "Timeout must be greater than 0");
        }

        if self.forecast.max_retries > 10 {
            result.add_warning(
                "forecast.max_retries",
                "More than 10 retries can block a refresh for a long time",
            );
        }

        if self.forecast.auth_token.as_deref().map_or(true, str::is_empty) {
            result.add_warning(
                "forecast.auth_token",
                "No API token configured - requests will be unauthenticated",
            );
        }

        if self.cache.schema_version.is_empty() {
            result.add_error("cache.schema_version", "Schema version must not be empty");
        }
        if self.cache.cache_key.is_empty() {
            result.add_error("cache.cache_key", "Cache key must not be empty");
        }
        if self.cache.dismissal_key_prefix.is_empty() {
            result.add_error(
                "cache.dismissal_key_prefix",
                "Dismissal key prefix must not be empty",
            );
        } else if self.cache.cache_key.starts_with(&self.cache.dismissal_key_prefix) {
            result.add_error(
                "cache.dismissal_key_prefix",
                "Cache key must not share the dismissal key prefix",
            );
        }
        if self.cache.quota_bytes == 0 {
            result.add_error("cache.quota_bytes", "Quota must be greater than 0");
        }

        if self.status.stale_after_secs == 0 {
            result.add_error("status.stale_after_secs", "Stale threshold must be greater than 0");
        } else if self.status.stale_after_secs >= self.status.very_old_after_secs {
            result.add_warning(
                "status.stale_after_secs",
                "Stale threshold is not shorter than the very-old threshold",
            );
        }

        result
    }

    /// Validate a URL field
    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }

                if let Some(port) = url.port() {
                    if port == 0 {
                        result.add_error(field_name, "Port cannot be 0");
                    }
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Path of the SQLite cache database
    pub fn database_path(&self) -> PathBuf {
        self.config_dir.join(&self.cache.database_file)
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Get the path to the configuration file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| ConfigError::NotFound("platform config directory".into()))?
            .join("skycast");

        Ok(config_dir.join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.forecast.auth_token = Some("token".into());
        config
    }

    #[test]
    fn test_valid_default_config() {
        let config = Config::default();
        let result = config.validate();
        assert!(result.is_valid(), "Default config should be valid: {:?}", result.errors);
    }

    #[test]
    fn test_default_thresholds() {
        let config = Config::default();
        assert_eq!(config.status.stale_after_secs, 300);
        assert_eq!(config.status.very_old_after_secs, 86_400);
        assert_eq!(config.cache.schema_version, "1.0");
    }

    #[test]
    fn test_invalid_url() {
        let mut config = test_config();
        config.forecast.base_url = "not-a-url".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.field == "forecast.base_url"));
    }

    #[test]
    fn test_invalid_url_scheme() {
        let mut config = test_config();
        config.forecast.base_url = "ftp://localhost:8080".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.message.contains("http or https")));
    }

    #[test]
    fn test_data_source_must_be_path_segment() {
        let mut config = test_config();
        config.forecast.data_source = "../admin".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.field == "forecast.data_source"));
    }

    #[test]
    fn test_zero_timeout_is_error() {
        let mut config = test_config();
        config.forecast.timeout_ms = 0;
        let result = config.validate();
        assert!(result.errors.iter().any(|e| e.field == "forecast.timeout_ms"));
    }

    #[test]
    fn test_inverted_thresholds_is_warning() {
        let mut config = test_config();
        config.status.stale_after_secs = 90_000;
        let result = config.validate();
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.field == "status.stale_after_secs"));
    }

    #[test]
    fn test_cache_key_inside_dismissal_namespace_is_error() {
        let mut config = test_config();
        config.cache.cache_key = "skycast.banner_dismissed.cache".into();
        let result = config.validate();
        assert!(result.errors.iter().any(|e| e.field == "cache.dismissal_key_prefix"));
    }

    #[test]
    fn test_missing_token_is_warning() {
        let mut config = test_config();
        config.forecast.auth_token = None;
        let result = config.validate();
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.field == "forecast.auth_token"));
    }

    #[test]
    fn test_load_from_creates_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.config_dir, dir.path());
        assert_eq!(config.forecast.max_retries, 2);
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "config_dir = \"/tmp/skycast\"\n[forecast]\ndata_source = \"mock\"\ntimeout_ms = 2500\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.forecast.data_source, "mock");
        assert_eq!(config.forecast.timeout_ms, 2500);
        assert_eq!(config.forecast.max_retries, 2);
        assert_eq!(config.status.stale_after_secs, 300);
        assert_eq!(config.database_path(), PathBuf::from("/tmp/skycast/skycast.db"));
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is = = not toml").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.downcast_ref::<ConfigError>().is_some());
    }

    #[test]
    fn test_validation_result_error_summary() {
        let mut result = ValidationResult::default();
        result.add_error("field1", "error1");
        result.add_error("field2", "error2");
        let summary = result.error_summary();
        assert!(summary.contains("field1"));
        assert!(summary.contains("field2"));
    }
}
