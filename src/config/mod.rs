// Configuration module
// Author: kelexine (https://github.com/kelexine)

mod models;

pub use models::*;

use crate::error::{ApiError, Result};
use config::{Config, Environment, File};
use std::path::{Path, PathBuf};

impl AppConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (highest)
    /// 2. Config file
    /// 3. Defaults (lowest)
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Same as [`AppConfig::load`], reading `path` instead of the default
    /// config file. An explicit path must exist.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path.to_path_buf()).required(true),
            None => File::with_name(&Self::default_config_path()).required(false),
        };

        let config = Config::builder()
            // Start with defaults
            .add_source(Config::try_from(&Self::default())?)
            .add_source(file)
            // Override with environment variables, e.g. ESTATE_CLIENT__API__BASE_URL
            .add_source(
                Environment::with_prefix("ESTATE_CLIENT")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .map_err(|e| ApiError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| ApiError::Config(e.to_string()))
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ApiError::Config(e.to_string()))
    }

    fn default_config_path() -> String {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".estate-client")
            .join("config.toml")
            .to_string_lossy()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::retry::RetryStrategy;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.api.timeout_ms, 30_000);
        assert!(config.api.coalesce_requests);
        assert_eq!(config.cache.cleanup_interval_ms, 60_000);
        assert!((config.cache.stale_ratio - 0.3).abs() < f64::EPSILON);
        assert_eq!(config.auth.login_route, "/login");
        assert_eq!(config.retry.strategy, RetryStrategy::Linear);
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[api]\nbase_url = \"https://portfolio.example.com/api\"\ntimeout_ms = 5000\n\n[cache]\nmax_entries = 7\n\n[retry]\nstrategy = \"exponential\""
        )
        .unwrap();

        let config = AppConfig::load_from(Some(file.path())).unwrap();
        assert_eq!(config.api.base_url, "https://portfolio.example.com/api");
        assert_eq!(config.api.timeout_ms, 5000);
        assert_eq!(config.cache.max_entries, 7);
        assert_eq!(config.cache.default_ttl_ms, 300_000);
        assert_eq!(config.retry.strategy, RetryStrategy::Exponential);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = AppConfig::load_from(Some(Path::new("/nonexistent/estate.toml")));
        assert!(matches!(result, Err(ApiError::Config(_))));
    }

    #[test]
    fn test_to_toml_round_trips_sections() {
        let rendered = AppConfig::default().to_toml().unwrap();
        assert!(rendered.contains("[api]"));
        assert!(rendered.contains("[cache]"));
        assert!(rendered.contains("stale_ratio"));
    }
}
