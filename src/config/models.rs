//! Configuration data structures for the estate client.
//!
//! This module defines the schema for the client settings: the upstream
//! API, response caching, session storage, retry pacing and logging.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use crate::cache::CacheConfig;
use crate::utils::retry::RetryStrategy;
use serde::{Deserialize, Serialize};

/// The root configuration object.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Upstream REST API settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// Response cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Session token storage and login routing.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Pacing for the opt-in retry utility.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Logging and observability settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings for the upstream portfolio API connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL every relative request path is joined onto.
    /// Default: `http://localhost:3001/api`
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Deadline for a whole request (send + body) in milliseconds.
    /// Default: `30000`
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// TCP connect timeout in milliseconds.
    /// Default: `10000`
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Share one network call between concurrent identical GET/HEAD requests.
    /// Default: `true`
    #[serde(default = "default_true")]
    pub coalesce_requests: bool,
}

/// Settings for the persisted session token and 401 handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Key-value storage file holding the auth token.
    /// Default: `~/.estate-client/storage.json`
    #[serde(default = "default_storage_path")]
    pub storage_path: String,

    /// Route the session is sent to when the API answers 401.
    /// Default: `/login`
    #[serde(default = "default_login_route")]
    pub login_route: String,

    /// Route the session starts on.
    /// Default: `/`
    #[serde(default = "default_initial_route")]
    pub initial_route: String,
}

/// Settings for the retry utility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Upper bound on attempts, including the first one.
    /// Default: `3`
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay between attempts in milliseconds.
    /// Default: `1000`
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,

    /// `fixed`, `linear` or `exponential`.
    /// Default: `linear`
    #[serde(default)]
    pub strategy: RetryStrategy,
}

/// Settings for application logging and output format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum log level (`trace`, `debug`, `info`, `warn`, `error`).
    /// Default: `info`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format for logs (`pretty`, `json`, `compact`).
    /// Default: `pretty`
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Whether to mask tokens in logged error bodies.
    /// Default: `true`
    #[serde(default = "default_true")]
    pub sanitize_tokens: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            coalesce_requests: true,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            storage_path: default_storage_path(),
            login_route: default_login_route(),
            initial_route: default_initial_route(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_retry_delay_ms(),
            strategy: RetryStrategy::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            sanitize_tokens: true,
        }
    }
}

// Helper functions for serde defaults
fn default_base_url() -> String {
    "http://localhost:3001/api".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_storage_path() -> String {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".estate-client")
        .join("storage.json")
        .to_string_lossy()
        .to_string()
}

fn default_login_route() -> String {
    "/login".to_string()
}

fn default_initial_route() -> String {
    "/".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}
