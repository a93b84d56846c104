// Error types for estate-client
// Author: kelexine (https://github.com/kelexine)

use serde_json::{json, Value};
use thiserror::Error;

/// Every failure the client and cache layers can surface to a caller.
///
/// The type is `Clone` so that a single network result can be handed to
/// every caller that joined a coalesced in-flight request.
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("Offline: {0}")]
    Offline(String),

    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        code: String,
        message: String,
        details: Option<Value>,
    },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Machine-readable error code.
    ///
    /// HTTP errors carry the server-provided code when the body had one,
    /// otherwise `HTTP_<status>`.
    pub fn code(&self) -> &str {
        match self {
            ApiError::Offline(_) => "OFFLINE",
            ApiError::Timeout { .. } => "TIMEOUT",
            ApiError::Cancelled => "CANCELLED",
            ApiError::Network(_) => "NETWORK_ERROR",
            ApiError::Http { code, .. } => code,
            ApiError::Decode(_) => "DECODE_ERROR",
            ApiError::InvalidRequest(_) => "INVALID_REQUEST",
            ApiError::Config(_) => "CONFIG_ERROR",
            ApiError::Storage(_) => "STORAGE_ERROR",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP-like status. Transport failures that never produced a response report 0.
    pub fn status(&self) -> u16 {
        match self {
            ApiError::Offline(_) | ApiError::Network(_) => 0,
            ApiError::Timeout { .. } => 408,
            ApiError::Cancelled => 499,
            ApiError::Http { status, .. } => *status,
            ApiError::InvalidRequest(_) => 400,
            ApiError::Decode(_)
            | ApiError::Config(_)
            | ApiError::Storage(_)
            | ApiError::Internal(_) => 500,
        }
    }

    /// Detail payload extracted from the server response, if any.
    pub fn details(&self) -> Option<&Value> {
        match self {
            ApiError::Http { details, .. } => details.as_ref(),
            _ => None,
        }
    }

    /// Whether repeating the same call could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Network(_) | ApiError::Timeout { .. } => true,
            ApiError::Http { status, .. } => crate::utils::retry::is_retryable(*status),
            _ => false,
        }
    }

    /// Render as the JSON error envelope used in CLI output.
    pub fn to_json(&self) -> Value {
        let mut error = json!({
            "code": self.code(),
            "status": self.status(),
            "message": self.to_string(),
        });
        if let Some(details) = self.details() {
            error["details"] = details.clone();
        }

        json!({
            "type": "error",
            "error": error,
        })
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else if err.is_builder() {
            ApiError::InvalidRequest(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Decode(err.to_string())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::Storage(err.to_string())
    }
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
