//! Token storage backends.
//!
//! `FileTokenStore` keeps a small JSON key-value document on disk (other keys
//! in the document are preserved) and enforces owner-only permissions.
//! `MemoryTokenStore` is the in-process variant used by tests and embedders.

// Author: kelexine (https://github.com/kelexine)

use super::{AuthToken, TokenStore, AUTH_TOKEN_KEY};
use crate::error::{ApiError, Result};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::fs;
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct FileTokenStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles on the document.
    write_lock: Mutex<()>,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }

        Self::validate_permissions(&self.path)?;

        let contents = fs::read_to_string(&self.path)
            .map_err(|e| ApiError::Storage(format!("Failed to read token storage: {}", e)))?;
        if contents.trim().is_empty() {
            return Ok(Map::new());
        }

        match serde_json::from_str::<Value>(&contents) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(ApiError::Storage(
                "Token storage is not a JSON object".to_string(),
            )),
            Err(e) => Err(ApiError::Storage(format!(
                "Invalid token storage JSON format: {}",
                e
            ))),
        }
    }

    fn write_document(&self, document: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(document)
            .map_err(|e| ApiError::Internal(format!("Serialization failure: {}", e)))?;

        let mut file = fs::File::create(&self.path).map_err(|e| {
            ApiError::Storage(format!("Failed to truncate/create token storage: {}", e))
        })?;

        #[cfg(unix)]
        {
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }

        file.write_all(json.as_bytes())
            .map_err(|e| ApiError::Storage(format!("Disk write failure: {}", e)))?;

        Ok(())
    }

    /// Ensures the storage file is owner-only (0600 or 0400).
    fn validate_permissions(path: &Path) -> Result<()> {
        #[cfg(unix)]
        {
            let mode = fs::metadata(path)?.permissions().mode() & 0o777;
            if mode != 0o600 && mode != 0o400 {
                warn!(
                    "Insecure permissions on {}: {:o} (expected 0600)",
                    path.display(),
                    mode
                );
                return Err(ApiError::Storage(format!(
                    "Insecure file permissions: {:o}. Token storage requires 0600 (rw-------).",
                    mode
                )));
            }
        }

        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<AuthToken>> {
        let document = self.read_document()?;
        Ok(document
            .get(AUTH_TOKEN_KEY)
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .map(AuthToken::new))
    }

    fn save(&self, token: &AuthToken) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut document = self.read_document()?;
        document.insert(
            AUTH_TOKEN_KEY.to_string(),
            Value::String(token.as_str().to_string()),
        );
        self.write_document(&document)?;
        debug!("Saved auth token to {}", self.path.display());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut document = self.read_document()?;
        if document.remove(AUTH_TOKEN_KEY).is_some() {
            self.write_document(&document)?;
            debug!("Cleared auth token from {}", self.path.display());
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: RwLock<Option<AuthToken>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: AuthToken) -> Self {
        Self {
            token: RwLock::new(Some(token)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<AuthToken>> {
        Ok(self.token.read().clone())
    }

    fn save(&self, token: &AuthToken) -> Result<()> {
        *self.token.write() = Some(token.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.token.write() = None;
        Ok(())
    }
}
