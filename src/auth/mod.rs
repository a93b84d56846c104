// Session token module
// Author: kelexine (https://github.com/kelexine)

mod store;

pub use store::{FileTokenStore, MemoryTokenStore};

use crate::error::Result;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Storage key the session token lives under.
pub const AUTH_TOKEN_KEY: &str = "auth_token";

/// Bearer token for the portfolio API. Wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for the `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

// Custom Debug impl that never logs tokens
impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AuthToken").field(&"[REDACTED]").finish()
    }
}

/// Durable home of the session token.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<AuthToken>>;
    fn save(&self, token: &AuthToken) -> Result<()>;
    fn clear(&self) -> Result<()>;
}
