//! Token storage abstraction.
//!
//! The executor never persists credentials itself; it reads and writes through
//! a [`TokenStore`]. Platform frontends back this with their secure storage
//! (keychain, keystore); tests and the CLI use [`MemoryTokenStore`].

use async_trait::async_trait;
use tokio::sync::RwLock;

/// An access token plus its optional refresh companion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    /// Bearer token attached to authenticated requests.
    pub access_token: String,
    /// Token exchanged for a fresh pair when the access token expires.
    pub refresh_token: Option<String>,
}

impl TokenPair {
    /// Creates a pair holding both tokens.
    #[must_use]
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: Some(refresh_token.into()),
        }
    }

    /// Creates a pair holding only an access token.
    #[must_use]
    pub fn access_only(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
        }
    }
}

/// Get/set/clear interface over wherever credentials actually live.
///
/// All executor reads and writes go through this seam, so a successful refresh
/// is visible to every concurrent caller the moment it lands.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Returns the currently held tokens, if any.
    async fn get(&self) -> Option<TokenPair>;

    /// Replaces the held tokens.
    async fn set(&self, tokens: TokenPair);

    /// Drops the held tokens.
    async fn clear(&self);
}

/// In-memory token store for tests and short-lived processes.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    inner: RwLock<Option<TokenPair>>,
}

impl MemoryTokenStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-seeded with tokens.
    #[must_use]
    pub fn with_tokens(tokens: TokenPair) -> Self {
        Self {
            inner: RwLock::new(Some(tokens)),
        }
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(&self) -> Option<TokenPair> {
        self.inner.read().await.clone()
    }

    async fn set(&self, tokens: TokenPair) {
        *self.inner.write().await = Some(tokens);
    }

    async fn clear(&self) {
        *self.inner.write().await = None;
    }
}
