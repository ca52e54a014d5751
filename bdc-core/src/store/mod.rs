//! Token cache storage.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for sensitive values that prevents accidental logging
//! - [`TokenStore`] - Trait for per-host token cache backends
//! - [`FileTokenStore`] - JSON file backend (`~/.catalyst-bdc/tokens.json`)
//! - [`MemoryTokenStore`] - In-memory backend for testing
//!
//! # Storage Key Convention
//!
//! Token sets are keyed by the hostname of the service URL, so
//! `https://tenant.eu10.hcs.cloud.sap/` and `https://tenant.eu10.hcs.cloud.sap`
//! share one entry.
//!
//! # Example
//!
//! ```rust,ignore
//! use bdc_core::store::{FileTokenStore, TokenStore};
//!
//! let store = FileTokenStore::with_default_path()?;
//! if let Some(tokens) = store.load("https://tenant.eu10.hcs.cloud.sap").await? {
//!     println!("cached token expires at {}", tokens.expires_after);
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

mod file;
mod memory;

pub use file::FileTokenStore;
pub use memory::MemoryTokenStore;

use crate::token::OAuthTokenSet;

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value,
/// and the backing buffer is zeroed when the secret is dropped.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the secret holds an empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

/// Error type for token store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The host could not be turned into a cache key.
    #[error("invalid host URL {host:?}: {message}")]
    InvalidHost { host: String, message: String },

    /// I/O error reading or writing the cache file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The home directory could not be determined.
    #[error("home directory not available")]
    HomeDirUnavailable,
}

/// Abstraction over token cache backends.
///
/// Reads and writes are whole-entry: a saved [`OAuthTokenSet`] replaces any
/// previous entry for the same host.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Load the cached token set for a host.
    ///
    /// Returns `Ok(None)` if nothing is cached for the host.
    async fn load(&self, host: &str) -> Result<Option<OAuthTokenSet>, StoreError>;

    /// Persist the token set for a host, replacing any previous entry.
    async fn save(&self, host: &str, tokens: &OAuthTokenSet) -> Result<(), StoreError>;

    /// Remove the cached token set for a host.
    ///
    /// Removing a host with no entry is not an error.
    async fn remove(&self, host: &str) -> Result<(), StoreError>;
}

/// Derive the cache key (the hostname) for a service URL.
pub fn host_key(host: &str) -> Result<String, StoreError> {
    let url = url::Url::parse(host).map_err(|e| StoreError::InvalidHost {
        host: host.to_string(),
        message: e.to_string(),
    })?;

    url.host_str()
        .map(|h| h.to_string())
        .ok_or_else(|| StoreError::InvalidHost {
            host: host.to_string(),
            message: "URL has no hostname".to_string(),
        })
}
