//! In-memory token store implementation.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{host_key, StoreError, TokenStore};
use crate::token::OAuthTokenSet;

/// In-memory token store for testing and pre-supplied tokens.
///
/// This store is not persistent; data is lost when the process exits.
#[derive(Default)]
pub struct MemoryTokenStore {
    data: RwLock<HashMap<String, OAuthTokenSet>>,
}

impl MemoryTokenStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a memory store seeded with one host's tokens.
    pub fn with_tokens(host: &str, tokens: OAuthTokenSet) -> Result<Self, StoreError> {
        let store = Self::new();
        store.data.write().insert(host_key(host)?, tokens);
        Ok(store)
    }

    /// Number of hosts with cached tokens.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl std::fmt::Debug for MemoryTokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTokenStore")
            .field("hosts_count", &self.len())
            .finish()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self, host: &str) -> Result<Option<OAuthTokenSet>, StoreError> {
        let key = host_key(host)?;
        Ok(self.data.read().get(&key).cloned())
    }

    async fn save(&self, host: &str, tokens: &OAuthTokenSet) -> Result<(), StoreError> {
        let key = host_key(host)?;
        self.data.write().insert(key, tokens.clone());
        Ok(())
    }

    async fn remove(&self, host: &str) -> Result<(), StoreError> {
        let key = host_key(host)?;
        self.data.write().remove(&key);
        Ok(())
    }
}
