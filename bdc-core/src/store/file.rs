//! JSON file token cache.
//!
//! All hosts share one file, a JSON object keyed by hostname:
//!
//! ```json
//! {
//!   "tenant.eu10.hcs.cloud.sap": {
//!     "accessToken": "...",
//!     "refreshToken": "...",
//!     "expiresAfter": 1760000000,
//!     "tokenUrl": "https://tenant.authentication.eu10.hana.ondemand.com/oauth/token",
//!     "clientId": "sb-...",
//!     "clientSecret": "..."
//!   }
//! }
//! ```
//!
//! On unix the file is owner-only (0600); an existing file with looser
//! permissions is tightened on the next write.
//!
//! Every write is a whole-file read-modify-write without file locking, so two
//! processes saving at the same moment can lose one of the updates.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::{host_key, StoreError, TokenStore};
use crate::token::OAuthTokenSet;

type CacheFile = BTreeMap<String, OAuthTokenSet>;

/// Token store backed by a single JSON file.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    /// Create a store at an explicit path.
    ///
    /// The file and its parent directory are created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create a store at [`default_path`](Self::default_path).
    pub fn with_default_path() -> Result<Self, StoreError> {
        Ok(Self::new(Self::default_path()?))
    }

    /// `~/.catalyst-bdc/tokens.json`
    pub fn default_path() -> Result<PathBuf, StoreError> {
        let dirs = directories::BaseDirs::new().ok_or(StoreError::HomeDirUnavailable)?;
        Ok(dirs.home_dir().join(".catalyst-bdc").join("tokens.json"))
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole cache file.
    ///
    /// A missing file is an empty cache. A file that fails to parse is also
    /// treated as empty so a corrupt cache forces a fresh login instead of
    /// wedging every command.
    async fn read_all(&self) -> Result<CacheFile, StoreError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(CacheFile::new()),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str(&contents) {
            Ok(data) => Ok(data),
            Err(e) => {
                warn!("Ignoring unreadable token cache {:?}: {}", self.path, e);
                Ok(CacheFile::new())
            }
        }
    }

    async fn write_all(&self, data: &CacheFile) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let contents = serde_json::to_string_pretty(data)?;
        let mut file = open_private(&self.path).await?;
        file.write_all(contents.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(unix)]
async fn open_private(path: &Path) -> std::io::Result<tokio::fs::File> {
    use std::os::unix::fs::PermissionsExt;

    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .await?;
    // mode only applies on creation
    file.set_permissions(std::fs::Permissions::from_mode(0o600))
        .await?;
    Ok(file)
}

#[cfg(not(unix))]
async fn open_private(path: &Path) -> std::io::Result<tokio::fs::File> {
    tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .await
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self, host: &str) -> Result<Option<OAuthTokenSet>, StoreError> {
        let key = host_key(host)?;
        let mut data = self.read_all().await?;
        let entry = data.remove(&key);
        if entry.is_some() {
            debug!("Loaded cached tokens for {}", key);
        }
        Ok(entry)
    }

    async fn save(&self, host: &str, tokens: &OAuthTokenSet) -> Result<(), StoreError> {
        let key = host_key(host)?;
        let mut data = self.read_all().await?;
        data.insert(key.clone(), tokens.clone());
        self.write_all(&data).await?;
        debug!("Saved tokens to cache for {}", key);
        Ok(())
    }

    async fn remove(&self, host: &str) -> Result<(), StoreError> {
        let key = host_key(host)?;
        let mut data = self.read_all().await?;
        if data.remove(&key).is_some() {
            self.write_all(&data).await?;
            debug!("Removed cached tokens for {}", key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Secret;
    use tempfile::TempDir;

    fn sample_tokens(access: &str) -> OAuthTokenSet {
        OAuthTokenSet {
            access_token: Secret::new(access),
            refresh_token: Secret::new("refresh"),
            expires_after: 1_900_000_000,
            token_url: "https://auth.example.com/oauth/token".to_string(),
            client_id: "sb-client".to_string(),
            client_secret: Secret::new("secret"),
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileTokenStore::new(dir.path().join("tokens.json"));

        let loaded = store.load("https://tenant.example.com").await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_save_creates_parent_and_loads_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("tokens.json");
        let store = FileTokenStore::new(&path);

        store
            .save("https://tenant.example.com/", &sample_tokens("a1"))
            .await
            .unwrap();
        assert!(path.exists());

        let loaded = store
            .load("https://tenant.example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.access_token.expose(), "a1");
        assert_eq!(loaded.expires_after, 1_900_000_000);
    }

    #[tokio::test]
    async fn test_hosts_are_kept_apart() {
        let dir = TempDir::new().unwrap();
        let store = FileTokenStore::new(dir.path().join("tokens.json"));

        store
            .save("https://one.example.com", &sample_tokens("one"))
            .await
            .unwrap();
        store
            .save("https://two.example.com", &sample_tokens("two"))
            .await
            .unwrap();

        let one = store.load("https://one.example.com").await.unwrap().unwrap();
        let two = store.load("https://two.example.com").await.unwrap().unwrap();
        assert_eq!(one.access_token.expose(), "one");
        assert_eq!(two.access_token.expose(), "two");

        store.remove("https://one.example.com").await.unwrap();
        assert!(store.load("https://one.example.com").await.unwrap().is_none());
        assert!(store.load("https://two.example.com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_file_uses_camel_case_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tokens.json");
        let store = FileTokenStore::new(&path);

        store
            .save("https://tenant.example.com", &sample_tokens("a1"))
            .await
            .unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let entry = &raw["tenant.example.com"];
        assert_eq!(entry["accessToken"], "a1");
        assert_eq!(entry["expiresAfter"], 1_900_000_000);
        assert_eq!(entry["clientId"], "sb-client");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cache_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tokens.json");
        let store = FileTokenStore::new(&path);

        store
            .save("https://tenant.example.com", &sample_tokens("a1"))
            .await
            .unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        // an existing world-readable cache is tightened on the next write
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        store
            .save("https://tenant.example.com", &sample_tokens("a2"))
            .await
            .unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_treated_as_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = FileTokenStore::new(&path);

        assert!(store.load("https://tenant.example.com").await.unwrap().is_none());

        store
            .save("https://tenant.example.com", &sample_tokens("fresh"))
            .await
            .unwrap();
        let loaded = store.load("https://tenant.example.com").await.unwrap().unwrap();
        assert_eq!(loaded.access_token.expose(), "fresh");
    }
}
