//! Local device-code token cache with pluggable storage backends
//!
//! One [`CachedToken`] is kept per provider name. Every failure on this path
//! is treated as a cache miss: the caller falls back to live authentication.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::CacheError;
use crate::fs_util;
use crate::types::{cache_root, CachedToken};

/// Sub-directory of the cache root used by the device code provider
pub const DEVICE_CODE_CACHE_DIR: &str = "azure-device-code";

/// File name of the cached token record
pub const TOKEN_FILE_NAME: &str = "token.json";

/// Tokens expiring within this many seconds are treated as already expired
pub const EXPIRY_SAFETY_MARGIN_SECS: i64 = 5 * 60;

/// Cache storage trait for different backends
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Get a value from cache
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store a value, replacing any previous entry
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError>;

    /// Delete a value; deleting a missing key succeeds
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// In-memory cache storage
#[derive(Default)]
pub struct MemoryCacheStorage {
    data: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError> {
        self.data.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.data.write().await.remove(key);
        Ok(())
    }
}

/// File-based cache storage laid out as `<base_dir>/<key>/<file_name>`
///
/// Directories are created with mode 0700 and files with mode 0600.
pub struct FileCacheStorage {
    base_dir: PathBuf,
    file_name: String,
}

impl FileCacheStorage {
    pub fn new(base_dir: impl AsRef<Path>, file_name: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            file_name: file_name.into(),
        }
    }

    /// Storage rooted at the per-user device code cache directory
    pub fn device_code(file_name: impl Into<String>) -> Result<Self, CacheError> {
        Ok(Self::new(
            cache_root()?.join(DEVICE_CODE_CACHE_DIR),
            file_name,
        ))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Path of the entry for `key`
    pub fn key_to_path(&self, key: &str) -> Result<PathBuf, CacheError> {
        if key.is_empty() || key.contains("..") || key.contains('/') || key.contains('\\') {
            return Err(CacheError::InvalidKey(key.to_string()));
        }
        Ok(self.base_dir.join(key).join(&self.file_name))
    }
}

#[async_trait]
impl CacheStorage for FileCacheStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let path = self.key_to_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError> {
        let path = self.key_to_path(key)?;
        tokio::task::spawn_blocking(move || fs_util::write_private_file(&path, &value))
            .await
            .map_err(|e| CacheError::Io(std::io::Error::other(e)))??;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let path = self.key_to_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Device code token cache keyed by provider name
#[derive(Clone)]
pub struct TokenCache {
    storage: Arc<dyn CacheStorage>,
}

impl TokenCache {
    pub fn new(storage: Arc<dyn CacheStorage>) -> Self {
        Self { storage }
    }

    /// Cache backed by `<cache-root>/azure-device-code/<provider>/token.json`
    pub fn from_default_location() -> Result<Self, CacheError> {
        Ok(Self::new(Arc::new(FileCacheStorage::device_code(
            TOKEN_FILE_NAME,
        )?)))
    }

    /// Load a usable token for `provider`, or `None` on any miss
    pub async fn load(&self, provider: &str, tenant_id: &str) -> Option<CachedToken> {
        self.load_at(provider, tenant_id, Utc::now()).await
    }

    pub(crate) async fn load_at(
        &self,
        provider: &str,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> Option<CachedToken> {
        let bytes = match self.storage.get(provider).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!("No cached token for provider {}", provider);
                return None;
            }
            Err(e) => {
                debug!("Failed to read token cache for {}: {}", provider, e);
                return None;
            }
        };

        let token: CachedToken = match serde_json::from_slice(&bytes) {
            Ok(token) => token,
            Err(e) => {
                debug!("Ignoring corrupt token cache for {}: {}", provider, e);
                return None;
            }
        };

        if token.expires_at <= now + Duration::seconds(EXPIRY_SAFETY_MARGIN_SECS) {
            debug!(
                "Cached token for {} expires at {}, too close to reuse",
                provider, token.expires_at
            );
            return None;
        }

        if token.tenant_id != tenant_id {
            debug!(
                "Cached token for {} belongs to tenant {}, expected {}",
                provider, token.tenant_id, tenant_id
            );
            return None;
        }

        Some(token)
    }

    /// Persist `token`; failures are logged and swallowed
    pub async fn save(&self, provider: &str, token: &CachedToken) {
        let bytes = match serde_json::to_vec_pretty(token) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("Failed to serialize cached token for {}: {}", provider, e);
                return;
            }
        };

        match self.storage.set(provider, bytes).await {
            Ok(()) => debug!("Cached token for provider {}", provider),
            Err(e) => debug!("Failed to cache token for {}: {}", provider, e),
        }
    }

    /// Remove the cached token for `provider`
    pub async fn delete(&self, provider: &str) -> Result<(), CacheError> {
        self.storage.delete(provider).await
    }
}
