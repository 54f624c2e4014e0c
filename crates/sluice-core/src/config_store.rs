//! Per-URL configuration storage: the persistent-store collaborator trait,
//! an in-memory implementation, and the cache-aside [`ConfigManager`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use moka::future::Cache;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::AppError;
use crate::models::{CleanerConfig, ProviderConfiguration};

/// Default number of (URL, key) entries held in a manager's cache.
pub const DEFAULT_CACHE_CAPACITY: u64 = 10_000;

/// A configuration value stored per (URL, key), where the key is carried by the value.
pub trait ConfigEntry: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn key(&self) -> &str;
}

impl ConfigEntry for ProviderConfiguration {
    fn key(&self) -> &str {
        &self.provider_name
    }
}

impl ConfigEntry for CleanerConfig {
    fn key(&self) -> &str {
        &self.name
    }
}

/// One stored configuration together with the URL it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredConfig<C> {
    pub url: String,
    #[serde(flatten)]
    pub config: C,
}

/// Persistent store for per-URL configurations.
///
/// Implementations must upsert on `set`: one record per (URL, key).
#[async_trait]
pub trait ConfigStore<C: ConfigEntry>: Send + Sync {
    async fn get(&self, url: &str, key: &str) -> Result<Option<C>, AppError>;

    async fn set(&self, url: &str, config: &C) -> Result<(), AppError>;

    /// Delete one key for a URL, or every key when `key` is `None`.
    async fn delete(&self, url: &str, key: Option<&str>) -> Result<(), AppError>;

    /// All stored configurations, ordered by URL then key.
    async fn list_all(&self) -> Result<Vec<StoredConfig<C>>, AppError>;

    async fn list_for_url(&self, url: &str) -> Result<Vec<C>, AppError> {
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .filter(|entry| entry.url == url)
            .map(|entry| entry.config)
            .collect())
    }

    async fn clear(&self) -> Result<(), AppError>;

    async fn export_all(&self) -> Result<Vec<StoredConfig<C>>, AppError> {
        self.list_all().await
    }

    async fn import_all(&self, entries: Vec<StoredConfig<C>>) -> Result<(), AppError> {
        for entry in entries {
            self.set(&entry.url, &entry.config).await?;
        }
        Ok(())
    }
}

/// In-memory [`ConfigStore`].
pub struct MemoryConfigStore<C> {
    entries: RwLock<BTreeMap<(String, String), C>>,
}

impl<C> Default for MemoryConfigStore<C> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<C> MemoryConfigStore<C> {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl<C: ConfigEntry> ConfigStore<C> for MemoryConfigStore<C> {
    async fn get(&self, url: &str, key: &str) -> Result<Option<C>, AppError> {
        Ok(self
            .entries
            .read()
            .await
            .get(&(url.to_string(), key.to_string()))
            .cloned())
    }

    async fn set(&self, url: &str, config: &C) -> Result<(), AppError> {
        self.entries
            .write()
            .await
            .insert((url.to_string(), config.key().to_string()), config.clone());
        Ok(())
    }

    async fn delete(&self, url: &str, key: Option<&str>) -> Result<(), AppError> {
        let mut entries = self.entries.write().await;
        match key {
            Some(key) => {
                entries.remove(&(url.to_string(), key.to_string()));
            }
            None => entries.retain(|(u, _), _| u != url),
        }
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<StoredConfig<C>>, AppError> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .map(|((url, _), config)| StoredConfig {
                url: url.clone(),
                config: config.clone(),
            })
            .collect())
    }

    async fn clear(&self) -> Result<(), AppError> {
        self.entries.write().await.clear();
        Ok(())
    }
}

type CacheKey = (String, String);

/// Cache-aside layer over a [`ConfigStore`].
///
/// Reads check the cache, then the store, populating the cache on a hit.
/// Writes go to the cache first, then the store; a failed store write
/// invalidates the cached key so the cache never holds an unpersisted value.
/// Entries leave the cache on an explicit delete or clear, or when moka
/// evicts them at capacity; an evicted key is read again from the store.
pub struct ConfigManager<C: ConfigEntry> {
    name: String,
    cache: Cache<CacheKey, C>,
    store: Arc<dyn ConfigStore<C>>,
}

impl<C: ConfigEntry> ConfigManager<C> {
    pub fn new(name: impl Into<String>, store: Arc<dyn ConfigStore<C>>) -> Self {
        Self::with_capacity(name, store, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(
        name: impl Into<String>,
        store: Arc<dyn ConfigStore<C>>,
        capacity: u64,
    ) -> Self {
        Self {
            name: name.into(),
            cache: Cache::builder()
                .max_capacity(capacity)
                .support_invalidation_closures()
                .build(),
            store,
        }
    }

    /// In-memory manager, mostly for tests and one-shot CLI runs.
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self::new(name, Arc::new(MemoryConfigStore::new()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn get(&self, url: &str, key: &str) -> Result<Option<C>, AppError> {
        let cache_key = (url.to_string(), key.to_string());
        if let Some(hit) = self.cache.get(&cache_key).await {
            return Ok(Some(hit));
        }

        let loaded = self.store.get(url, key).await?;
        if let Some(config) = &loaded {
            self.cache.insert(cache_key, config.clone()).await;
        }
        Ok(loaded)
    }

    /// Upsert a configuration for a URL under its own key.
    pub async fn set(&self, url: &str, config: C) -> Result<(), AppError> {
        let cache_key = (url.to_string(), config.key().to_string());
        self.cache.insert(cache_key.clone(), config.clone()).await;

        if let Err(e) = self.store.set(url, &config).await {
            self.cache.invalidate(&cache_key).await;
            tracing::warn!(
                manager = %self.name,
                url = %url,
                key = %cache_key.1,
                error = %e,
                "Store write failed, cache entry rolled back"
            );
            return Err(e);
        }
        Ok(())
    }

    /// Remove one key for a URL, or every key for it when `key` is `None`.
    pub async fn delete(&self, url: &str, key: Option<&str>) -> Result<(), AppError> {
        match key {
            Some(key) => {
                self.cache
                    .invalidate(&(url.to_string(), key.to_string()))
                    .await
            }
            None => {
                let owned = url.to_string();
                self.cache
                    .invalidate_entries_if(move |(u, _), _| *u == owned)
                    .map_err(|e| AppError::Generic(format!("cache invalidation failed: {e}")))?;
            }
        }
        self.store.delete(url, key).await
    }

    pub async fn list_all(&self) -> Result<Vec<StoredConfig<C>>, AppError> {
        self.store.list_all().await
    }

    pub async fn list_for_url(&self, url: &str) -> Result<Vec<C>, AppError> {
        self.store.list_for_url(url).await
    }

    pub async fn clear(&self) -> Result<(), AppError> {
        self.cache.invalidate_all();
        self.store.clear().await
    }

    pub async fn export_all(&self) -> Result<Vec<StoredConfig<C>>, AppError> {
        self.store.export_all().await
    }

    /// Upsert each entry through the cache-aside write path.
    pub async fn import_all(&self, entries: Vec<StoredConfig<C>>) -> Result<(), AppError> {
        for entry in entries {
            self.set(&entry.url, entry.config).await?;
        }
        Ok(())
    }
}
