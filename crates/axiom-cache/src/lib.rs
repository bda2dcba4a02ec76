//! # Axiom Cache
//!
//! Versioned offline cache store for the Axiom worker.
//!
//! ## Features
//!
//! - **Cache**: one generation's request → response store
//! - **CacheStorage**: all generations, keyed by version tag
//! - **Generation GC**: `purge_except()` drops every stale generation
//! - **SharedCacheStorage**: concurrent handle with atomic operations
//!
//! ## Architecture
//!
//! ```text
//! SharedCacheStorage (Arc<RwLock<_>>)
//!     │
//!     └── CacheStorage
//!             ├── Cache "axiom-v1"  ◄── current generation
//!             │       └── CacheKey → CacheEntry
//!             └── Cache "axiom-v0"  ◄── purged on activation
//! ```

use bytes::Bytes;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

// ==================== Errors ====================

/// Errors that can occur in cache store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache generation not found: {0}")]
    GenerationNotFound(String),
}

// ==================== Key ====================

/// Normalized request identity: method + URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// Request method, uppercased.
    pub method: String,

    /// Full request URL.
    pub url: String,
}

impl CacheKey {
    /// Create a key from a method and URL.
    pub fn new(method: &str, url: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            url: url.to_string(),
        }
    }

    /// Create a key for a GET request.
    pub fn for_get(url: &str) -> Self {
        Self::new("GET", url)
    }
}

// ==================== Entry ====================

/// A cached request/response pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Bytes,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Create an entry for a GET response body.
    pub fn new(url: &str, status: u16, headers: HashMap<String, String>, body: Bytes) -> Self {
        Self {
            url: url.to_string(),
            method: "GET".to_string(),
            status,
            headers,
            body,
            cached_at: axiom_common::now_millis(),
        }
    }
}

// ==================== Cache ====================

/// One cache generation's store.
#[derive(Debug, Default)]
pub struct Cache {
    /// Generation name (version tag).
    pub name: String,

    /// Cached entries.
    entries: HashMap<CacheKey, CacheEntry>,
}

impl Cache {
    /// Create a new cache generation.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request identity.
    pub fn match_request(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Match all entries, optionally filtered by URL.
    pub fn match_all(&self, url: Option<&str>) -> Vec<&CacheEntry> {
        match url {
            Some(u) => self.entries.values().filter(|e| e.url == u).collect(),
            None => self.entries.values().collect(),
        }
    }

    /// Store an entry. An existing entry under the same key is replaced.
    pub fn put(&mut self, key: CacheKey, entry: CacheEntry) {
        self.entries.insert(key, entry);
    }

    /// Delete an entry.
    pub fn delete(&mut self, key: &CacheKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Get all keys.
    pub fn keys(&self) -> Vec<&CacheKey> {
        self.entries.keys().collect()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the generation holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==================== Cache Storage ====================

/// All cache generations, keyed by version tag.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a generation (creates if it doesn't exist).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    /// Check if a generation exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Get a generation.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Get a generation mutably.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Cache> {
        self.caches.get_mut(name)
    }

    /// Delete a generation wholesale.
    pub fn delete(&mut self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    /// Get all generation names.
    pub fn keys(&self) -> Vec<&str> {
        self.caches.keys().map(|s| s.as_str()).collect()
    }

    /// Match a request identity across all generations.
    pub fn match_request(&self, key: &CacheKey) -> Option<&CacheEntry> {
        for cache in self.caches.values() {
            if let Some(entry) = cache.match_request(key) {
                return Some(entry);
            }
        }
        None
    }

    /// Delete every generation except `current`. Returns the removed names.
    pub fn purge_except(&mut self, current: &str) -> Vec<String> {
        let stale: Vec<String> = self
            .caches
            .keys()
            .filter(|name| name.as_str() != current)
            .cloned()
            .collect();
        for name in &stale {
            debug!(generation = %name, "deleting stale cache generation");
            self.caches.remove(name);
        }
        stale
    }
}

// ==================== Shared Handle ====================

/// Concurrent handle to the cache storage.
///
/// Each operation takes the lock for its own duration; operations are
/// individually atomic and no cross-operation transaction is provided.
#[derive(Debug, Clone, Default)]
pub struct SharedCacheStorage {
    inner: Arc<RwLock<CacheStorage>>,
}

impl SharedCacheStorage {
    /// Create an empty shared store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or create) a generation.
    pub async fn open(&self, name: &str) {
        self.inner.write().await.open(name);
    }

    /// Check if a generation exists.
    pub async fn has(&self, name: &str) -> bool {
        self.inner.read().await.has(name)
    }

    /// Store an entry in a generation.
    pub async fn put(
        &self,
        generation: &str,
        key: CacheKey,
        entry: CacheEntry,
    ) -> Result<(), CacheError> {
        let mut storage = self.inner.write().await;
        let cache = storage
            .get_mut(generation)
            .ok_or_else(|| CacheError::GenerationNotFound(generation.to_string()))?;
        cache.put(key, entry);
        Ok(())
    }

    /// Match a request identity in a generation.
    pub async fn match_request(&self, generation: &str, key: &CacheKey) -> Option<CacheEntry> {
        self.inner
            .read()
            .await
            .get(generation)
            .and_then(|cache| cache.match_request(key))
            .cloned()
    }

    /// Match a request identity across all generations.
    pub async fn match_any(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.inner.read().await.match_request(key).cloned()
    }

    /// Delete an entry from a generation.
    pub async fn delete(&self, generation: &str, key: &CacheKey) -> Result<bool, CacheError> {
        let mut storage = self.inner.write().await;
        let cache = storage
            .get_mut(generation)
            .ok_or_else(|| CacheError::GenerationNotFound(generation.to_string()))?;
        Ok(cache.delete(key))
    }

    /// Delete a generation wholesale.
    pub async fn delete_generation(&self, name: &str) -> bool {
        self.inner.write().await.delete(name)
    }

    /// All generation names.
    pub async fn generation_names(&self) -> Vec<String> {
        self.inner
            .read()
            .await
            .keys()
            .into_iter()
            .map(String::from)
            .collect()
    }

    /// Delete every generation except `current`. Returns the removed names.
    pub async fn purge_except(&self, current: &str) -> Vec<String> {
        self.inner.write().await.purge_except(current)
    }

    /// Number of entries in a generation (zero if absent).
    pub async fn entry_count(&self, generation: &str) -> usize {
        self.inner
            .read()
            .await
            .get(generation)
            .map(Cache::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(url: &str, body: &str) -> CacheEntry {
        CacheEntry::new(url, 200, HashMap::new(), Bytes::from(body.to_string()))
    }

    #[test]
    fn test_cache_put_and_match() {
        let mut cache = Cache::new("axiom-v1");
        let key = CacheKey::for_get("https://axiom.app/style.css");

        cache.put(key.clone(), entry("https://axiom.app/style.css", "body{}"));

        assert!(cache.match_request(&key).is_some());
        assert!(cache
            .match_request(&CacheKey::for_get("https://axiom.app/other.css"))
            .is_none());
    }

    #[test]
    fn test_cache_key_method_normalized() {
        let lower = CacheKey::new("get", "https://axiom.app/");
        let upper = CacheKey::new("GET", "https://axiom.app/");
        assert_eq!(lower, upper);
    }

    #[test]
    fn test_cache_key_distinguishes_method() {
        let get = CacheKey::new("GET", "https://axiom.app/api/users");
        let post = CacheKey::new("POST", "https://axiom.app/api/users");
        assert_ne!(get, post);
    }

    #[test]
    fn test_cache_put_twice_last_write_wins() {
        let mut cache = Cache::new("axiom-v1");
        let key = CacheKey::for_get("https://axiom.app/");

        cache.put(key.clone(), entry("https://axiom.app/", "first"));
        cache.put(key.clone(), entry("https://axiom.app/", "second"));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.match_request(&key).unwrap().body, "second");
    }

    #[test]
    fn test_cache_delete() {
        let mut cache = Cache::new("axiom-v1");
        let key = CacheKey::for_get("https://axiom.app/logo.png");

        cache.put(key.clone(), entry("https://axiom.app/logo.png", "png"));
        assert!(cache.delete(&key));
        assert!(!cache.delete(&key));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_match_all_by_url() {
        let mut cache = Cache::new("axiom-v1");
        cache.put(
            CacheKey::for_get("https://axiom.app/a"),
            entry("https://axiom.app/a", "a"),
        );
        cache.put(
            CacheKey::for_get("https://axiom.app/b"),
            entry("https://axiom.app/b", "b"),
        );

        assert_eq!(cache.match_all(Some("https://axiom.app/a")).len(), 1);
        assert_eq!(cache.match_all(None).len(), 2);
    }

    #[test]
    fn test_storage_open_and_delete() {
        let mut storage = CacheStorage::new();

        assert!(!storage.has("axiom-v1"));
        storage.open("axiom-v1");
        assert!(storage.has("axiom-v1"));

        assert!(storage.delete("axiom-v1"));
        assert!(!storage.has("axiom-v1"));
    }

    #[test]
    fn test_storage_purge_except() {
        let mut storage = CacheStorage::new();
        storage.open("axiom-v0");
        storage.open("axiom-v1");
        storage.open("axiom-v2");

        let mut removed = storage.purge_except("axiom-v1");
        removed.sort();

        assert_eq!(removed, vec!["axiom-v0", "axiom-v2"]);
        assert_eq!(storage.keys(), vec!["axiom-v1"]);
    }

    #[test]
    fn test_storage_match_across_generations() {
        let mut storage = CacheStorage::new();
        let key = CacheKey::for_get("https://axiom.app/manifest.json");
        storage
            .open("axiom-v0")
            .put(key.clone(), entry("https://axiom.app/manifest.json", "{}"));

        assert!(storage.match_request(&key).is_some());
    }

    #[tokio::test]
    async fn test_shared_put_requires_open_generation() {
        let storage = SharedCacheStorage::new();
        let key = CacheKey::for_get("https://axiom.app/");

        let result = storage
            .put("axiom-v1", key.clone(), entry("https://axiom.app/", "hi"))
            .await;
        assert_eq!(
            result,
            Err(CacheError::GenerationNotFound("axiom-v1".to_string()))
        );

        storage.open("axiom-v1").await;
        storage
            .put("axiom-v1", key.clone(), entry("https://axiom.app/", "hi"))
            .await
            .unwrap();
        assert!(storage.match_request("axiom-v1", &key).await.is_some());
    }

    #[tokio::test]
    async fn test_shared_purge_leaves_current_retrievable() {
        let storage = SharedCacheStorage::new();
        let key = CacheKey::for_get("https://axiom.app/");

        storage.open("axiom-v0").await;
        storage.open("axiom-v1").await;
        storage
            .put("axiom-v0", key.clone(), entry("https://axiom.app/", "old"))
            .await
            .unwrap();
        storage
            .put("axiom-v1", key.clone(), entry("https://axiom.app/", "new"))
            .await
            .unwrap();

        storage.purge_except("axiom-v1").await;

        assert!(storage.match_request("axiom-v0", &key).await.is_none());
        let entry = storage.match_request("axiom-v1", &key).await.unwrap();
        assert_eq!(entry.body, "new");
    }

    #[tokio::test]
    async fn test_shared_handle_clones_share_state() {
        let storage = SharedCacheStorage::new();
        let handle = storage.clone();

        storage.open("axiom-v1").await;
        assert!(handle.has("axiom-v1").await);
        assert_eq!(handle.entry_count("axiom-v1").await, 0);
    }
}
