//! Cache-aside batching over a [`CacheBackend`].
//!
//! Reads are best-effort: a backend failure or an undecodable value is
//! treated as a miss. Writes are not: if the backend reports that a batch did
//! not land, the caller gets [`CacheError::WriteFailed`].

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use m2m_core::{CacheError, M2mResult, DEFAULT_CACHE_TTL};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::key::CacheKey;
use super::traits::CacheBackend;

/// Configuration for the cache-aside store.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL applied to every entry at write time.
    pub entry_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            entry_ttl: DEFAULT_CACHE_TTL,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the entry TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = ttl;
        self
    }
}

/// Batched cache-aside access to a shared backend.
///
/// Values are stored as JSON. The store is the only component that touches
/// the backend; resolvers go through [`CacheAsideStore::resolve`].
///
/// # Example
///
/// ```ignore
/// let store = CacheAsideStore::with_defaults(Arc::new(InMemoryCacheBackend::new()));
/// let resolved = store
///     .resolve(&ids, CacheKey::id_lookup, |missing| async move {
///         api.lookup_entity_ids(&token, &dataset, &missing).await
///     })
///     .await?;
/// ```
pub struct CacheAsideStore<C: CacheBackend> {
    backend: Arc<C>,
    config: CacheConfig,
}

impl<C: CacheBackend> Clone for CacheAsideStore<C> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            config: self.config.clone(),
        }
    }
}

impl<C: CacheBackend> CacheAsideStore<C> {
    pub fn new(backend: Arc<C>, config: CacheConfig) -> Self {
        Self { backend, config }
    }

    /// Create a store with default configuration.
    pub fn with_defaults(backend: Arc<C>) -> Self {
        Self::new(backend, CacheConfig::default())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn backend(&self) -> &C {
        &self.backend
    }

    /// Fetch the cached values for `keys`, omitting misses.
    ///
    /// Never fails: backend errors and values that do not decode as `V` are
    /// logged and reported as misses.
    pub async fn get_batch<V>(&self, keys: &[CacheKey]) -> HashMap<CacheKey, V>
    where
        V: DeserializeOwned,
    {
        if keys.is_empty() {
            return HashMap::new();
        }

        let encoded: HashMap<String, &CacheKey> =
            keys.iter().map(|key| (key.encode(), key)).collect();
        let wire_keys: Vec<String> = encoded.keys().cloned().collect();

        let raw = match self.backend.get_multi(&wire_keys).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(keys = wire_keys.len(), error = %e, "Cache read failed, treating batch as misses");
                return HashMap::new();
            }
        };

        let mut found = HashMap::with_capacity(raw.len());
        for (wire_key, value) in raw {
            let Some(key) = encoded.get(&wire_key) else {
                continue;
            };
            match serde_json::from_str::<V>(&value) {
                Ok(decoded) => {
                    found.insert((*key).clone(), decoded);
                }
                Err(e) => {
                    tracing::warn!(key = %wire_key, error = %e, "Undecodable cache entry, treating as miss");
                }
            }
        }
        found
    }

    /// Write every entry with the configured TTL.
    ///
    /// # Errors
    /// * `CacheError::Serialization` - a value could not be encoded
    /// * `CacheError::WriteFailed` - the backend reported a partial write
    /// * any error the backend itself returns
    pub async fn set_batch<V>(&self, entries: &HashMap<CacheKey, V>) -> M2mResult<()>
    where
        V: Serialize,
    {
        if entries.is_empty() {
            return Ok(());
        }

        let mut wire = HashMap::with_capacity(entries.len());
        for (key, value) in entries {
            let encoded = serde_json::to_string(value).map_err(|e| CacheError::Serialization {
                reason: format!("{}: {}", key, e),
            })?;
            wire.insert(key.encode(), encoded);
        }

        let written = self.backend.set_multi(&wire, self.config.entry_ttl).await?;
        if !written {
            let resource = entries
                .keys()
                .next()
                .map(|key| key.kind().as_str())
                .unwrap_or("batch");
            return Err(CacheError::WriteFailed {
                resource: resource.to_string(),
                keys: entries.len(),
            }
            .into());
        }

        tracing::debug!(keys = entries.len(), ttl_secs = self.config.entry_ttl.as_secs(), "Cached batch");
        Ok(())
    }

    /// Resolve `ids` through the cache, fetching only what is missing.
    ///
    /// Duplicate ids are collapsed. `fetch` is called at most once, with the
    /// ids that had no cached value, and only when there is at least one.
    /// Entries it returns for those ids are written back; entries that were
    /// already cached are left alone so their TTL is not refreshed. Ids that
    /// neither the cache nor `fetch` could resolve are absent from the result.
    ///
    /// # Errors
    /// Propagates errors from `fetch` and from the write-back.
    pub async fn resolve<I, V, K, F, Fut>(
        &self,
        ids: &[I],
        key_fn: K,
        fetch: F,
    ) -> M2mResult<HashMap<I, V>>
    where
        I: Clone + Eq + Hash,
        V: Serialize + DeserializeOwned,
        K: Fn(&I) -> CacheKey,
        F: FnOnce(Vec<I>) -> Fut,
        Fut: Future<Output = M2mResult<HashMap<I, V>>>,
    {
        let mut seen = HashSet::with_capacity(ids.len());
        let keyed: Vec<(I, CacheKey)> = ids
            .iter()
            .filter(|id| seen.insert(*id))
            .map(|id| (id.clone(), key_fn(id)))
            .collect();
        if keyed.is_empty() {
            return Ok(HashMap::new());
        }

        let keys: Vec<CacheKey> = keyed.iter().map(|(_, key)| key.clone()).collect();
        let mut cached: HashMap<CacheKey, V> = self.get_batch(&keys).await;

        let mut merged = HashMap::with_capacity(keyed.len());
        let mut missing = Vec::new();
        let mut missing_keys = HashMap::new();
        for (id, key) in keyed {
            match cached.remove(&key) {
                Some(value) => {
                    merged.insert(id, value);
                }
                None => {
                    missing.push(id.clone());
                    missing_keys.insert(id, key);
                }
            }
        }

        if missing.is_empty() {
            tracing::debug!(hits = merged.len(), "Resolved batch entirely from cache");
            return Ok(merged);
        }

        tracing::debug!(hits = merged.len(), misses = missing.len(), "Fetching cache misses");
        let fetched = fetch(missing).await?;

        let mut to_cache = HashMap::with_capacity(fetched.len());
        let mut fresh = Vec::with_capacity(fetched.len());
        for (id, value) in fetched {
            // Ignore anything the fetcher returned that was not asked for.
            if let Some(key) = missing_keys.remove(&id) {
                to_cache.insert(key.clone(), value);
                fresh.push((id, key));
            }
        }

        self.set_batch(&to_cache).await?;

        for (id, key) in fresh {
            if let Some(value) = to_cache.remove(&key) {
                merged.insert(id, value);
            }
        }
        Ok(merged)
    }
}
