//! Process-local cache backend.
//!
//! Useful for single-process deployments and tests. Expired entries read as
//! misses and are swept out on every `set_multi`, so the map only holds live
//! entries plus whatever expired since the last write.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use m2m_core::{CacheError, M2mResult};

use super::traits::{CacheBackend, CacheStats};

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// In-memory cache with per-entry TTL.
#[derive(Debug, Default)]
pub struct InMemoryCacheBackend {
    entries: RwLock<HashMap<String, Entry>>,
    stats: RwLock<CacheStats>,
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let Ok(mut entries) = self.entries.write() else {
            return 0;
        };
        let removed = sweep(&mut entries, Instant::now());
        if let Ok(mut stats) = self.stats.write() {
            stats.entry_count = entries.len() as u64;
        }
        removed
    }
}

fn sweep(entries: &mut HashMap<String, Entry>, now: Instant) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| entry.is_live(now));
    before - entries.len()
}

fn poisoned() -> CacheError {
    CacheError::Backend {
        reason: "in-memory cache lock poisoned".to_string(),
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get_multi(&self, keys: &[String]) -> M2mResult<HashMap<String, String>> {
        let now = Instant::now();
        let entries = self.entries.read().map_err(|_| poisoned())?;

        let found: HashMap<String, String> = keys
            .iter()
            .filter_map(|key| {
                entries
                    .get(key)
                    .filter(|entry| entry.is_live(now))
                    .map(|entry| (key.clone(), entry.value.clone()))
            })
            .collect();

        if let Ok(mut stats) = self.stats.write() {
            stats.hits += found.len() as u64;
            stats.misses += (keys.len() - found.len()) as u64;
        }
        Ok(found)
    }

    async fn set_multi(&self, entries: &HashMap<String, String>, ttl: Duration) -> M2mResult<bool> {
        let now = Instant::now();
        let expires_at = now.checked_add(ttl).ok_or_else(|| CacheError::Backend {
            reason: format!("TTL out of range: {:?}", ttl),
        })?;
        let mut stored = self.entries.write().map_err(|_| poisoned())?;
        let swept = sweep(&mut stored, now);
        if swept > 0 {
            tracing::trace!(swept, "Dropped expired in-memory cache entries");
        }
        for (key, value) in entries {
            stored.insert(
                key.clone(),
                Entry {
                    value: value.clone(),
                    expires_at,
                },
            );
        }
        if let Ok(mut stats) = self.stats.write() {
            stats.writes += entries.len() as u64;
            stats.entry_count = stored.len() as u64;
        }
        Ok(true)
    }

    async fn stats(&self) -> M2mResult<CacheStats> {
        Ok(self.stats.read().map(|s| s.clone()).unwrap_or_default())
    }
}
