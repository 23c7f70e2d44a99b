//! Cache backend trait and statistics.
//!
//! This module defines the trait that shared cache transports must
//! implement. The store above it only needs batched get/set with a TTL.

use async_trait::async_trait;
use m2m_core::M2mResult;
use std::collections::HashMap;
use std::time::Duration;

/// Cache backend trait for pluggable shared caches.
///
/// Abstracts over memcached-style transports, LMDB and in-memory maps.
/// Implementations should be thread-safe and support concurrent access.
///
/// # Semantics
///
/// - `get_multi` returns only keys that are present and unexpired; misses are
///   omitted, never reported as errors.
/// - `set_multi` writes every entry with the same TTL and returns `false` if
///   the write did not apply to all keys.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch the values stored under `keys`.
    async fn get_multi(&self, keys: &[String]) -> M2mResult<HashMap<String, String>>;

    /// Store every entry with the given time-to-live.
    async fn set_multi(&self, entries: &HashMap<String, String>, ttl: Duration) -> M2mResult<bool>;

    /// Get cache statistics.
    async fn stats(&self) -> M2mResult<CacheStats>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of keys found.
    pub hits: u64,
    /// Number of keys absent or expired.
    pub misses: u64,
    /// Number of entries currently stored (expired entries included until purged).
    pub entry_count: u64,
    /// Number of keys written.
    pub writes: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
