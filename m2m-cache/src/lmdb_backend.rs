//! LMDB-backed shared cache.
//!
//! Uses the heed crate (Rust bindings for LMDB) so that every process on a
//! host shares one memory-mapped cache.
//!
//! # Value Format
//!
//! Each value is stored as `[expires_at: 8 bytes LE millis][utf-8 value]`.
//! Expired entries read as misses and are removed by
//! [`LmdbCacheBackend::purge_expired`].
//!
//! # Atomicity
//!
//! `set_multi` writes the whole batch in one write transaction, so a batch
//! either lands completely or not at all.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use m2m_core::{CacheError, M2mError, M2mResult};

use super::traits::{CacheBackend, CacheStats};

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Stored bytes do not follow the value format.
    #[error("Corrupt entry for {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for M2mError {
    fn from(e: LmdbCacheError) -> Self {
        M2mError::Cache(CacheError::Backend {
            reason: e.to_string(),
        })
    }
}

/// LMDB-backed cache with per-entry expiry.
///
/// # Example
///
/// ```ignore
/// let backend = Arc::new(LmdbCacheBackend::new("/var/cache/m2m", 64)?);
/// let store = CacheAsideStore::with_defaults(backend);
/// ```
pub struct LmdbCacheBackend {
    env: Env,
    db: Database<Bytes, Bytes>,
    stats: RwLock<CacheStats>,
}

impl LmdbCacheBackend {
    /// Open (or create) a cache under `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per backend and the files are
        // only touched through LMDB.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(Self {
            env,
            db,
            stats: RwLock::new(CacheStats::default()),
        })
    }

    /// Remove every expired entry, returning how many were deleted.
    pub fn purge_expired(&self) -> Result<u64, LmdbCacheError> {
        let now = Utc::now();
        let expired: Vec<Vec<u8>> = {
            let rtxn = self
                .env
                .read_txn()
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
            let iter = self
                .db
                .iter(&rtxn)
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

            let mut keys = Vec::new();
            for result in iter {
                let (key, bytes) = result.map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
                // Corrupt entries are dropped along with expired ones.
                let live = decode_value(key, bytes)
                    .map(|(expires_at, _)| expires_at > now)
                    .unwrap_or(false);
                if !live {
                    keys.push(key.to_vec());
                }
            }
            keys
        };

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let mut deleted = 0u64;
        for key in &expired {
            if self
                .db
                .delete(&mut wtxn, key)
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?
            {
                deleted += 1;
            }
        }

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        if let Ok(mut stats) = self.stats.write() {
            stats.entry_count = stats.entry_count.saturating_sub(deleted);
        }

        Ok(deleted)
    }
}

fn encode_value(expires_at: DateTime<Utc>, value: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(8 + value.len());
    bytes.extend_from_slice(&expires_at.timestamp_millis().to_le_bytes());
    bytes.extend_from_slice(value.as_bytes());
    bytes
}

fn decode_value(key: &[u8], bytes: &[u8]) -> Result<(DateTime<Utc>, String), LmdbCacheError> {
    let corrupt = |reason: &str| LmdbCacheError::Corrupt {
        key: String::from_utf8_lossy(key).into_owned(),
        reason: reason.to_string(),
    };

    if bytes.len() < 8 {
        return Err(corrupt("value shorter than expiry header"));
    }
    let header: [u8; 8] = bytes[0..8]
        .try_into()
        .map_err(|_| corrupt("invalid expiry header"))?;
    let expires_at = DateTime::from_timestamp_millis(i64::from_le_bytes(header))
        .ok_or_else(|| corrupt("expiry out of range"))?;
    let value = std::str::from_utf8(&bytes[8..])
        .map_err(|_| corrupt("value is not utf-8"))?
        .to_string();
    Ok((expires_at, value))
}

#[async_trait]
impl CacheBackend for LmdbCacheBackend {
    async fn get_multi(&self, keys: &[String]) -> M2mResult<HashMap<String, String>> {
        let now = Utc::now();
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let mut found = HashMap::new();
        for key in keys {
            let stored = self
                .db
                .get(&rtxn, key.as_bytes())
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
            let Some(bytes) = stored else {
                continue;
            };
            match decode_value(key.as_bytes(), bytes) {
                Ok((expires_at, value)) if expires_at > now => {
                    found.insert(key.clone(), value);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Skipping corrupt cache entry");
                }
            }
        }

        if let Ok(mut stats) = self.stats.write() {
            stats.hits += found.len() as u64;
            stats.misses += (keys.len() - found.len()) as u64;
        }
        Ok(found)
    }

    async fn set_multi(&self, entries: &HashMap<String, String>, ttl: Duration) -> M2mResult<bool> {
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .ok_or_else(|| CacheError::Backend {
                reason: format!("TTL out of range: {:?}", ttl),
            })?;

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let mut new_keys = 0u64;
        for (key, value) in entries {
            let existed = self
                .db
                .get(&wtxn, key.as_bytes())
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?
                .is_some();
            if !existed {
                new_keys += 1;
            }
            self.db
                .put(&mut wtxn, key.as_bytes(), &encode_value(expires_at, value))
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        }

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        if let Ok(mut stats) = self.stats.write() {
            stats.writes += entries.len() as u64;
            stats.entry_count += new_keys;
        }
        Ok(true)
    }

    async fn stats(&self) -> M2mResult<CacheStats> {
        Ok(self.stats.read().map(|s| s.clone()).unwrap_or_default())
    }
}
