//! Single-slot session token cache.
//!
//! One token per cache namespace, stored under [`CacheKey::login`] with the
//! store's TTL. There is no renewal: once the entry expires the next caller
//! logs in again.

use std::collections::HashMap;
use std::future::Future;

use m2m_core::{M2mResult, SessionToken};

use super::key::CacheKey;
use super::store::CacheAsideStore;
use super::traits::CacheBackend;

/// Cached login over a [`CacheAsideStore`].
pub struct SessionCache<C: CacheBackend> {
    store: CacheAsideStore<C>,
}

impl<C: CacheBackend> Clone for SessionCache<C> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<C: CacheBackend> SessionCache<C> {
    pub fn new(store: CacheAsideStore<C>) -> Self {
        Self { store }
    }

    /// The cached token, if one is present and unexpired.
    pub async fn cached_token(&self) -> Option<SessionToken> {
        let key = CacheKey::login();
        let mut found: HashMap<CacheKey, SessionToken> =
            self.store.get_batch(std::slice::from_ref(&key)).await;
        found.remove(&key)
    }

    /// Cache `token`, replacing whatever was there.
    ///
    /// # Errors
    /// * `CacheError::WriteFailed` - the token could not be cached
    pub async fn store(&self, token: &SessionToken) -> M2mResult<()> {
        let mut entries = HashMap::with_capacity(1);
        entries.insert(CacheKey::login(), token.clone());
        self.store.set_batch(&entries).await
    }

    /// Reuse the cached token, or call `login` and cache what it returns.
    pub async fn get_or_login<F, Fut>(&self, login: F) -> M2mResult<SessionToken>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = M2mResult<SessionToken>>,
    {
        if let Some(token) = self.cached_token().await {
            tracing::debug!("Using cached session token");
            return Ok(token);
        }

        let token = login().await?;
        self.store(&token).await?;
        tracing::debug!("Cached new session token");
        Ok(token)
    }
}
