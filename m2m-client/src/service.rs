//! Inventory service facade.
//!
//! Bundles the session cache, both resolvers and the verifier over one remote
//! client and one cache backend, exposing the operations order processing
//! calls.

use std::collections::HashMap;
use std::sync::Arc;

use m2m_cache::{CacheAsideStore, CacheBackend, CacheConfig, SessionCache};
use m2m_core::{
    DatasetClassifier, DownloadUrl, EntityId, InventoryApi, InventoryConfig, M2mResult,
    ProductType, SceneId, SessionToken,
};

use crate::client::InventoryClient;
use crate::resolver::{DownloadUrlResolver, EntityIdResolver, ResolutionPolicy};
use crate::verifier::SceneVerifier;

/// Cached access to the remote inventory.
///
/// # Example
///
/// ```ignore
/// let config = InventoryConfig::from_env()?;
/// let service = InventoryService::connect(config, Arc::new(InMemoryCacheBackend::new()))?;
/// let token = service.session().await?;
/// let urls = service.download_urls(&token, &ids, &ProductType::STANDARD).await?;
/// ```
pub struct InventoryService<A: InventoryApi, C: CacheBackend> {
    api: Arc<A>,
    session: SessionCache<C>,
    entity_ids: EntityIdResolver<A, C>,
    downloads: DownloadUrlResolver<A, C>,
    verifier: SceneVerifier<A, C>,
}

impl<C: CacheBackend> InventoryService<InventoryClient, C> {
    /// Build an HTTP client from `config` and wire it to `backend`, using the
    /// configured cache TTL.
    pub fn connect(config: InventoryConfig, backend: Arc<C>) -> M2mResult<Self> {
        let store = CacheAsideStore::new(backend, CacheConfig::new().with_ttl(config.cache_ttl));
        let api = Arc::new(InventoryClient::new(config)?);
        Ok(Self::new(api, store))
    }
}

impl<A: InventoryApi, C: CacheBackend> InventoryService<A, C> {
    pub fn new(api: Arc<A>, store: CacheAsideStore<C>) -> Self {
        let entity_ids = EntityIdResolver::new(Arc::clone(&api), store.clone());
        Self::from_resolver(entity_ids, SessionCache::new(store))
    }

    /// Like [`InventoryService::new`] with a custom dataset classifier.
    pub fn with_classifier(
        api: Arc<A>,
        store: CacheAsideStore<C>,
        classifier: Arc<dyn DatasetClassifier>,
    ) -> Self {
        let entity_ids = EntityIdResolver::with_classifier(api, store.clone(), classifier);
        Self::from_resolver(entity_ids, SessionCache::new(store))
    }

    fn from_resolver(entity_ids: EntityIdResolver<A, C>, session: SessionCache<C>) -> Self {
        Self {
            api: Arc::clone(entity_ids.api()),
            session,
            downloads: DownloadUrlResolver::new(entity_ids.clone()),
            verifier: SceneVerifier::new(entity_ids.clone()),
            entity_ids,
        }
    }

    /// Cached session token; logs in and caches the token on a miss.
    ///
    /// # Errors
    /// * `RemoteError::Authentication` - login was rejected
    /// * `CacheError::WriteFailed` - the new token could not be cached
    pub async fn session(&self) -> M2mResult<SessionToken> {
        self.session.get_or_login(|| self.api.login()).await
    }

    /// Uncached login.
    pub async fn login(&self) -> M2mResult<SessionToken> {
        self.api.login().await
    }

    pub async fn available(&self) -> M2mResult<bool> {
        self.api.available().await
    }

    /// Invalidate `token` remotely. The cached token slot is left to expire.
    pub async fn logout(&self, token: &SessionToken) -> M2mResult<()> {
        self.api.logout(token).await
    }

    /// Convert scene identifiers to entity ids; every id must resolve.
    pub async fn convert(
        &self,
        token: &SessionToken,
        ids: &[SceneId],
    ) -> M2mResult<HashMap<SceneId, EntityId>> {
        self.entity_ids
            .resolve(token, ids, ResolutionPolicy::Strict)
            .await
    }

    pub async fn verify_scenes(
        &self,
        token: &SessionToken,
        ids: &[SceneId],
    ) -> M2mResult<HashMap<SceneId, bool>> {
        self.verifier.verify(token, ids).await
    }

    /// Download URLs for `ids`; every id must resolve to exactly one URL.
    pub async fn download_urls(
        &self,
        token: &SessionToken,
        ids: &[SceneId],
        product: &ProductType,
    ) -> M2mResult<HashMap<SceneId, DownloadUrl>> {
        self.downloads
            .resolve(token, ids, product, ResolutionPolicy::Strict)
            .await
    }

    pub async fn set_user_context(
        &self,
        token: &SessionToken,
        contact_id: u64,
        ip_address: Option<&str>,
    ) -> M2mResult<()> {
        self.api.set_user_context(token, contact_id, ip_address).await
    }

    pub async fn clear_user_context(&self, token: &SessionToken) -> M2mResult<()> {
        self.api.clear_user_context(token).await
    }

    pub fn entity_ids(&self) -> &EntityIdResolver<A, C> {
        &self.entity_ids
    }

    pub fn downloads(&self) -> &DownloadUrlResolver<A, C> {
        &self.downloads
    }
}
