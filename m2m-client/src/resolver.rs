//! Cache-aside identifier and download URL resolution.
//!
//! Both resolvers partition their input by dataset, ask the
//! [`CacheAsideStore`] for each bucket, and only reach the remote service for
//! the cache misses of that bucket.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use m2m_cache::{CacheAsideStore, CacheBackend, CacheKey};
use m2m_core::{
    partition, DatasetClassifier, DatasetName, DownloadUrl, EntityId, InventoryApi,
    LandsatClassifier, M2mError, M2mResult, ProductType, ResolutionError, SceneId, SessionToken,
};

/// How a resolver treats identifiers the remote service cannot resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolutionPolicy {
    /// Every requested id must resolve; otherwise the call fails with
    /// `ResolutionError::Unresolved` naming the ids that did not.
    #[default]
    Strict,
    /// Unresolvable ids are dropped and the rest of the batch is retried.
    /// Absence from the result is a valid answer.
    Lenient,
}

impl ResolutionPolicy {
    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Strict)
    }
}

/// Ids named by a lenient-retryable error, if `err` is one.
fn retryable_ids(policy: ResolutionPolicy, err: &M2mError) -> Option<HashSet<String>> {
    if policy.is_strict() {
        return None;
    }
    err.unresolved_ids()
        .filter(|ids| !ids.is_empty())
        .map(|ids| ids.iter().cloned().collect())
}

/// Fail if any of `ids` is missing from `resolved`.
fn ensure_complete<V>(
    operation: &str,
    ids: &[SceneId],
    resolved: &HashMap<SceneId, V>,
) -> M2mResult<()> {
    let unresolved: Vec<&str> = ids
        .iter()
        .filter(|id| !resolved.contains_key(*id))
        .map(|id| id.as_str())
        .collect();
    if unresolved.is_empty() {
        Ok(())
    } else {
        Err(ResolutionError::unresolved(operation, unresolved).into())
    }
}

/// Restate an `Unresolved` download error in terms of the caller's scene ids.
fn in_scene_terms(err: M2mError, pending: &[(SceneId, EntityId)]) -> M2mError {
    match err {
        M2mError::Resolution(ResolutionError::Unresolved { operation, ids }) => {
            let scenes: Vec<String> = ids
                .iter()
                .flat_map(|entity| {
                    let matched: Vec<&str> = pending
                        .iter()
                        .filter(|(_, e)| e.as_str() == entity.as_str())
                        .map(|(scene, _)| scene.as_str())
                        .collect();
                    if matched.is_empty() {
                        vec![entity.as_str()]
                    } else {
                        matched
                    }
                })
                .map(str::to_string)
                .collect();
            ResolutionError::unresolved(operation, scenes).into()
        }
        other => other,
    }
}

/// Scene identifier → entity id, through the `idLookup` cache namespace.
pub struct EntityIdResolver<A: InventoryApi, C: CacheBackend> {
    api: Arc<A>,
    store: CacheAsideStore<C>,
    classifier: Arc<dyn DatasetClassifier>,
}

impl<A: InventoryApi, C: CacheBackend> Clone for EntityIdResolver<A, C> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            store: self.store.clone(),
            classifier: Arc::clone(&self.classifier),
        }
    }
}

impl<A: InventoryApi, C: CacheBackend> EntityIdResolver<A, C> {
    /// Resolver that classifies Landsat Collection identifiers.
    pub fn new(api: Arc<A>, store: CacheAsideStore<C>) -> Self {
        Self::with_classifier(api, store, Arc::new(LandsatClassifier::new()))
    }

    pub fn with_classifier(
        api: Arc<A>,
        store: CacheAsideStore<C>,
        classifier: Arc<dyn DatasetClassifier>,
    ) -> Self {
        Self {
            api,
            store,
            classifier,
        }
    }

    pub fn api(&self) -> &Arc<A> {
        &self.api
    }

    pub fn store(&self) -> &CacheAsideStore<C> {
        &self.store
    }

    pub fn classifier(&self) -> &dyn DatasetClassifier {
        self.classifier.as_ref()
    }

    /// Resolve entity ids for `ids`, one cache-aside pass per dataset.
    ///
    /// # Errors
    /// * `IdentifierError::Unrecognized` - an id belongs to no known dataset
    /// * `ResolutionError::Unresolved` - strict policy and some id did not resolve
    /// * remote and cache write errors from the underlying calls
    pub async fn resolve(
        &self,
        token: &SessionToken,
        ids: &[SceneId],
        policy: ResolutionPolicy,
    ) -> M2mResult<HashMap<SceneId, EntityId>> {
        let buckets = partition(ids, self.classifier.as_ref())?;

        let mut resolved = HashMap::with_capacity(ids.len());
        for (dataset, bucket) in &buckets {
            tracing::debug!(dataset = %dataset, batch = bucket.len(), ?policy, "Resolving entity ids");
            let found = self
                .store
                .resolve(bucket, CacheKey::id_lookup, |missing| {
                    self.lookup(token, dataset, missing, policy)
                })
                .await?;
            resolved.extend(found);
        }

        if policy.is_strict() {
            ensure_complete("idLookup", ids, &resolved)?;
        }
        Ok(resolved)
    }

    async fn lookup(
        &self,
        token: &SessionToken,
        dataset: &DatasetName,
        mut pending: Vec<SceneId>,
        policy: ResolutionPolicy,
    ) -> M2mResult<HashMap<SceneId, EntityId>> {
        while !pending.is_empty() {
            let err = match self.api.lookup_entity_ids(token, dataset, &pending).await {
                Ok(found) => return Ok(found),
                Err(err) => err,
            };
            let Some(unknown) = retryable_ids(policy, &err) else {
                return Err(err);
            };

            let before = pending.len();
            pending.retain(|id| !unknown.contains(id.as_str()));
            if pending.len() == before {
                return Err(err);
            }
            tracing::debug!(
                dataset = %dataset,
                dropped = before - pending.len(),
                remaining = pending.len(),
                "Retrying entity id lookup without unknown ids"
            );
        }
        Ok(HashMap::new())
    }
}

/// Scene identifier → download URL, through the `download` cache namespace.
///
/// Entity ids are resolved first through the shared `idLookup` namespace.
pub struct DownloadUrlResolver<A: InventoryApi, C: CacheBackend> {
    entity_ids: EntityIdResolver<A, C>,
}

impl<A: InventoryApi, C: CacheBackend> Clone for DownloadUrlResolver<A, C> {
    fn clone(&self) -> Self {
        Self {
            entity_ids: self.entity_ids.clone(),
        }
    }
}

impl<A: InventoryApi, C: CacheBackend> DownloadUrlResolver<A, C> {
    pub fn new(entity_ids: EntityIdResolver<A, C>) -> Self {
        Self { entity_ids }
    }

    /// Resolve one download URL per id for `product`.
    ///
    /// Under the lenient policy ids without an entity id or without a unique
    /// URL are simply absent from the result.
    ///
    /// # Errors
    /// Same as [`EntityIdResolver::resolve`].
    pub async fn resolve(
        &self,
        token: &SessionToken,
        ids: &[SceneId],
        product: &ProductType,
        policy: ResolutionPolicy,
    ) -> M2mResult<HashMap<SceneId, DownloadUrl>> {
        let entities = self.entity_ids.resolve(token, ids, policy).await?;
        let buckets = partition(ids, self.entity_ids.classifier())?;

        let mut resolved = HashMap::with_capacity(entities.len());
        for (dataset, bucket) in buckets {
            let resolvable: Vec<SceneId> = bucket
                .into_iter()
                .filter(|id| entities.contains_key(id))
                .collect();
            if resolvable.is_empty() {
                continue;
            }

            tracing::debug!(dataset = %dataset, batch = resolvable.len(), product = %product, "Resolving download URLs");
            let found = self
                .entity_ids
                .store()
                .resolve(
                    &resolvable,
                    |id| CacheKey::download(product, id),
                    |missing| self.fetch(token, &dataset, &entities, missing, product, policy),
                )
                .await?;
            resolved.extend(found);
        }

        if policy.is_strict() {
            ensure_complete("download", ids, &resolved)?;
        }
        Ok(resolved)
    }

    async fn fetch(
        &self,
        token: &SessionToken,
        dataset: &DatasetName,
        entities: &HashMap<SceneId, EntityId>,
        missing: Vec<SceneId>,
        product: &ProductType,
        policy: ResolutionPolicy,
    ) -> M2mResult<HashMap<SceneId, DownloadUrl>> {
        let mut pending: Vec<(SceneId, EntityId)> = missing
            .into_iter()
            .filter_map(|id| entities.get(&id).cloned().map(|entity| (id, entity)))
            .collect();

        while !pending.is_empty() {
            let entity_ids: Vec<EntityId> = pending.iter().map(|(_, e)| e.clone()).collect();
            let err = match self
                .entity_ids
                .api()
                .fetch_download_urls(token, dataset, &entity_ids, product)
                .await
            {
                Ok(urls) => {
                    return Ok(pending
                        .into_iter()
                        .filter_map(|(scene, entity)| urls.get(&entity).map(|url| (scene, url.clone())))
                        .collect());
                }
                Err(err) => err,
            };
            let Some(unknown) = retryable_ids(policy, &err) else {
                return Err(in_scene_terms(err, &pending));
            };

            let before = pending.len();
            pending.retain(|(_, entity)| !unknown.contains(entity.as_str()));
            if pending.len() == before {
                return Err(in_scene_terms(err, &pending));
            }
            tracing::debug!(
                dataset = %dataset,
                dropped = before - pending.len(),
                remaining = pending.len(),
                "Retrying download URL fetch without unmatched entity ids"
            );
        }
        Ok(HashMap::new())
    }
}
