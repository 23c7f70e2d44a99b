//! Scene existence checks.

use std::collections::HashMap;

use m2m_cache::CacheBackend;
use m2m_core::{InventoryApi, M2mResult, SceneId, SessionToken};

use crate::resolver::{EntityIdResolver, ResolutionPolicy};

/// Reports which scene identifiers the inventory knows about.
///
/// An id is known when it resolves to an entity id; lookups share the
/// `idLookup` cache namespace with conversion.
pub struct SceneVerifier<A: InventoryApi, C: CacheBackend> {
    entity_ids: EntityIdResolver<A, C>,
}

impl<A: InventoryApi, C: CacheBackend> SceneVerifier<A, C> {
    pub fn new(entity_ids: EntityIdResolver<A, C>) -> Self {
        Self { entity_ids }
    }

    /// Map every requested id to whether it resolved.
    ///
    /// Never fails because an id is unknown; only unclassifiable ids and
    /// remote or cache write failures are errors.
    pub async fn verify(
        &self,
        token: &SessionToken,
        ids: &[SceneId],
    ) -> M2mResult<HashMap<SceneId, bool>> {
        let resolved = self
            .entity_ids
            .resolve(token, ids, ResolutionPolicy::Lenient)
            .await?;

        let results: HashMap<SceneId, bool> = ids
            .iter()
            .map(|id| (id.clone(), resolved.contains_key(id)))
            .collect();
        tracing::debug!(
            requested = results.len(),
            found = resolved.len(),
            "Verified scenes"
        );
        Ok(results)
    }
}
