//! The remote inventory seam.
//!
//! Resolvers only ever talk to the remote service through this trait; the
//! reqwest implementation lives in m2m-client and a mock lives in
//! m2m-test-utils.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::M2mResult;
use crate::identifiers::{DatasetName, DownloadUrl, EntityId, ProductType, SceneId, SessionToken};

/// Authenticated request/response exchange with the inventory service.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait InventoryApi: Send + Sync {
    /// Exchange the configured credentials for a session token.
    ///
    /// # Errors
    /// * `RemoteError::Authentication` - non-success status or malformed response
    async fn login(&self) -> M2mResult<SessionToken>;

    /// Invalidate a token on the remote side.
    async fn logout(&self, token: &SessionToken) -> M2mResult<()>;

    /// Check the service is reachable and speaks the expected API version.
    async fn available(&self) -> M2mResult<bool>;

    /// Look up entity ids for one dataset's batch of scene identifiers.
    ///
    /// # Errors
    /// * `ResolutionError::UnexpectedShape` - `data` is not a mapping
    /// * `ResolutionError::Unresolved` - any requested identifier is missing
    ///   from the response; the whole call fails
    async fn lookup_entity_ids(
        &self,
        token: &SessionToken,
        dataset: &DatasetName,
        ids: &[SceneId],
    ) -> M2mResult<HashMap<SceneId, EntityId>>;

    /// Fetch one download location per entity id, host already rewritten.
    ///
    /// # Errors
    /// * `ResolutionError::Unresolved` - an id matched zero or several URLs
    async fn fetch_download_urls(
        &self,
        token: &SessionToken,
        dataset: &DatasetName,
        entity_ids: &[EntityId],
        product: &ProductType,
    ) -> M2mResult<HashMap<EntityId, DownloadUrl>>;

    /// Attribute subsequent requests to an end user.
    async fn set_user_context(
        &self,
        token: &SessionToken,
        contact_id: u64,
        ip_address: Option<&str>,
    ) -> M2mResult<()>;

    /// Revert to the authenticated machine user.
    async fn clear_user_context(&self, token: &SessionToken) -> M2mResult<()>;
}
