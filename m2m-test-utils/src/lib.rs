//! M2M Test Utilities
//!
//! Shared test infrastructure for the M2M workspace:
//! - A scripted in-process [`InventoryApi`] with a call log
//! - Cache backends that record writes or fail on demand
//! - Proptest generators for scene identifiers
//! - Test fixtures for configuration

pub use m2m_cache::{CacheAsideStore, CacheBackend, CacheConfig, CacheStats, InMemoryCacheBackend};
pub use m2m_core::{
    Credentials, DatasetName, DownloadUrl, EntityId, HostRewrite, InventoryApi, InventoryConfig,
    M2mError, M2mResult, ProductType, RemoteError, ResolutionError, SceneId, SessionToken,
};

use async_trait::async_trait;
use m2m_core::CacheError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// MOCK INVENTORY
// ============================================================================

/// One recorded call against [`MockInventoryApi`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Login,
    Logout,
    Available,
    LookupEntityIds {
        dataset: DatasetName,
        ids: Vec<SceneId>,
    },
    FetchDownloadUrls {
        dataset: DatasetName,
        entity_ids: Vec<EntityId>,
        product: ProductType,
    },
    SetUserContext {
        contact_id: u64,
        ip_address: Option<String>,
    },
    ClearUserContext,
}

/// In-process inventory with a fixed catalogue.
///
/// Follows the same contract as the HTTP client: a lookup or download
/// request that names any unknown id fails as a whole with
/// `ResolutionError::Unresolved` listing those ids.
#[derive(Debug, Default)]
pub struct MockInventoryApi {
    entities: HashMap<SceneId, EntityId>,
    downloads: HashMap<EntityId, Vec<DownloadUrl>>,
    reject_login: bool,
    api_version_matches: bool,
    next_error: Mutex<Option<M2mError>>,
    logins: AtomicUsize,
    calls: Mutex<Vec<MockCall>>,
}

impl MockInventoryApi {
    pub fn new() -> Self {
        Self {
            api_version_matches: true,
            ..Default::default()
        }
    }

    /// Register a scene and its entity id.
    pub fn with_scene(mut self, scene: impl Into<SceneId>, entity: impl Into<EntityId>) -> Self {
        self.entities.insert(scene.into(), entity.into());
        self
    }

    /// Register a download URL candidate for an entity id.
    pub fn with_download(mut self, entity: impl Into<EntityId>, url: impl Into<DownloadUrl>) -> Self {
        self.downloads.entry(entity.into()).or_default().push(url.into());
        self
    }

    /// Make every login fail with `RemoteError::Authentication`.
    pub fn rejecting_login(mut self) -> Self {
        self.reject_login = true;
        self
    }

    /// Make `available` report a version mismatch.
    pub fn with_version_mismatch(mut self) -> Self {
        self.api_version_matches = false;
        self
    }

    /// Fail the next call (of any kind) with `err`.
    pub fn fail_next(&self, err: impl Into<M2mError>) {
        if let Ok(mut next) = self.next_error.lock() {
            *next = Some(err.into());
        }
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Only the entity id lookup calls, as (dataset, ids) pairs.
    pub fn lookup_calls(&self) -> Vec<(DatasetName, Vec<SceneId>)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                MockCall::LookupEntityIds { dataset, ids } => Some((dataset, ids)),
                _ => None,
            })
            .collect()
    }

    /// Only the download calls, as (dataset, entity ids) pairs.
    pub fn download_calls(&self) -> Vec<(DatasetName, Vec<EntityId>)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                MockCall::FetchDownloadUrls {
                    dataset,
                    entity_ids,
                    ..
                } => Some((dataset, entity_ids)),
                _ => None,
            })
            .collect()
    }

    pub fn login_count(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn clear_calls(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    fn record(&self, call: MockCall) -> M2mResult<()> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
        match self.next_error.lock().ok().and_then(|mut next| next.take()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn issue_token(&self) -> M2mResult<SessionToken> {
        if self.reject_login {
            return Err(RemoteError::Authentication {
                reason: "invalid username or password".to_string(),
            }
            .into());
        }
        let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SessionToken::new(format!("mock-token-{}", n)))
    }
}

#[async_trait]
impl InventoryApi for MockInventoryApi {
    async fn login(&self) -> M2mResult<SessionToken> {
        self.record(MockCall::Login)?;
        self.issue_token()
    }

    async fn logout(&self, _token: &SessionToken) -> M2mResult<()> {
        self.record(MockCall::Logout)
    }

    async fn available(&self) -> M2mResult<bool> {
        self.record(MockCall::Available)?;
        self.issue_token()?;
        Ok(self.api_version_matches)
    }

    async fn lookup_entity_ids(
        &self,
        _token: &SessionToken,
        dataset: &DatasetName,
        ids: &[SceneId],
    ) -> M2mResult<HashMap<SceneId, EntityId>> {
        self.record(MockCall::LookupEntityIds {
            dataset: dataset.clone(),
            ids: ids.to_vec(),
        })?;

        let missing: Vec<&str> = ids
            .iter()
            .filter(|id| !self.entities.contains_key(*id))
            .map(|id| id.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(ResolutionError::unresolved("idLookup", missing).into());
        }
        Ok(ids
            .iter()
            .filter_map(|id| self.entities.get(id).map(|e| (id.clone(), e.clone())))
            .collect())
    }

    async fn fetch_download_urls(
        &self,
        _token: &SessionToken,
        dataset: &DatasetName,
        entity_ids: &[EntityId],
        product: &ProductType,
    ) -> M2mResult<HashMap<EntityId, DownloadUrl>> {
        self.record(MockCall::FetchDownloadUrls {
            dataset: dataset.clone(),
            entity_ids: entity_ids.to_vec(),
            product: product.clone(),
        })?;

        let mut found = HashMap::new();
        let mut unmatched = Vec::new();
        for id in entity_ids {
            match self.downloads.get(id).map(Vec::as_slice) {
                Some([url]) => {
                    found.insert(id.clone(), url.clone());
                }
                _ => unmatched.push(id.as_str()),
            }
        }
        if !unmatched.is_empty() {
            return Err(ResolutionError::unresolved("download", unmatched).into());
        }
        Ok(found)
    }

    async fn set_user_context(
        &self,
        _token: &SessionToken,
        contact_id: u64,
        ip_address: Option<&str>,
    ) -> M2mResult<()> {
        self.record(MockCall::SetUserContext {
            contact_id,
            ip_address: ip_address.map(str::to_string),
        })
    }

    async fn clear_user_context(&self, _token: &SessionToken) -> M2mResult<()> {
        self.record(MockCall::ClearUserContext)
    }
}

// ============================================================================
// CACHE BACKENDS
// ============================================================================

/// In-memory backend that records every write and can be switched to fail.
#[derive(Debug, Default)]
pub struct RecordingCacheBackend {
    inner: InMemoryCacheBackend,
    fail_reads: AtomicBool,
    reject_writes: AtomicBool,
    writes: Mutex<Vec<Vec<String>>>,
}

impl RecordingCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `get_multi` return a backend error.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make `set_multi` report that the write did not apply.
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Keys of every `set_multi` call, sorted within each call.
    pub fn writes(&self) -> Vec<Vec<String>> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// Every key ever written, in write order.
    pub fn written_keys(&self) -> Vec<String> {
        self.writes().into_iter().flatten().collect()
    }
}

#[async_trait]
impl CacheBackend for RecordingCacheBackend {
    async fn get_multi(&self, keys: &[String]) -> M2mResult<HashMap<String, String>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CacheError::Backend {
                reason: "connection refused".to_string(),
            }
            .into());
        }
        self.inner.get_multi(keys).await
    }

    async fn set_multi(&self, entries: &HashMap<String, String>, ttl: Duration) -> M2mResult<bool> {
        let mut keys: Vec<String> = entries.keys().cloned().collect();
        keys.sort();
        if let Ok(mut writes) = self.writes.lock() {
            writes.push(keys);
        }
        if self.reject_writes.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.inner.set_multi(entries, ttl).await
    }

    async fn stats(&self) -> M2mResult<CacheStats> {
        self.inner.stats().await
    }
}

/// Backend whose every operation fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableCacheBackend;

#[async_trait]
impl CacheBackend for UnavailableCacheBackend {
    async fn get_multi(&self, _keys: &[String]) -> M2mResult<HashMap<String, String>> {
        Err(CacheError::Backend {
            reason: "cache unavailable".to_string(),
        }
        .into())
    }

    async fn set_multi(&self, _entries: &HashMap<String, String>, _ttl: Duration) -> M2mResult<bool> {
        Err(CacheError::Backend {
            reason: "cache unavailable".to_string(),
        }
        .into())
    }

    async fn stats(&self) -> M2mResult<CacheStats> {
        Ok(CacheStats::default())
    }
}

/// A store over a fresh [`RecordingCacheBackend`], plus the backend handle.
pub fn recording_store() -> (CacheAsideStore<RecordingCacheBackend>, Arc<RecordingCacheBackend>) {
    let backend = Arc::new(RecordingCacheBackend::new());
    (CacheAsideStore::with_defaults(Arc::clone(&backend)), backend)
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for identifiers.

    use super::*;
    use proptest::prelude::*;

    /// Sensor/satellite prefixes with the collections they exist in.
    const PREFIXES: &[(&str, &[&str])] = &[
        ("LC08", &["01", "02"]),
        ("LO08", &["01", "02"]),
        ("LT08", &["01", "02"]),
        ("LC09", &["02"]),
        ("LE07", &["01", "02"]),
        ("LT05", &["01", "02"]),
        ("LT04", &["01", "02"]),
    ];

    /// Generate a recognized Level-1 Landsat Collection identifier.
    pub fn arb_scene_id() -> impl Strategy<Value = SceneId> {
        (
            (0..PREFIXES.len()).prop_flat_map(|i| {
                let (prefix, collections) = PREFIXES[i];
                (Just(prefix), prop::sample::select(collections.to_vec()))
            }),
            prop_oneof![Just("L1TP"), Just("L1GT"), Just("L1GS")],
            1u16..=233,
            1u16..=248,
            1984i32..=2023,
            1u32..=12,
            1u32..=28,
            prop_oneof![Just("T1"), Just("T2"), Just("RT")],
        )
            .prop_map(
                |((prefix, collection), level, path, row, year, month, day, tier)| {
                    SceneId::new(format!(
                        "{}_{}_{:03}{:03}_{:04}{:02}{:02}_{:04}{:02}{:02}_{}_{}",
                        prefix, level, path, row, year, month, day, year, month, day, collection, tier
                    ))
                },
            )
    }

    /// Generate an identifier no classifier recognizes.
    pub fn arb_unrecognized_id() -> impl Strategy<Value = SceneId> {
        "[a-z]{1,12}".prop_map(SceneId::new)
    }

    /// Generate a list of recognized identifiers, possibly with repeats.
    pub fn arb_scene_ids(max: usize) -> impl Strategy<Value = Vec<SceneId>> {
        prop::collection::vec(arb_scene_id(), 0..=max)
    }

    /// Generate an entity id in the legacy `LC8PPPRRRYYYYDDDLGN00` style.
    pub fn arb_entity_id() -> impl Strategy<Value = EntityId> {
        "L[CET][4-8][0-9]{13}[A-Z]{3}0[0-2]".prop_map(EntityId::new)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;

    pub const L8_SCENE: &str = "LC08_L1TP_044034_20130330_20170310_01_T1";
    pub const L8_ENTITY: &str = "LC80440342013089LGN01";
    pub const L7_SCENE: &str = "LE07_L1TP_026043_20160728_20160823_01_T1";
    pub const L7_ENTITY: &str = "LE70260432016210EDC00";
    pub const L5_SCENE: &str = "LT05_L1TP_038038_19950624_20160927_01_T1";
    pub const L5_ENTITY: &str = "LT50380381995175PAC01";

    pub const EXTERNAL_HOST: &str = "dds.cr.usgs.gov";
    pub const INTERNAL_HOST: &str = "invalid.host";

    pub fn test_credentials() -> Credentials {
        Credentials::new("espa_admin", "not-a-real-password")
    }

    pub fn test_rewrite() -> HostRewrite {
        HostRewrite::new(EXTERNAL_HOST, INTERNAL_HOST).expect("fixture hosts are non-empty")
    }

    /// A config pointing at an unroutable host.
    pub fn test_config() -> InventoryConfig {
        InventoryConfig::new(
            "http://127.0.0.1:9/inventory/json/v/1.4.1/",
            test_credentials(),
            test_rewrite(),
        )
        .expect("fixture base URL is valid")
        .with_api_version("1.4.1")
    }

    /// Internal download URL for an entity id.
    pub fn download_url(entity: &str) -> String {
        format!("http://{}/download/{}.tar.gz", INTERNAL_HOST, entity)
    }

    /// Mock inventory that knows the three fixture scenes and their downloads.
    pub fn known_inventory() -> MockInventoryApi {
        MockInventoryApi::new()
            .with_scene(L8_SCENE, L8_ENTITY)
            .with_scene(L7_SCENE, L7_ENTITY)
            .with_scene(L5_SCENE, L5_ENTITY)
            .with_download(L8_ENTITY, download_url(L8_ENTITY))
            .with_download(L7_ENTITY, download_url(L7_ENTITY))
            .with_download(L5_ENTITY, download_url(L5_ENTITY))
    }

    pub fn scene(id: &str) -> SceneId {
        SceneId::from(id)
    }

    pub fn scenes(ids: &[&str]) -> Vec<SceneId> {
        ids.iter().map(|id| SceneId::from(*id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::generators::*;
    use super::*;
    use m2m_core::{DatasetClassifier, LandsatClassifier};
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_mock_lookup_fails_whole_batch_on_unknown_id() {
        let api = known_inventory();
        let token = api.login().await.unwrap();
        let err = api
            .lookup_entity_ids(
                &token,
                &DatasetName::from("LANDSAT_8_C1"),
                &scenes(&[L8_SCENE, "LC08_L1TP_000000_20130330_20170310_01_T1"]),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err.unresolved_ids(),
            Some(&["LC08_L1TP_000000_20130330_20170310_01_T1".to_string()][..])
        );
        assert_eq!(api.lookup_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_mock_fail_next_applies_once() {
        let api = known_inventory();
        api.fail_next(RemoteError::Transport {
            endpoint: "login".to_string(),
            status: 502,
            message: "bad gateway".to_string(),
        });
        assert!(api.login().await.is_err());
        assert!(api.login().await.is_ok());
        assert_eq!(api.login_count(), 1);
    }

    #[tokio::test]
    async fn test_recording_backend_rejects_writes_on_demand() {
        let backend = RecordingCacheBackend::new();
        backend.set_reject_writes(true);
        let mut entries = HashMap::new();
        entries.insert("k".to_string(), "v".to_string());
        assert!(!backend.set_multi(&entries, Duration::from_secs(1)).await.unwrap());
        assert_eq!(backend.written_keys(), vec!["k".to_string()]);
    }

    proptest! {
        /// Property: generated scene ids are always recognized.
        #[test]
        fn prop_generated_scene_ids_classify(id in arb_scene_id()) {
            prop_assert!(LandsatClassifier.dataset(&id).is_ok());
        }

        /// Property: unrecognized ids never classify.
        #[test]
        fn prop_unrecognized_ids_fail(id in arb_unrecognized_id()) {
            prop_assert!(LandsatClassifier.dataset(&id).is_err());
        }
    }
}
