//! M2M Core - Identifier Types, Errors and Configuration
//!
//! Shared vocabulary for the inventory client: scene/entity identifiers,
//! dataset partitioning, the error taxonomy, configuration, and the
//! [`InventoryApi`] trait every remote implementation satisfies.

pub mod config;
pub mod dataset;
pub mod error;
pub mod identifiers;
pub mod inventory;

pub use config::{
    Credentials, HostRewrite, InventoryConfig, DEFAULT_CACHE_TTL, DEFAULT_REQUEST_TIMEOUT, MAX_CACHE_TTL,
};
pub use dataset::{
    partition, CollectionId, DatasetBuckets, DatasetClassifier, LandsatClassifier,
    ProcessingLevel, Sensor,
};
pub use error::{
    CacheError, ConfigError, IdentifierError, M2mError, M2mResult, RemoteError, ResolutionError,
};
pub use identifiers::{DatasetName, DownloadUrl, EntityId, ProductType, SceneId, SessionToken};
pub use inventory::InventoryApi;
