//! M2M Client - Remote Inventory Access
//!
//! HTTP client for the M2M JSON API plus the cache-aside resolvers built on
//! top of it:
//!
//! - [`InventoryClient`]: one request primitive, one method per endpoint
//! - [`EntityIdResolver`] / [`DownloadUrlResolver`]: dataset-partitioned,
//!   cache-aside resolution under a [`ResolutionPolicy`]
//! - [`SceneVerifier`]: lenient existence checks
//! - [`InventoryService`]: the facade order processing uses

pub mod client;
pub mod resolver;
pub mod service;
pub mod telemetry;
pub mod verifier;

pub use client::{parse_envelope, select_download_urls, ApiResponse, InventoryClient};
pub use resolver::{DownloadUrlResolver, EntityIdResolver, ResolutionPolicy};
pub use service::InventoryService;
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
pub use verifier::SceneVerifier;
