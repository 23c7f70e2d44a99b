//! M2M Cache - Cache-Aside Batching
//!
//! Shared-cache layer for the inventory client.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌────────────────┐     ┌─────────────────┐
//! │   Resolver   │────▶│ CacheAsideStore│────▶│  CacheBackend   │
//! │ (m2m-client) │     │ get/set/resolve│     │ (memory, LMDB)  │
//! └──────────────┘     └───────┬────────┘     └─────────────────┘
//!                              │ misses only
//!                              ▼
//!                      ┌────────────────┐
//!                      │  InventoryApi  │
//!                      └────────────────┘
//! ```
//!
//! Keys are structured ([`CacheKey`]) and encoded once at the backend
//! boundary. Values are JSON. Every entry gets the same TTL at write time and
//! is never invalidated explicitly.

mod key;
mod lmdb_backend;
mod memory;
mod session;
mod store;
mod traits;

pub use key::{CacheKey, ResourceKind};
pub use lmdb_backend::{LmdbCacheBackend, LmdbCacheError};
pub use memory::InMemoryCacheBackend;
pub use session::SessionCache;
pub use store::{CacheAsideStore, CacheConfig};
pub use traits::{CacheBackend, CacheStats};
