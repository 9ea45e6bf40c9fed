//! Edge cache for outbound reads.
//!
//! This module:
//! - Classifies requests into navigation, API, asset and other
//! - Serves each class with stale-while-revalidate, cache-first or network-first
//! - Applies a soft freshness window to API responses
//! - Keeps one live cache namespace and sweeps the rest on activation

mod classify;
mod layer;
mod storage;
mod traits;
mod version;

pub use classify::{Classifier, ResourceClass};
pub use layer::CacheLayer;
pub use storage::{CacheStorage, SqliteStorage};
pub use traits::{request_key, CacheEntry, CacheSource, Served};
pub use version::VersionedCache;
