//! Response caching for offline support.
//!
//! This module provides:
//! - A request interceptor choosing network-first or cache-first per request
//! - Named, version-tagged caches stored in SQLite
//! - The install/activate lifecycle that evicts old generations

pub mod layer;
pub mod lifecycle;
pub mod storage;
pub mod traits;

pub use layer::{Intercepted, Interceptor, RequestKind};
pub use lifecycle::{CacheGeneration, CacheLifecycle, LifecycleState, DEFAULT_CACHE_VERSION};
pub use storage::{ResponseStore, SqliteCacheStorage};
pub use traits::{CacheKey, CacheResult, CacheSource};
