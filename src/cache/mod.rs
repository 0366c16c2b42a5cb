//! Named response caches for offline support.
//!
//! This module provides the request-level caching mechanism that:
//! - Keeps named, durable stores of response snapshots keyed by request identity
//! - Implements network-first and cache-first strategies over those stores
//! - Serves stored responses when the network is unavailable

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{CacheStorage, SqliteStorage};
pub(crate) use storage::parse_datetime;
pub use traits::{CacheResult, CacheSource, CachedResponse};
