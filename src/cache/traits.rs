//! Core types for the caching system.

use chrono::{DateTime, Utc};

use crate::http::Response;

/// A response snapshot read back from a cache store.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  /// When the snapshot was stored
  pub cached_at: DateTime<Utc>,
}

/// Result from a cache strategy, including the response and where it came from.
#[derive(Debug, Clone)]
pub struct CacheResult {
  /// The response to hand to the caller
  pub response: Response,
  /// Where the response came from
  pub source: CacheSource,
  /// When the response was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl CacheResult {
  /// Create a new cache result from a live network response.
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from a cache hit that skipped the network.
  pub fn from_cache(cached: CachedResponse) -> Self {
    Self {
      response: cached.response,
      source: CacheSource::Cache,
      cached_at: Some(cached.cached_at),
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(cached: CachedResponse) -> Self {
    Self {
      response: cached.response,
      source: CacheSource::Offline,
      cached_at: Some(cached.cached_at),
    }
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, network not consulted
  Cache,
  /// Offline mode - network unavailable, serving cached data
  Offline,
  /// Built by the proxy itself (offline error envelopes, fallback pages)
  Synthetic,
}
