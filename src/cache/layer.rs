//! Cache layer that orchestrates caching strategies with network fetching.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::event::WaitUntil;
use crate::http::{Network, Request, RequestIdentity, Response};

use super::storage::CacheStorage;
use super::traits::{CacheResult, CachedResponse};

/// Cache layer that manages caching logic and network fetching.
///
/// Sits between the request router and the network, implementing the
/// network-first and cache-first strategies over named stores.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
}

impl<S: CacheStorage + 'static> CacheLayer<S> {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
    }
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  /// Look up a stored response on the blocking pool.
  pub async fn lookup(
    &self,
    store: &str,
    identity: &RequestIdentity,
  ) -> Result<Option<CachedResponse>> {
    let storage = Arc::clone(&self.storage);
    let store = store.to_string();
    let identity = identity.clone();
    tokio::task::spawn_blocking(move || storage.match_request(&store, &identity))
      .await
      .map_err(|e| eyre!("Cache lookup task failed: {}", e))?
  }

  /// Store a response on the blocking pool without holding up the caller.
  ///
  /// The write is tracked by `wait` so the event is not settled before it lands.
  pub fn put_in_background(
    &self,
    store: &str,
    identity: RequestIdentity,
    response: Response,
    wait: &mut WaitUntil,
  ) {
    let storage = Arc::clone(&self.storage);
    let store = store.to_string();
    wait.push(tokio::task::spawn_blocking(move || {
      storage.put(&store, &identity, &response)
    }));
  }

  /// Fetch with network-first strategy.
  ///
  /// 1. Try the network; a 2xx response is returned as is
  /// 2. 2xx responses are written back to `store` when `write_back` is set
  /// 3. On network failure or a non-2xx response, return the stored copy
  ///    (offline mode)
  ///
  /// Returns `None` when the network gave nothing usable and nothing is stored.
  pub async fn network_first(
    &self,
    store: &str,
    request: &Request,
    network: &dyn Network,
    write_back: bool,
    wait: &mut WaitUntil,
  ) -> Result<Option<CacheResult>> {
    match network.fetch(request).await {
      Ok(response) if response.is_ok() => {
        if write_back {
          debug!(url = %request.url, store, "caching network response");
          self.put_in_background(store, request.identity(), response.clone(), wait);
        }
        return Ok(Some(CacheResult::from_network(response)));
      }
      Ok(response) => {
        warn!(
          url = %request.url,
          status = %response.status,
          "unusable response, falling back to cache"
        );
      }
      Err(err) => {
        warn!(url = %request.url, error = %err, "network unavailable, falling back to cache");
      }
    }

    // Serve the stale copy (offline mode)
    Ok(self
      .lookup(store, &request.identity())
      .await?
      .map(CacheResult::offline))
  }

  /// Fetch with cache-first strategy.
  ///
  /// 1. Check cache - if present, return immediately without the network
  /// 2. If missing, fetch from network and store 2xx responses
  ///
  /// A network failure on a miss is returned as `Err`.
  pub async fn cache_first(
    &self,
    store: &str,
    request: &Request,
    network: &dyn Network,
    wait: &mut WaitUntil,
  ) -> Result<CacheResult> {
    let identity = request.identity();
    if let Some(cached) = self.lookup(store, &identity).await? {
      return Ok(CacheResult::from_cache(cached));
    }

    let response = network.fetch(request).await?;
    if response.is_ok() {
      self.put_in_background(store, identity, response.clone(), wait);
    }
    Ok(CacheResult::from_network(response))
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
    }
  }
}
