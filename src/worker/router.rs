use reqwest::Method;

use crate::config::ApiConfig;
use crate::http::Request;

/// Which strategy applies to an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// GET outside the API prefix: cache-first
  StaticAsset,
  /// GET on a cacheable API prefix: network-first with write-back
  CacheableApi,
  /// GET on any other API path: network-first, never written back
  NonCacheableApi,
  /// Non-GET on an API path: network only, offline error on failure
  MutatingApi,
  /// Non-GET outside the API prefix: untouched
  Passthrough,
}

/// Classifies requests by plain path-prefix matching.
#[derive(Debug, Clone)]
pub struct RequestRouter {
  api_prefix: String,
  cacheable: Vec<String>,
}

impl RequestRouter {
  pub fn new(api: &ApiConfig) -> Self {
    Self {
      api_prefix: api.prefix.clone(),
      cacheable: api.cacheable.clone(),
    }
  }

  pub fn is_api_path(&self, path: &str) -> bool {
    path.starts_with(&self.api_prefix)
  }

  pub fn is_cacheable(&self, path: &str) -> bool {
    self.cacheable.iter().any(|prefix| path.starts_with(prefix.as_str()))
  }

  pub fn classify(&self, request: &Request) -> RequestClass {
    let path = request.url.path();
    let is_get = request.method == Method::GET;

    match (self.is_api_path(path), is_get) {
      (true, false) => RequestClass::MutatingApi,
      (true, true) if self.is_cacheable(path) => RequestClass::CacheableApi,
      (true, true) => RequestClass::NonCacheableApi,
      (false, true) => RequestClass::StaticAsset,
      (false, false) => RequestClass::Passthrough,
    }
  }
}
