use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use tracing::{debug, warn};

use crate::cache::{CacheResult, CacheSource, CacheStorage};
use crate::event::WaitUntil;
use crate::http::{Request, RequestIdentity, Response};

use super::envelope::{self, NO_CACHED_DATA, REQUEST_FAILED};
use super::router::RequestClass;
use super::OfflineWorker;

/// The answer to an intercepted request plus the work still running for it.
#[derive(Debug)]
pub struct Responded {
  pub response: Response,
  pub source: CacheSource,
  /// Cache writes started on behalf of this request
  pub wait_until: WaitUntil,
}

impl Responded {
  fn new(result: CacheResult, wait_until: WaitUntil) -> Self {
    Self {
      response: result.response,
      source: result.source,
      wait_until,
    }
  }

  fn synthetic(response: Response, wait_until: WaitUntil) -> Self {
    Self {
      response,
      source: CacheSource::Synthetic,
      wait_until,
    }
  }
}

impl<S: CacheStorage + 'static> OfflineWorker<S> {
  /// Handle an intercepted request.
  ///
  /// Only passthrough requests and static misses without a fallback surface
  /// network failures as `Err`; API requests always get a JSON answer.
  pub async fn fetch(&self, request: Request) -> Result<Responded> {
    let class = self.router.classify(&request);
    debug!(method = %request.method, url = %request.url, ?class, "intercepted request");

    match class {
      RequestClass::MutatingApi => self.fetch_mutating(&request).await,
      RequestClass::CacheableApi => self.fetch_api(&request, true).await,
      RequestClass::NonCacheableApi => self.fetch_api(&request, false).await,
      RequestClass::StaticAsset => self.fetch_static(&request).await,
      RequestClass::Passthrough => {
        let response = self.network.fetch(&request).await?;
        Ok(Responded::new(
          CacheResult::from_network(response),
          WaitUntil::new(),
        ))
      }
    }
  }

  /// Writes go straight to the network and are never answered from cache.
  async fn fetch_mutating(&self, request: &Request) -> Result<Responded> {
    match self.network.fetch(request).await {
      Ok(response) => Ok(Responded::new(
        CacheResult::from_network(response),
        WaitUntil::new(),
      )),
      Err(err) => {
        warn!(
          method = %request.method,
          url = %request.url,
          error = %err,
          "mutating request failed"
        );
        if self.config.sync.queue_failed_mutations {
          let queue = self.queue.clone();
          let tag = self.config.sync.tag.clone();
          let queued = request.clone();
          let id = tokio::task::spawn_blocking(move || -> Result<i64> {
            let id = queue.enqueue(&tag, &queued)?;
            queue.register(&tag)?;
            Ok(id)
          })
          .await
          .map_err(|e| eyre!("Queue task failed: {}", e))??;
          debug!(id, tag = %self.config.sync.tag, "queued request for background sync");
        }
        Ok(Responded::synthetic(
          envelope::offline_error(REQUEST_FAILED),
          WaitUntil::new(),
        ))
      }
    }
  }

  async fn fetch_api(&self, request: &Request, cacheable: bool) -> Result<Responded> {
    let store = self.config.api_cache_name();
    let mut wait = WaitUntil::new();

    let result = self
      .cache
      .network_first(&store, request, self.network.as_ref(), cacheable, &mut wait)
      .await?;

    let responded = match result {
      Some(mut result) if result.source == CacheSource::Offline => {
        result.response = envelope::offline_envelope(&result.response, Utc::now());
        Responded::new(result, wait)
      }
      Some(result) => Responded::new(result, wait),
      None => Responded::synthetic(envelope::offline_error(NO_CACHED_DATA), wait),
    };
    Ok(responded)
  }

  async fn fetch_static(&self, request: &Request) -> Result<Responded> {
    let store = self.config.static_cache_name();
    let mut wait = WaitUntil::new();

    let result = self
      .cache
      .cache_first(&store, request, self.network.as_ref(), &mut wait)
      .await;

    match result {
      Ok(result) => Ok(Responded::new(result, wait)),
      Err(err) if request.is_navigation() => {
        warn!(url = %request.url, error = %err, "navigation failed, serving app shell");
        let root = RequestIdentity::get(self.config.resolve("/")?);
        let responded = match self.cache.lookup(&store, &root).await? {
          Some(cached) => Responded::new(CacheResult::offline(cached), wait),
          None => Responded::synthetic(envelope::offline_page(), wait),
        };
        Ok(responded)
      }
      Err(err) => Err(err),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::test_utils::{test_worker, url};
  use reqwest::{Method, StatusCode};
  use serde_json::json;

  #[tokio::test]
  async fn test_cacheable_get_online_is_returned_and_stored() {
    let (worker, network, _) = test_worker();
    let body = json!({ "id": 7, "name": "Acme Clinic" });
    let live = Response::json(StatusCode::OK, &body).with_header("x-request-id", "abc");
    network.respond(url("/api/organizations/7"), live.clone());

    let responded = worker
      .fetch(Request::get(url("/api/organizations/7")))
      .await
      .unwrap();
    assert_eq!(responded.source, CacheSource::Network);
    assert_eq!(responded.response, live);

    responded.wait_until.settled().await.unwrap();
    let cached = worker
      .storage()
      .match_request("api-v1", &RequestIdentity::get(url("/api/organizations/7")))
      .unwrap()
      .unwrap();
    assert_eq!(cached.response.body, live.body);
  }

  #[tokio::test]
  async fn test_cacheable_get_offline_serves_envelope() {
    let (worker, network, _) = test_worker();
    network.respond(
      url("/api/sounds"),
      Response::json(StatusCode::OK, &json!({ "items": ["rain", "waves"], "total": 2 })),
    );
    worker
      .fetch(Request::get(url("/api/sounds")))
      .await
      .unwrap()
      .wait_until
      .settled()
      .await
      .unwrap();

    network.set_offline(true);
    let responded = worker.fetch(Request::get(url("/api/sounds"))).await.unwrap();

    assert_eq!(responded.source, CacheSource::Offline);
    assert_eq!(responded.response.status, StatusCode::OK);
    let body = responded.response.json_body().unwrap();
    assert_eq!(body["items"], json!(["rain", "waves"]));
    assert_eq!(body["total"], 2);
    assert_eq!(body["_offline"], true);
    assert!(chrono::DateTime::parse_from_rfc3339(body["_cachedAt"].as_str().unwrap()).is_ok());
  }

  #[tokio::test]
  async fn test_cacheable_get_error_status_serves_envelope() {
    let (worker, network, _) = test_worker();
    network.respond(
      url("/api/sounds"),
      Response::json(StatusCode::OK, &json!({ "items": [1] })),
    );
    worker
      .fetch(Request::get(url("/api/sounds")))
      .await
      .unwrap()
      .wait_until
      .settled()
      .await
      .unwrap();

    network.respond(
      url("/api/sounds"),
      Response::new(StatusCode::SERVICE_UNAVAILABLE)
        .with_header("content-type", "text/html")
        .with_body("<html>bad gateway</html>"),
    );
    let before = Utc::now() - chrono::Duration::milliseconds(1);
    let responded = worker.fetch(Request::get(url("/api/sounds"))).await.unwrap();

    assert_eq!(responded.source, CacheSource::Offline);
    assert_eq!(responded.response.status, StatusCode::OK);
    let body = responded.response.json_body().unwrap();
    assert_eq!(body["items"], json!([1]));
    assert_eq!(body["_offline"], true);
    let cached_at = chrono::DateTime::parse_from_rfc3339(body["_cachedAt"].as_str().unwrap())
      .unwrap()
      .with_timezone(&Utc);
    assert!(cached_at >= before);

    let stored = worker
      .storage()
      .match_request("api-v1", &RequestIdentity::get(url("/api/sounds")))
      .unwrap()
      .unwrap();
    assert_eq!(stored.response.json_body().unwrap(), json!({ "items": [1] }));
  }

  #[tokio::test]
  async fn test_cacheable_get_error_status_without_cache() {
    let (worker, network, _) = test_worker();
    network.respond(url("/api/tenants/9"), Response::new(StatusCode::BAD_GATEWAY));

    let responded = worker
      .fetch(Request::get(url("/api/tenants/9")))
      .await
      .unwrap();

    assert_eq!(responded.source, CacheSource::Synthetic);
    assert_eq!(
      responded.response.json_body().unwrap(),
      json!({ "error": NO_CACHED_DATA, "offline": true })
    );
    assert_eq!(worker.storage().len("api-v1").unwrap(), 0);
  }

  #[tokio::test]
  async fn test_cacheable_get_offline_without_cache() {
    let (worker, network, _) = test_worker();
    network.set_offline(true);

    let responded = worker
      .fetch(Request::get(url("/api/organizations/1")))
      .await
      .unwrap();

    assert_eq!(responded.source, CacheSource::Synthetic);
    assert_eq!(responded.response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
      responded.response.json_body().unwrap(),
      json!({ "error": NO_CACHED_DATA, "offline": true })
    );
  }

  #[tokio::test]
  async fn test_non_cacheable_get_is_not_stored() {
    let (worker, network, _) = test_worker();
    network.respond(
      url("/api/auth/session"),
      Response::json(StatusCode::OK, &json!({ "user": "amy" })),
    );

    let responded = worker
      .fetch(Request::get(url("/api/auth/session")))
      .await
      .unwrap();
    assert!(responded.wait_until.is_empty());
    assert_eq!(worker.storage().len("api-v1").unwrap(), 0);

    network.set_offline(true);
    let offline = worker
      .fetch(Request::get(url("/api/auth/session")))
      .await
      .unwrap();
    assert_eq!(offline.response.status, StatusCode::SERVICE_UNAVAILABLE);
  }

  fn seed_organizations(worker: &OfflineWorker<SqliteStorage>) {
    worker
      .storage()
      .put(
        "api-v1",
        &RequestIdentity::get(url("/api/organizations")),
        &Response::json(StatusCode::OK, &json!([{ "id": 1 }])),
      )
      .unwrap();
  }

  #[tokio::test]
  async fn test_mutating_request_offline() {
    let (worker, network, _) = test_worker();
    seed_organizations(&worker);
    network.set_offline(true);

    let request = Request::new(Method::POST, url("/api/organizations"))
      .with_header("content-type", "application/json")
      .with_body(r#"{"name":"New Org"}"#);
    let responded = worker.fetch(request).await.unwrap();

    assert_eq!(responded.source, CacheSource::Synthetic);
    assert_eq!(responded.response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
      responded.response.json_body().unwrap(),
      json!({ "error": REQUEST_FAILED, "offline": true })
    );
    assert!(responded.wait_until.is_empty());
    assert_eq!(worker.storage().keys().unwrap(), vec!["api-v1"]);
    assert_eq!(worker.storage().len("api-v1").unwrap(), 1);
    assert_eq!(worker.queue().len("background-sync").unwrap(), 1);
  }

  #[tokio::test]
  async fn test_mutating_request_online_is_not_cached() {
    let (worker, network, _) = test_worker();
    seed_organizations(&worker);
    network.respond_to(
      Method::POST,
      url("/api/organizations"),
      Response::json(StatusCode::CREATED, &json!({ "id": 2 })),
    );

    let responded = worker
      .fetch(Request::new(Method::POST, url("/api/organizations")))
      .await
      .unwrap();
    assert_eq!(responded.source, CacheSource::Network);
    assert_eq!(responded.response.json_body().unwrap(), json!({ "id": 2 }));
    assert!(responded.wait_until.is_empty());

    assert_eq!(worker.storage().len("api-v1").unwrap(), 1);
    let cached = worker
      .storage()
      .match_request("api-v1", &RequestIdentity::get(url("/api/organizations")))
      .unwrap()
      .unwrap();
    assert_eq!(cached.response.json_body().unwrap(), json!([{ "id": 1 }]));
    assert_eq!(worker.queue().len("background-sync").unwrap(), 0);
  }

  #[tokio::test]
  async fn test_static_hit_skips_network() {
    let (worker, network, _) = test_worker();
    let logo = Response::new(StatusCode::OK)
      .with_header("content-type", "image/png")
      .with_body(vec![0x89, 0x50, 0x4e, 0x47]);
    worker
      .storage()
      .put("static-v1", &RequestIdentity::get(url("/logo192.png")), &logo)
      .unwrap();

    let responded = worker.fetch(Request::get(url("/logo192.png"))).await.unwrap();

    assert_eq!(network.calls(), 0);
    assert_eq!(responded.source, CacheSource::Cache);
    assert_eq!(responded.response, logo);
  }

  #[tokio::test]
  async fn test_static_miss_fetches_and_stores() {
    let (worker, network, _) = test_worker();
    network.respond(
      url("/static/js/chunk.js"),
      Response::new(StatusCode::OK).with_body("console.log(1)"),
    );

    let first = worker
      .fetch(Request::get(url("/static/js/chunk.js")))
      .await
      .unwrap();
    assert_eq!(first.source, CacheSource::Network);
    first.wait_until.settled().await.unwrap();

    let second = worker
      .fetch(Request::get(url("/static/js/chunk.js")))
      .await
      .unwrap();
    assert_eq!(second.source, CacheSource::Cache);
    assert_eq!(network.calls(), 1);
  }

  #[tokio::test]
  async fn test_navigation_offline_serves_cached_root() {
    let (worker, network, _) = test_worker();
    let shell = Response::new(StatusCode::OK).with_body("<html>shell</html>");
    worker
      .storage()
      .put("static-v1", &RequestIdentity::get(url("/")), &shell)
      .unwrap();
    network.set_offline(true);

    let responded = worker
      .fetch(Request::navigate(url("/settings/branding")))
      .await
      .unwrap();
    assert_eq!(responded.response.text_body(), "<html>shell</html>");
  }

  #[tokio::test]
  async fn test_navigation_offline_without_cache() {
    let (worker, network, _) = test_worker();
    network.set_offline(true);

    let responded = worker.fetch(Request::navigate(url("/"))).await.unwrap();
    assert_eq!(responded.source, CacheSource::Synthetic);
    assert_eq!(responded.response.text_body(), "Offline");
  }

  #[tokio::test]
  async fn test_subresource_offline_miss_is_an_error() {
    let (worker, network, _) = test_worker();
    network.set_offline(true);

    assert!(worker.fetch(Request::get(url("/static/css/main.css"))).await.is_err());
  }
}
