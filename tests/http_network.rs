//! Integration tests for the reqwest network against a wiremock origin.

use offline_proxy::cache::CacheSource;
use offline_proxy::config::{Config, NetworkConfig};
use offline_proxy::db::Database;
use offline_proxy::event::{Event, EventLoop, Outcome};
use offline_proxy::http::{HttpNetwork, Network, Request};
use offline_proxy::worker::{LogHost, OfflineWorker};
use reqwest::{Method, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn worker_for(server: &MockServer) -> OfflineWorker<offline_proxy::cache::SqliteStorage> {
  let config = Config {
    origin: server.uri(),
    network: NetworkConfig {
      timeout_secs: Some(1),
    },
    ..Config::default()
  };
  let network = HttpNetwork::new(&config.network).unwrap();
  OfflineWorker::with_database(
    config,
    Database::open_in_memory().unwrap(),
    Arc::new(network),
    Arc::new(LogHost),
  )
  .unwrap()
}

#[tokio::test]
async fn test_request_and_response_pass_through() {
  let server = MockServer::start().await;
  Mock::given(method("POST"))
    .and(path("/api/themes"))
    .and(header("content-type", "application/json"))
    .and(body_string(r#"{"name":"Calm"}"#))
    .respond_with(
      ResponseTemplate::new(201)
        .insert_header("x-theme-id", "9")
        .set_body_json(serde_json::json!({ "id": 9 })),
    )
    .expect(1)
    .mount(&server)
    .await;

  let network = HttpNetwork::new(&NetworkConfig::default()).unwrap();
  let url = Url::parse(&format!("{}/api/themes", server.uri())).unwrap();
  let request = Request::new(Method::POST, url)
    .with_header("content-type", "application/json")
    .with_body(r#"{"name":"Calm"}"#);

  let response = network.fetch(&request).await.unwrap();

  assert_eq!(response.status, StatusCode::CREATED);
  assert_eq!(response.header("X-Theme-Id"), Some("9"));
  assert_eq!(response.json_body().unwrap(), serde_json::json!({ "id": 9 }));
}

#[tokio::test]
async fn test_cached_api_response_survives_outage() {
  let server = MockServer::start().await;
  Mock::given(method("GET"))
    .and(path("/api/branding"))
    .respond_with(
      ResponseTemplate::new(200).set_body_json(serde_json::json!({ "primary": "#336699" })),
    )
    .up_to_n_times(1)
    .mount(&server)
    .await;
  // Every later request hangs past the client timeout.
  Mock::given(method("GET"))
    .and(path("/api/branding"))
    .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
    .mount(&server)
    .await;

  let worker = worker_for(&server);
  let events = EventLoop::new(worker.clone());
  let request = Request::get(worker.config().resolve("/api/branding").unwrap());

  let Outcome::Responded { source, .. } = events.run(Event::Fetch(request.clone())).await.unwrap()
  else {
    panic!("fetch did not respond");
  };
  assert_eq!(source, CacheSource::Network);

  let Outcome::Responded { response, source } = events.run(Event::Fetch(request)).await.unwrap()
  else {
    panic!("fetch did not respond");
  };
  assert_eq!(source, CacheSource::Offline);
  assert_eq!(response.status, StatusCode::OK);
  let body = response.json_body().unwrap();
  assert_eq!(body["primary"], "#336699");
  assert_eq!(body["_offline"], true);
}

#[tokio::test]
async fn test_failed_write_is_replayed_on_sync() {
  let server = MockServer::start().await;
  Mock::given(method("POST"))
    .and(path("/api/tenants"))
    .respond_with(ResponseTemplate::new(201).set_delay(Duration::from_secs(5)))
    .up_to_n_times(1)
    .mount(&server)
    .await;
  Mock::given(method("POST"))
    .and(path("/api/tenants"))
    .and(body_string(r#"{"slug":"east"}"#))
    .respond_with(ResponseTemplate::new(201))
    .mount(&server)
    .await;

  let worker = worker_for(&server);
  let request = Request::new(Method::POST, worker.config().resolve("/api/tenants").unwrap())
    .with_body(r#"{"slug":"east"}"#);

  let responded = worker.fetch(request).await.unwrap();
  assert_eq!(responded.response.status, StatusCode::SERVICE_UNAVAILABLE);
  assert_eq!(worker.queue().len("background-sync").unwrap(), 1);

  let report = worker.sync("background-sync").await.unwrap();
  assert_eq!(report.replayed, 1);
  assert_eq!(worker.queue().len("background-sync").unwrap(), 0);
}
