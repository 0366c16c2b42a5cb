//! Test doubles for the network and the host runtime.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::{Method, StatusCode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

use crate::cache::SqliteStorage;
use crate::config::Config;
use crate::db::Database;
use crate::http::{Network, Request, Response};
use crate::worker::{Host, Notification, OfflineWorker, ReplayQueue};

/// URL for `path` on the default origin.
pub fn url(path: &str) -> Url {
  Url::parse("http://localhost:3000").unwrap().join(path).unwrap()
}

/// Network that answers from a fixed route table. Unknown routes get a 404.
#[derive(Default)]
pub struct ScriptedNetwork {
  routes: Mutex<HashMap<(Method, Url), Response>>,
  delays: Mutex<HashMap<Url, Duration>>,
  offline: AtomicBool,
  requests: Mutex<Vec<Request>>,
  delivered: Mutex<Vec<Request>>,
}

impl ScriptedNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, url: Url, response: Response) {
    self.respond_to(Method::GET, url, response);
  }

  pub fn respond_to(&self, method: Method, url: Url, response: Response) {
    self.routes.lock().unwrap().insert((method, url), response);
  }

  /// Hold responses for `url` back by `delay`.
  pub fn delay(&self, url: Url, delay: Duration) {
    self.delays.lock().unwrap().insert(url, delay);
  }

  /// While offline every fetch fails as if the connection was refused.
  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  /// Every request seen, including ones that failed.
  pub fn requests(&self) -> Vec<Request> {
    self.requests.lock().unwrap().clone()
  }

  /// Requests that got a response, in the order the responses arrived.
  pub fn delivered(&self) -> Vec<Request> {
    self.delivered.lock().unwrap().clone()
  }

  pub fn calls(&self) -> usize {
    self.requests.lock().unwrap().len()
  }
}

#[async_trait]
impl Network for ScriptedNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.requests.lock().unwrap().push(request.clone());
    if self.offline.load(Ordering::SeqCst) {
      return Err(eyre!("Failed to fetch {}: connection refused", request.url));
    }

    let mut url = request.url.clone();
    url.set_fragment(None);
    let delay = self.delays.lock().unwrap().get(&url).copied();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }

    let response = self
      .routes
      .lock()
      .unwrap()
      .get(&(request.method.clone(), url))
      .cloned()
      .unwrap_or_else(|| Response::new(StatusCode::NOT_FOUND));
    self.delivered.lock().unwrap().push(request.clone());
    Ok(response)
  }
}

/// Host that records what the worker asked of it.
#[derive(Default)]
pub struct RecordingHost {
  claims: AtomicUsize,
  shown: Mutex<Vec<Notification>>,
  opened: Mutex<Vec<Url>>,
  closed: AtomicUsize,
}

impl RecordingHost {
  pub fn claims(&self) -> usize {
    self.claims.load(Ordering::SeqCst)
  }

  pub fn shown(&self) -> Vec<Notification> {
    self.shown.lock().unwrap().clone()
  }

  pub fn opened(&self) -> Vec<Url> {
    self.opened.lock().unwrap().clone()
  }

  pub fn closed(&self) -> usize {
    self.closed.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Host for RecordingHost {
  async fn claim_clients(&self) -> Result<usize> {
    self.claims.fetch_add(1, Ordering::SeqCst);
    Ok(1)
  }

  async fn show_notification(&self, notification: &Notification) -> Result<()> {
    self.shown.lock().unwrap().push(notification.clone());
    Ok(())
  }

  async fn close_notification(&self, _notification: &Notification) -> Result<()> {
    self.closed.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }

  async fn focus_or_open(&self, url: &Url) -> Result<()> {
    self.opened.lock().unwrap().push(url.clone());
    Ok(())
  }
}

/// Worker with default config over in-memory stores and scripted collaborators.
pub fn test_worker() -> (
  OfflineWorker<SqliteStorage>,
  Arc<ScriptedNetwork>,
  Arc<RecordingHost>,
) {
  test_worker_with(
    Config::default(),
    SqliteStorage::open_in_memory().unwrap(),
    Arc::new(ScriptedNetwork::new()),
  )
}

pub fn test_worker_with(
  config: Config,
  storage: SqliteStorage,
  network: Arc<ScriptedNetwork>,
) -> (
  OfflineWorker<SqliteStorage>,
  Arc<ScriptedNetwork>,
  Arc<RecordingHost>,
) {
  let host = Arc::new(RecordingHost::default());
  let queue = ReplayQueue::new(Database::open_in_memory().unwrap()).unwrap();
  let worker = OfflineWorker::new(
    config,
    storage,
    queue,
    Arc::clone(&network) as Arc<dyn Network>,
    Arc::clone(&host) as Arc<dyn Host>,
  );
  (worker, network, host)
}
