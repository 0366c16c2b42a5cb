//! The offline cache proxy.
//!
//! [`OfflineWorker`] exposes one method per worker event: install, activate,
//! fetch, message, sync, push and notification click. Configuration is fixed
//! at construction, so independently configured workers can run side by side.

mod envelope;
mod fetch;
mod host;
mod lifecycle;
mod messages;
mod push;
mod router;
mod sync;

pub use envelope::{
  offline_envelope, offline_error, offline_page, CACHED_DATA_UNREADABLE, NO_CACHED_DATA,
  REQUEST_FAILED,
};
pub use fetch::Responded;
pub use host::{Host, LogHost};
pub use lifecycle::{Lifecycle, WorkerState};
pub use messages::{ClientMessage, MessageOutcome};
pub use push::{
  ClickOutcome, Notification, NotificationAction, NotificationData, CLOSE_ACTION, EXPLORE_ACTION,
};
pub use router::{RequestClass, RequestRouter};
pub use sync::{QueueState, QueuedRequest, ReplayQueue, SyncReport};

use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::cache::{CacheLayer, CacheStorage, SqliteStorage};
use crate::config::Config;
use crate::db::Database;
use crate::http::Network;

pub struct OfflineWorker<S: CacheStorage> {
  config: Arc<Config>,
  router: RequestRouter,
  cache: CacheLayer<S>,
  queue: ReplayQueue,
  network: Arc<dyn Network>,
  host: Arc<dyn Host>,
  lifecycle: Arc<Mutex<Lifecycle>>,
}

impl<S: CacheStorage + 'static> OfflineWorker<S> {
  pub fn new(
    config: Config,
    storage: S,
    queue: ReplayQueue,
    network: Arc<dyn Network>,
    host: Arc<dyn Host>,
  ) -> Self {
    Self {
      router: RequestRouter::new(&config.api),
      config: Arc::new(config),
      cache: CacheLayer::new(storage),
      queue,
      network,
      host,
      lifecycle: Arc::new(Mutex::new(Lifecycle::default())),
    }
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn router(&self) -> &RequestRouter {
    &self.router
  }

  pub fn storage(&self) -> &S {
    self.cache.storage()
  }

  pub fn queue(&self) -> &ReplayQueue {
    &self.queue
  }

  pub fn state(&self) -> Result<WorkerState> {
    Ok(self.lifecycle()?.state())
  }

  fn lifecycle(&self) -> Result<MutexGuard<'_, Lifecycle>> {
    self
      .lifecycle
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl OfflineWorker<SqliteStorage> {
  /// Worker whose cache stores and replay queue share one database.
  pub fn with_database(
    config: Config,
    db: Database,
    network: Arc<dyn Network>,
    host: Arc<dyn Host>,
  ) -> Result<Self> {
    let queue = ReplayQueue::new(db.clone())?;
    Ok(Self::new(config, SqliteStorage::new(db), queue, network, host))
  }
}

impl<S: CacheStorage> Clone for OfflineWorker<S> {
  fn clone(&self) -> Self {
    Self {
      config: Arc::clone(&self.config),
      router: self.router.clone(),
      cache: self.cache.clone(),
      queue: self.queue.clone(),
      network: Arc::clone(&self.network),
      host: Arc::clone(&self.host),
      lifecycle: Arc::clone(&self.lifecycle),
    }
  }
}
