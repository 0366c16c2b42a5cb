//! Install/activate lifecycle: provisioning and purging cache stores across deployments.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use tracing::{info, warn};

use crate::cache::CacheStorage;
use crate::http::{Request, RequestIdentity, Response};

use super::OfflineWorker;

/// Worker states
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WorkerState {
  /// Created, install not attempted yet
  #[default]
  Parsed,
  /// Install event running
  Installing,
  /// Installed, waiting to activate
  Installed,
  /// Activate event running
  Activating,
  /// Active and controlling clients
  Activated,
  /// Install failed; the previous version keeps serving
  Redundant,
}

/// Lifecycle state of one worker version.
#[derive(Debug, Default)]
pub struct Lifecycle {
  state: WorkerState,
  skip_waiting: bool,
}

impl Lifecycle {
  pub fn state(&self) -> WorkerState {
    self.state
  }

  /// Stop waiting for existing clients to close before activating.
  pub fn skip_waiting(&mut self) {
    self.skip_waiting = true;
  }

  pub fn is_skipping_waiting(&self) -> bool {
    self.skip_waiting
  }

  /// Whether the host should activate this version right away.
  pub fn ready_to_activate(&self) -> bool {
    self.state == WorkerState::Installed && self.skip_waiting
  }

  fn transition(&mut self, from: WorkerState, to: WorkerState) -> Result<()> {
    if self.state != from {
      return Err(eyre!(
        "Invalid worker state transition {:?} -> {:?} (expected {:?})",
        self.state,
        to,
        from
      ));
    }
    self.state = to;
    Ok(())
  }
}

impl<S: CacheStorage + 'static> OfflineWorker<S> {
  /// Populate the static store with the application shell.
  ///
  /// Every manifest entry is fetched before anything is written; a single
  /// failure leaves the stores untouched and marks this version redundant.
  pub async fn install(&self) -> Result<()> {
    self
      .lifecycle()?
      .transition(WorkerState::Parsed, WorkerState::Installing)?;

    let store = self.config.static_cache_name();
    match self.precache(&store).await {
      Ok(count) => {
        let mut lifecycle = self.lifecycle()?;
        lifecycle.transition(WorkerState::Installing, WorkerState::Installed)?;
        lifecycle.skip_waiting();
        info!(store = %store, resources = count, "install complete");
        Ok(())
      }
      Err(err) => {
        self.lifecycle()?.state = WorkerState::Redundant;
        warn!(error = %err, "install failed, previous version keeps serving");
        Err(err)
      }
    }
  }

  async fn precache(&self, store: &str) -> Result<usize> {
    let requests = self
      .config
      .static_manifest
      .iter()
      .map(|path| -> Result<Request> { Ok(Request::get(self.config.resolve(path)?)) })
      .collect::<Result<Vec<_>>>()?;

    let entries = try_join_all(requests.iter().map(|request| self.precache_one(request))).await?;

    self.cache.storage().put_all(store, &entries)?;
    Ok(entries.len())
  }

  async fn precache_one(&self, request: &Request) -> Result<(RequestIdentity, Response)> {
    let response = self.network.fetch(request).await?;
    if !response.is_ok() {
      return Err(eyre!(
        "Failed to precache {}: HTTP {}",
        request.url,
        response.status
      ));
    }
    Ok((request.identity(), response))
  }

  /// Delete stale cache stores and take control of open clients.
  ///
  /// Returns the names of the deleted stores.
  pub async fn activate(&self) -> Result<Vec<String>> {
    self
      .lifecycle()?
      .transition(WorkerState::Installed, WorkerState::Activating)?;

    let current = [self.config.static_cache_name(), self.config.api_cache_name()];
    let mut deleted = Vec::new();
    for name in self.cache.storage().keys()? {
      if current.contains(&name) {
        continue;
      }
      self.cache.storage().delete(&name)?;
      info!(store = %name, "deleted stale cache store");
      deleted.push(name);
    }

    let claimed = self.host.claim_clients().await?;

    self
      .lifecycle()?
      .transition(WorkerState::Activating, WorkerState::Activated)?;
    info!(claimed, version = %self.config.version, "worker activated");

    Ok(deleted)
  }

  /// Skip the waiting phase. Returns whether activation can start now.
  pub fn skip_waiting(&self) -> Result<bool> {
    let mut lifecycle = self.lifecycle()?;
    lifecycle.skip_waiting();
    Ok(lifecycle.ready_to_activate())
  }

  pub fn ready_to_activate(&self) -> Result<bool> {
    Ok(self.lifecycle()?.ready_to_activate())
  }
}
