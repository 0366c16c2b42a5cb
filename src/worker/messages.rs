//! Messages posted to the worker by client pages.

use color_eyre::{eyre::eyre, Result};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::cache::CacheStorage;
use crate::event::WaitUntil;
use crate::http::{RequestIdentity, Response};

use super::OfflineWorker;

/// Inbound message protocol, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
  /// Activate the waiting version without waiting for clients to close
  SkipWaiting,
  /// Seed the API store with admin dashboard data
  CacheAdminData { data: Value },
  #[serde(other)]
  Unknown,
}

impl ClientMessage {
  pub fn parse(raw: &str) -> Result<Self> {
    serde_json::from_str(raw).map_err(|e| eyre!("Invalid client message: {}", e))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
  /// Waiting skipped; `ready` when the host can activate now
  SkipWaiting { ready: bool },
  AdminDataCached,
  Ignored,
}

impl<S: CacheStorage + 'static> OfflineWorker<S> {
  pub async fn message(&self, message: ClientMessage) -> Result<(MessageOutcome, WaitUntil)> {
    let mut wait = WaitUntil::new();

    let outcome = match message {
      ClientMessage::SkipWaiting => {
        let ready = self.skip_waiting()?;
        info!(ready, "skip waiting requested");
        MessageOutcome::SkipWaiting { ready }
      }
      ClientMessage::CacheAdminData { data } => {
        let identity = self.admin_snapshot_identity()?;
        debug!(key = %identity, "caching admin snapshot");
        self.cache.put_in_background(
          &self.config.api_cache_name(),
          identity,
          Response::json(StatusCode::OK, &data),
          &mut wait,
        );
        MessageOutcome::AdminDataCached
      }
      ClientMessage::Unknown => {
        debug!("ignoring unknown client message");
        MessageOutcome::Ignored
      }
    };

    Ok((outcome, wait))
  }

  /// Synthetic key the admin snapshot lives under in the API store.
  pub fn admin_snapshot_identity(&self) -> Result<RequestIdentity> {
    Ok(RequestIdentity::get(
      self.config.resolve(&self.config.api.admin_snapshot_path)?,
    ))
  }
}
