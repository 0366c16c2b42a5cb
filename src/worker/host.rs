use async_trait::async_trait;
use color_eyre::Result;
use tracing::info;
use url::Url;

use super::push::Notification;

/// The runtime hosting the worker: its client windows and notification surface.
#[async_trait]
pub trait Host: Send + Sync {
  /// Take control of all open client contexts. Returns how many were claimed.
  async fn claim_clients(&self) -> Result<usize>;

  async fn show_notification(&self, notification: &Notification) -> Result<()>;

  async fn close_notification(&self, notification: &Notification) -> Result<()>;

  /// Focus a client window already showing `url`, or open a new one.
  async fn focus_or_open(&self, url: &Url) -> Result<()>;
}

/// Host without client windows; side effects are only logged.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogHost;

#[async_trait]
impl Host for LogHost {
  async fn claim_clients(&self) -> Result<usize> {
    info!("no client contexts to claim");
    Ok(0)
  }

  async fn show_notification(&self, notification: &Notification) -> Result<()> {
    info!(
      title = %notification.title,
      body = %notification.body,
      key = notification.data.primary_key,
      "show notification"
    );
    Ok(())
  }

  async fn close_notification(&self, notification: &Notification) -> Result<()> {
    info!(key = notification.data.primary_key, "close notification");
    Ok(())
  }

  async fn focus_or_open(&self, url: &Url) -> Result<()> {
    info!(%url, "open client window");
    Ok(())
  }
}
