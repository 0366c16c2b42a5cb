//! Push notifications and notification clicks.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;
use url::Url;

use crate::cache::CacheStorage;

use super::OfflineWorker;

/// Notification key counter
static NEXT_NOTIFICATION_KEY: AtomicU64 = AtomicU64::new(1);

pub const EXPLORE_ACTION: &str = "explore";
pub const CLOSE_ACTION: &str = "close";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub actions: Vec<NotificationAction>,
  pub data: NotificationData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
  pub date_of_arrival: DateTime<Utc>,
  pub primary_key: u64,
}

/// What a notification click led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
  /// A client window was focused or opened at this URL
  Opened(Url),
  Dismissed,
}

impl<S: CacheStorage + 'static> OfflineWorker<S> {
  /// Build the notification for a push payload. Blank payloads get the fallback body.
  pub fn notification_for(&self, payload: Option<&str>) -> Notification {
    let settings = &self.config.notifications;
    let body = payload
      .map(str::trim)
      .filter(|text| !text.is_empty())
      .unwrap_or(settings.fallback_body.as_str());

    Notification {
      title: settings.title.clone(),
      body: body.to_string(),
      icon: settings.icon.clone(),
      badge: settings.badge.clone(),
      vibrate: settings.vibrate.clone(),
      actions: vec![
        NotificationAction {
          action: EXPLORE_ACTION.to_string(),
          title: settings.explore_title.clone(),
        },
        NotificationAction {
          action: CLOSE_ACTION.to_string(),
          title: settings.close_title.clone(),
        },
      ],
      data: NotificationData {
        date_of_arrival: Utc::now(),
        primary_key: NEXT_NOTIFICATION_KEY.fetch_add(1, Ordering::SeqCst),
      },
    }
  }

  pub async fn push(&self, payload: Option<&str>) -> Result<Notification> {
    let notification = self.notification_for(payload);
    self.host.show_notification(&notification).await?;
    info!(key = notification.data.primary_key, "push notification shown");
    Ok(notification)
  }

  /// Close the notification; the `explore` action also brings up the app route.
  pub async fn notification_click(
    &self,
    notification: &Notification,
    action: Option<&str>,
  ) -> Result<ClickOutcome> {
    self.host.close_notification(notification).await?;

    match action {
      Some(EXPLORE_ACTION) => {
        let url = self.config.resolve(&self.config.notifications.open_route)?;
        self.host.focus_or_open(&url).await?;
        Ok(ClickOutcome::Opened(url))
      }
      _ => Ok(ClickOutcome::Dismissed),
    }
  }
}
