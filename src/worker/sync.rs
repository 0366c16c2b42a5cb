//! Background sync: durable queue of failed mutating requests and its replay.
//!
//! Each queued request moves `pending -> in_flight` when a replay picks it up,
//! then is either removed once delivered or put back to `pending` with its
//! attempt count and last error for the next sync event.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use rusqlite::params;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{parse_datetime, CacheStorage};
use crate::db::Database;
use crate::http::Request;

use super::OfflineWorker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
  Pending,
  InFlight,
}

impl QueueState {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::InFlight => "in_flight",
    }
  }

  fn parse(s: &str) -> Result<Self> {
    match s {
      "pending" => Ok(Self::Pending),
      "in_flight" => Ok(Self::InFlight),
      other => Err(eyre!("Unknown queue state '{}'", other)),
    }
  }
}

/// A failed mutating request waiting for replay.
#[derive(Debug, Clone)]
pub struct QueuedRequest {
  pub id: i64,
  pub tag: String,
  pub method: Method,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
  pub queued_at: DateTime<Utc>,
  pub attempts: u32,
  pub state: QueueState,
  pub last_error: Option<String>,
}

impl QueuedRequest {
  pub fn to_request(&self) -> Request {
    Request {
      headers: self.headers.clone(),
      body: self.body.clone(),
      ..Request::new(self.method.clone(), self.url.clone())
    }
  }
}

/// Counts from one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
  /// Delivered and removed
  pub replayed: usize,
  /// Out of attempts and removed
  pub rejected: usize,
  /// Still queued for the next sync event
  pub remaining: usize,
}

/// SQLite-backed replay queue, ordered by arrival.
#[derive(Clone)]
pub struct ReplayQueue {
  db: Database,
  pass: Arc<Mutex<()>>,
}

type RawRow = (
  i64,
  String,
  String,
  String,
  String,
  Option<Vec<u8>>,
  String,
  u32,
  String,
  Option<String>,
);

const SELECT_COLUMNS: &str = "SELECT id, tag, method, url, headers, body, queued_at, attempts, \
   state, last_error FROM sync_queue";

impl ReplayQueue {
  /// Open the queue. Entries left in flight by an interrupted replay go back to pending.
  pub fn new(db: Database) -> Result<Self> {
    let queue = Self {
      db,
      pass: Arc::new(Mutex::new(())),
    };
    let recovered = queue.recover_in_flight()?;
    if recovered > 0 {
      info!(recovered, "requeued interrupted replays");
    }
    Ok(queue)
  }

  fn recover_in_flight(&self) -> Result<usize> {
    let conn = self.db.lock()?;
    conn
      .execute(
        "UPDATE sync_queue SET state = 'pending' WHERE state = 'in_flight'",
        [],
      )
      .map_err(|e| eyre!("Failed to recover in-flight requests: {}", e))
  }

  /// Record interest in a sync event for `tag`.
  pub fn register(&self, tag: &str) -> Result<()> {
    let conn = self.db.lock()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO sync_registrations (tag) VALUES (?)",
        params![tag],
      )
      .map_err(|e| eyre!("Failed to register sync tag {}: {}", tag, e))?;
    Ok(())
  }

  pub fn unregister(&self, tag: &str) -> Result<()> {
    let conn = self.db.lock()?;
    conn
      .execute("DELETE FROM sync_registrations WHERE tag = ?", params![tag])
      .map_err(|e| eyre!("Failed to unregister sync tag {}: {}", tag, e))?;
    Ok(())
  }

  pub fn registrations(&self) -> Result<Vec<String>> {
    let conn = self.db.lock()?;
    let mut stmt = conn
      .prepare("SELECT tag FROM sync_registrations ORDER BY tag")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let tags = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list sync registrations: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read sync registration: {}", e))?;
    Ok(tags)
  }

  /// Append a request. Returns its queue id.
  pub fn enqueue(&self, tag: &str, request: &Request) -> Result<i64> {
    let headers = serde_json::to_string(&request.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    let conn = self.db.lock()?;
    conn
      .execute(
        "INSERT INTO sync_queue (tag, method, url, headers, body, queued_at)
         VALUES (?, ?, ?, ?, ?, datetime('now'))",
        params![
          tag,
          request.method.as_str(),
          request.url.as_str(),
          headers,
          request.body,
        ],
      )
      .map_err(|e| eyre!("Failed to queue {} {}: {}", request.method, request.url, e))?;

    Ok(conn.last_insert_rowid())
  }

  /// Pending entries for `tag`, oldest first.
  pub fn pending(&self, tag: &str) -> Result<Vec<QueuedRequest>> {
    self.select(
      &format!("{} WHERE tag = ? AND state = 'pending' ORDER BY id", SELECT_COLUMNS),
      params![tag],
    )
  }

  /// Every entry, oldest first.
  pub fn all(&self) -> Result<Vec<QueuedRequest>> {
    self.select(&format!("{} ORDER BY id", SELECT_COLUMNS), params![])
  }

  fn select(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<QueuedRequest>> {
    let conn = self.db.lock()?;
    let mut stmt = conn
      .prepare(sql)
      .map_err(|e| eyre!("Failed to prepare queue query: {}", e))?;

    let rows = stmt
      .query_map(params, |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
          row.get(6)?,
          row.get(7)?,
          row.get(8)?,
          row.get(9)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query sync queue: {}", e))?
      .collect::<rusqlite::Result<Vec<RawRow>>>()
      .map_err(|e| eyre!("Failed to read sync queue row: {}", e))?;

    rows.into_iter().map(from_raw).collect()
  }

  /// Move an entry to in-flight. Returns false if another replay already has it.
  pub fn claim(&self, id: i64) -> Result<bool> {
    let conn = self.db.lock()?;
    let changed = conn
      .execute(
        "UPDATE sync_queue SET state = 'in_flight', attempts = attempts + 1
         WHERE id = ? AND state = 'pending'",
        params![id],
      )
      .map_err(|e| eyre!("Failed to claim queued request {}: {}", id, e))?;
    Ok(changed > 0)
  }

  /// Remove a finished entry.
  pub fn complete(&self, id: i64) -> Result<()> {
    let conn = self.db.lock()?;
    conn
      .execute("DELETE FROM sync_queue WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove queued request {}: {}", id, e))?;
    Ok(())
  }

  /// Put an entry back for the next sync event.
  pub fn release(&self, id: i64, error: &str) -> Result<()> {
    let conn = self.db.lock()?;
    conn
      .execute(
        "UPDATE sync_queue SET state = 'pending', last_error = ? WHERE id = ?",
        params![error, id],
      )
      .map_err(|e| eyre!("Failed to release queued request {}: {}", id, e))?;
    Ok(())
  }

  /// Number of entries for `tag`, in any state.
  pub fn len(&self, tag: &str) -> Result<usize> {
    let conn = self.db.lock()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM sync_queue WHERE tag = ?",
        params![tag],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count sync queue: {}", e))?;
    Ok(count.max(0) as usize)
  }
}

fn from_raw(raw: RawRow) -> Result<QueuedRequest> {
  let (id, tag, method, url, headers, body, queued_at, attempts, state, last_error) = raw;

  Ok(QueuedRequest {
    id,
    tag,
    method: Method::from_bytes(method.as_bytes())
      .map_err(|e| eyre!("Invalid method '{}' in queued request {}: {}", method, id, e))?,
    url: Url::parse(&url)
      .map_err(|e| eyre!("Invalid URL '{}' in queued request {}: {}", url, id, e))?,
    headers: serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to deserialize headers of queued request {}: {}", id, e))?,
    body,
    queued_at: parse_datetime(&queued_at)?,
    attempts,
    state: QueueState::parse(&state)?,
    last_error,
  })
}

impl<S: CacheStorage + 'static> OfflineWorker<S> {
  /// Handle a sync event: replay queued requests for `tag` in order.
  ///
  /// Only 2xx removes an entry. Any other outcome keeps it queued, unless
  /// `sync.max_attempts` is set and the entry has used them all up.
  pub async fn sync(&self, tag: &str) -> Result<SyncReport> {
    let mut report = SyncReport::default();
    if tag != self.config.sync.tag {
      debug!(tag, "ignoring sync event for unknown tag");
      return Ok(report);
    }

    // One pass at a time, so concurrent sync events cannot reorder delivery.
    let _pass = self.queue.pass.lock().await;

    for entry in self.queue.pending(tag)? {
      if !self.queue.claim(entry.id)? {
        continue;
      }

      let error = match self.network.fetch(&entry.to_request()).await {
        Ok(response) if response.is_ok() => {
          self.queue.complete(entry.id)?;
          report.replayed += 1;
          continue;
        }
        Ok(response) => format!("HTTP {}", response.status),
        Err(err) => err.to_string(),
      };

      let attempts = entry.attempts + 1;
      match self.config.sync.max_attempts {
        Some(max) if attempts >= max => {
          warn!(
            id = entry.id,
            method = %entry.method,
            url = %entry.url,
            attempts,
            error = %error,
            "giving up on queued request"
          );
          self.queue.complete(entry.id)?;
          report.rejected += 1;
        }
        _ => {
          self.queue.release(entry.id, &error)?;
          report.remaining += 1;
        }
      }
    }

    if self.queue.len(tag)? == 0 {
      self.queue.unregister(tag)?;
    }

    info!(
      tag,
      replayed = report.replayed,
      rejected = report.rejected,
      remaining = report.remaining,
      "background sync finished"
    );
    Ok(report)
  }

  /// Run a sync pass for every registered tag.
  pub async fn sync_registered(&self) -> Result<Vec<(String, SyncReport)>> {
    let mut reports = Vec::new();
    for tag in self.queue.registrations()? {
      let report = self.sync(&tag).await?;
      reports.push((tag, report));
    }
    Ok(reports)
  }
}
