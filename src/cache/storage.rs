//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::{Method, StatusCode};
use rusqlite::{params, OptionalExtension};

use crate::db::Database;
use crate::http::{RequestIdentity, Response};

use super::traits::CachedResponse;

/// Trait for cache storage backends.
///
/// A backend holds any number of named stores, each a key→response mapping.
/// Only GET identities are ever stored. Writing the same key twice keeps the
/// last write.
pub trait CacheStorage: Send + Sync {
  /// Create the store if it does not exist yet.
  fn open(&self, store: &str) -> Result<()>;

  /// Whether a store with this name exists.
  fn has(&self, store: &str) -> Result<bool>;

  /// Names of all existing stores.
  fn keys(&self) -> Result<Vec<String>>;

  /// Delete a store and all of its entries. Returns whether it existed.
  fn delete(&self, store: &str) -> Result<bool>;

  /// Look up a stored response.
  fn match_request(&self, store: &str, identity: &RequestIdentity)
    -> Result<Option<CachedResponse>>;

  /// Store a response, creating the store if needed.
  fn put(&self, store: &str, identity: &RequestIdentity, response: &Response) -> Result<()>;

  /// Store several responses atomically: either all are written or none.
  fn put_all(&self, store: &str, entries: &[(RequestIdentity, Response)]) -> Result<()>;

  /// Number of entries in a store.
  fn len(&self, store: &str) -> Result<usize>;
}

/// SQLite-based cache storage implementation.
#[derive(Clone)]
pub struct SqliteStorage {
  db: Database,
}

impl SqliteStorage {
  pub fn new(db: Database) -> Self {
    Self { db }
  }

  /// Storage over a private in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    Ok(Self::new(Database::open_in_memory()?))
  }
}

fn ensure_get(identity: &RequestIdentity) -> Result<()> {
  if identity.method() != Method::GET {
    return Err(eyre!("Refusing to cache non-GET request: {}", identity));
  }
  Ok(())
}

fn insert_entry(
  conn: &rusqlite::Connection,
  store: &str,
  identity: &RequestIdentity,
  response: &Response,
) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR IGNORE INTO cache_stores (name) VALUES (?)",
      params![store],
    )
    .map_err(|e| eyre!("Failed to open cache store {}: {}", store, e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries
         (store, request_hash, method, url, status, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        store,
        identity.cache_hash(),
        identity.method().as_str(),
        identity.url().as_str(),
        response.status.as_u16(),
        headers,
        response.body,
      ],
    )
    .map_err(|e| eyre!("Failed to store {} in {}: {}", identity, store, e))?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn open(&self, store: &str) -> Result<()> {
    let conn = self.db.lock()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO cache_stores (name) VALUES (?)",
        params![store],
      )
      .map_err(|e| eyre!("Failed to open cache store {}: {}", store, e))?;
    Ok(())
  }

  fn has(&self, store: &str) -> Result<bool> {
    let conn = self.db.lock()?;
    let found: Option<i64> = conn
      .query_row(
        "SELECT 1 FROM cache_stores WHERE name = ?",
        params![store],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache store {}: {}", store, e))?;
    Ok(found.is_some())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self.db.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_stores ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache stores: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache store name: {}", e))?;

    Ok(names)
  }

  fn delete(&self, store: &str) -> Result<bool> {
    let mut conn = self.db.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM cache_entries WHERE store = ?", params![store])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", store, e))?;
    let removed = tx
      .execute("DELETE FROM cache_stores WHERE name = ?", params![store])
      .map_err(|e| eyre!("Failed to delete cache store {}: {}", store, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn match_request(
    &self,
    store: &str,
    identity: &RequestIdentity,
  ) -> Result<Option<CachedResponse>> {
    let conn = self.db.lock()?;

    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, cached_at FROM cache_entries
         WHERE store = ? AND request_hash = ?",
        params![store, identity.cache_hash()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {} in {}: {}", identity, store, e))?;

    let Some((status, headers, body, cached_at)) = row else {
      return Ok(None);
    };

    let status = StatusCode::from_u16(status)
      .map_err(|e| eyre!("Invalid status {} stored for {}: {}", status, identity, e))?;
    let headers: Vec<(String, String)> = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to deserialize headers for {}: {}", identity, e))?;

    Ok(Some(CachedResponse {
      response: Response {
        status,
        headers,
        body,
      },
      cached_at: parse_datetime(&cached_at)?,
    }))
  }

  fn put(&self, store: &str, identity: &RequestIdentity, response: &Response) -> Result<()> {
    ensure_get(identity)?;
    let conn = self.db.lock()?;
    insert_entry(&conn, store, identity, response)
  }

  fn put_all(&self, store: &str, entries: &[(RequestIdentity, Response)]) -> Result<()> {
    for (identity, _) in entries {
      ensure_get(identity)?;
    }

    let mut conn = self.db.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO cache_stores (name) VALUES (?)",
      params![store],
    )
    .map_err(|e| eyre!("Failed to open cache store {}: {}", store, e))?;

    for (identity, response) in entries {
      insert_entry(&tx, store, identity, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn len(&self, store: &str) -> Result<usize> {
    let conn = self.db.lock()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE store = ?",
        params![store],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries of {}: {}", store, e))?;
    Ok(count.max(0) as usize)
  }
}

/// Parse a datetime string from SQLite format.
pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
