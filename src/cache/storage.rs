//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};

use super::traits::CacheEntry;
use crate::db::Database;
use crate::http::{Headers, HttpResponse};

/// Trait for cache storage backends.
///
/// Entries are namespaced by cache version. Writes replace whole entries.
pub trait CacheStorage: Send + Sync + 'static {
  /// Get the entry for `key` in `namespace`.
  fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>>;

  /// Store an entry, replacing any previous one for the key.
  fn put(&self, namespace: &str, key: &str, entry: &CacheEntry) -> Result<()>;

  /// All namespaces that are live or hold entries, sorted by name.
  fn namespaces(&self) -> Result<Vec<String>>;

  /// Mark `live` as the only live namespace and delete every other one.
  /// Returns the number of namespaces removed.
  fn retain_only(&self, live: &str) -> Result<usize>;
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
}

impl CacheStorage for SqliteStorage {
  fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>> {
    let conn = self.db.lock()?;

    let row: Option<(String, u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT url, status, headers, body, cached_at FROM cache_entries
         WHERE namespace = ? AND request_key = ?",
        params![namespace, key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry: {}", e))?;

    match row {
      Some((url, status, headers, body, cached_at)) => {
        let headers: Headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize cached headers: {}", e))?;
        Ok(Some(CacheEntry {
          url,
          response: HttpResponse {
            status,
            headers,
            body,
          },
          cached_at: parse_datetime(&cached_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, namespace: &str, key: &str, entry: &CacheEntry) -> Result<()> {
    let headers = serde_json::to_string(&entry.response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;
    let cached_at = entry.cached_at.to_rfc3339_opts(SecondsFormat::Millis, true);

    let mut conn = self.db.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO cache_namespaces (name, live, created_at) VALUES (?, 0, ?)",
      params![namespace, cached_at],
    )
    .map_err(|e| eyre!("Failed to register namespace: {}", e))?;

    tx.execute(
      "INSERT OR REPLACE INTO cache_entries (namespace, request_key, url, status, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?)",
      params![
        namespace,
        key,
        entry.url,
        entry.response.status,
        headers,
        entry.response.body,
        cached_at
      ],
    )
    .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn namespaces(&self) -> Result<Vec<String>> {
    let conn = self.db.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT name FROM cache_namespaces
         UNION SELECT DISTINCT namespace FROM cache_entries
         ORDER BY 1",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to query namespaces: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read namespaces: {}", e))?;

    Ok(names)
  }

  fn retain_only(&self, live: &str) -> Result<usize> {
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

    let mut conn = self.db.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let removed: i64 = tx
      .query_row(
        "SELECT COUNT(*) FROM (
           SELECT name FROM cache_namespaces WHERE name != ?1
           UNION SELECT DISTINCT namespace FROM cache_entries WHERE namespace != ?1
         )",
        params![live],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count namespaces: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE namespace != ?",
      params![live],
    )
    .map_err(|e| eyre!("Failed to delete old cache entries: {}", e))?;
    tx.execute("DELETE FROM cache_namespaces WHERE name != ?", params![live])
      .map_err(|e| eyre!("Failed to delete old namespaces: {}", e))?;
    tx.execute(
      "INSERT INTO cache_namespaces (name, live, created_at) VALUES (?, 1, ?)
       ON CONFLICT(name) DO UPDATE SET live = 1",
      params![live, now],
    )
    .map_err(|e| eyre!("Failed to mark namespace live: {}", e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed as usize)
  }
}

/// Parse an RFC 3339 timestamp as stored by `put`.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
