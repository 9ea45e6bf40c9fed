//! Offline record collections owned by collaborators (reports, audio).
//!
//! Values are opaque JSON; nothing in the cache or queue paths reads them.

use chrono::{DateTime, Duration, TimeZone, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};

use super::Database;

/// Default age after which `cleanup` drops a record.
pub const DEFAULT_MAX_AGE_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
  Reports,
  Audio,
}

impl Collection {
  pub const ALL: [Collection; 2] = [Collection::Reports, Collection::Audio];

  fn name(self) -> &'static str {
    match self {
      Self::Reports => "reports",
      Self::Audio => "audio",
    }
  }
}

/// A stored record with its capture time.
#[derive(Debug, Clone)]
pub struct Record<T> {
  pub id: String,
  pub value: T,
  pub ts: DateTime<Utc>,
}

#[derive(Clone)]
pub struct RecordStore {
  db: Database,
  collection: Collection,
}

impl RecordStore {
  pub fn new(db: Database, collection: Collection) -> Self {
    Self { db, collection }
  }

  /// Insert or replace the record with this id, stamped with the current time.
  pub fn put<T: Serialize>(&self, id: &str, value: &T) -> Result<()> {
    self.put_at(id, value, Utc::now())
  }

  pub fn put_at<T: Serialize>(&self, id: &str, value: &T, ts: DateTime<Utc>) -> Result<()> {
    let data = serde_json::to_string(value).map_err(|e| eyre!("Failed to serialize record: {}", e))?;
    let conn = self.db.lock()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO records (collection, id, data, ts) VALUES (?, ?, ?, ?)",
        params![self.collection.name(), id, data, ts.timestamp_millis()],
      )
      .map_err(|e| eyre!("Failed to store record {}: {}", id, e))?;
    Ok(())
  }

  pub fn get<T: DeserializeOwned>(&self, id: &str) -> Result<Option<Record<T>>> {
    let conn = self.db.lock()?;
    let row: Option<(String, i64)> = conn
      .query_row(
        "SELECT data, ts FROM records WHERE collection = ? AND id = ?",
        params![self.collection.name(), id],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read record {}: {}", id, e))?;

    row
      .map(|(data, ts)| decode(id.to_string(), &data, ts))
      .transpose()
  }

  pub fn list<T: DeserializeOwned>(&self) -> Result<Vec<Record<T>>> {
    let conn = self.db.lock()?;
    let mut stmt = conn
      .prepare("SELECT id, data, ts FROM records WHERE collection = ? ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(String, String, i64)> = stmt
      .query_map(params![self.collection.name()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
      })
      .map_err(|e| eyre!("Failed to query records: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read records: {}", e))?;

    rows
      .into_iter()
      .map(|(id, data, ts)| decode(id, &data, ts))
      .collect()
  }

  pub fn delete(&self, id: &str) -> Result<()> {
    let conn = self.db.lock()?;
    conn
      .execute(
        "DELETE FROM records WHERE collection = ? AND id = ?",
        params![self.collection.name(), id],
      )
      .map_err(|e| eyre!("Failed to delete record {}: {}", id, e))?;
    Ok(())
  }

  /// Delete records captured before `now - max_age`. Returns how many went.
  pub fn cleanup(&self, max_age: Duration) -> Result<usize> {
    let cutoff = (Utc::now() - max_age).timestamp_millis();
    let conn = self.db.lock()?;
    let removed = conn
      .execute(
        "DELETE FROM records WHERE collection = ? AND ts < ?",
        params![self.collection.name(), cutoff],
      )
      .map_err(|e| eyre!("Failed to clean up {}: {}", self.collection.name(), e))?;
    Ok(removed)
  }
}

fn decode<T: DeserializeOwned>(id: String, data: &str, ts: i64) -> Result<Record<T>> {
  let value =
    serde_json::from_str(data).map_err(|e| eyre!("Failed to deserialize record {}: {}", id, e))?;
  let ts = Utc
    .timestamp_millis_opt(ts)
    .single()
    .ok_or_else(|| eyre!("Invalid timestamp on record {}", id))?;
  Ok(Record { id, value, ts })
}
