//! Durable FIFO of pending mutating requests.

use chrono::{DateTime, TimeZone, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::params;
use serde::Serialize;
use tracing::{debug, warn};

use crate::db::Database;
use crate::http::{Headers, HttpRequest};

/// A mutating request waiting for replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueOperation {
  /// Store-assigned, strictly increasing; the only ordering key
  pub id: i64,
  pub url: String,
  pub method: String,
  pub headers: Headers,
  pub body: Option<String>,
  pub enqueued_at: DateTime<Utc>,
}

/// Operation as handed in by a caller, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOperation {
  pub url: String,
  pub method: String,
  pub headers: Headers,
  pub body: Option<String>,
}

impl From<&HttpRequest> for NewOperation {
  fn from(request: &HttpRequest) -> Self {
    Self {
      url: request.url.to_string(),
      method: request.method.clone(),
      headers: request.headers.clone(),
      body: request.body.clone(),
    }
  }
}

/// Persistent write queue backed by the `ops_queue` table.
///
/// Operations are appended at the tail and removed one at a time. Nothing
/// is ever reordered, merged or edited in place.
#[derive(Clone)]
pub struct WriteQueue {
  db: Database,
}

impl WriteQueue {
  pub fn new(db: Database) -> Self {
    Self { db }
  }

  /// Append an operation. Returns the id the store assigned.
  pub fn enqueue(&self, op: &NewOperation) -> Result<i64> {
    let headers =
      serde_json::to_string(&op.headers).map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    let conn = self.db.lock()?;
    conn
      .execute(
        "INSERT INTO ops_queue (url, method, headers, body, enqueued_at) VALUES (?, ?, ?, ?, ?)",
        params![op.url, op.method, headers, op.body, Utc::now().timestamp_millis()],
      )
      .map_err(|e| eyre!("Failed to enqueue {} {}: {}", op.method, op.url, e))?;

    let id = conn.last_insert_rowid();
    debug!(id, method = %op.method, url = %op.url, "Enqueued operation");
    Ok(id)
  }

  /// All pending operations in ascending id order.
  ///
  /// A missing or unreadable store yields an empty list so the drain path
  /// never crashes on it.
  pub fn list(&self) -> Vec<QueueOperation> {
    match self.try_list() {
      Ok(ops) => ops,
      Err(e) => {
        warn!(error = %e, "Could not read operation queue, treating as empty");
        Vec::new()
      }
    }
  }

  fn try_list(&self) -> Result<Vec<QueueOperation>> {
    let conn = self.db.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT id, url, method, headers, body, enqueued_at FROM ops_queue ORDER BY id ASC",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(i64, String, String, String, Option<String>, i64)> = stmt
      .query_map([], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query operations: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read operations: {}", e))?;

    let ops = rows
      .into_iter()
      .map(|(id, url, method, headers, body, enqueued_at)| {
        let headers = serde_json::from_str(&headers).unwrap_or_else(|e| {
          warn!(id, error = %e, "Stored headers are unreadable, replaying without them");
          Headers::new()
        });
        QueueOperation {
          id,
          url,
          method,
          headers,
          body,
          enqueued_at: Utc
            .timestamp_millis_opt(enqueued_at)
            .single()
            .unwrap_or_default(),
        }
      })
      .collect();

    Ok(ops)
  }

  /// Remove one operation. Unknown ids are a no-op.
  pub fn dequeue(&self, id: i64) -> Result<()> {
    let conn = self.db.lock()?;
    conn
      .execute("DELETE FROM ops_queue WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to dequeue operation {}: {}", id, e))?;
    Ok(())
  }

  /// Remove every pending operation.
  pub fn clear(&self) -> Result<()> {
    let conn = self.db.lock()?;
    conn
      .execute("DELETE FROM ops_queue", [])
      .map_err(|e| eyre!("Failed to clear operation queue: {}", e))?;
    Ok(())
  }
}
