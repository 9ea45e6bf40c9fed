pub mod records;
pub mod schema;

use color_eyre::{eyre::eyre, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared handle to the durable store.
///
/// Every table lives in one SQLite file. Each operation takes the lock for
/// the length of a single transaction, so readers never observe a torn write.
#[derive(Clone)]
pub struct Database {
  conn: Arc<Mutex<Connection>>,
  path: Option<PathBuf>,
}

impl Database {
  /// Open or create the database inside `data_dir`
  pub fn open(data_dir: &Path) -> Result<Self> {
    std::fs::create_dir_all(data_dir)
      .map_err(|e| eyre!("Failed to create database directory: {}", e))?;

    let path = data_dir.join("edgecache.db");
    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

    let db = Self {
      conn: Arc::new(Mutex::new(conn)),
      path: Some(path),
    };
    db.run_migrations()?;

    Ok(db)
  }

  /// Open a private in-memory database with all tables created
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    let db = Self::from_connection(conn);
    db.run_migrations()?;
    Ok(db)
  }

  /// Wrap an existing connection without running migrations
  pub fn from_connection(conn: Connection) -> Self {
    Self {
      conn: Arc::new(Mutex::new(conn)),
      path: None,
    }
  }

  /// Run database migrations
  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(schema::SCHEMA)
      .map_err(|e| eyre!("Failed to run migrations: {}", e))?;
    Ok(())
  }

  /// Lock the connection for one transaction
  pub fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Location of the database file, if it is file-backed
  pub fn path(&self) -> Option<&Path> {
    self.path.as_deref()
  }

  /// Approximate on-disk size in megabytes
  pub fn estimate_size_mb(&self) -> f64 {
    self
      .path
      .as_deref()
      .and_then(|p| std::fs::metadata(p).ok())
      .map(|m| m.len() as f64 / (1024.0 * 1024.0))
      .unwrap_or(0.0)
  }
}
