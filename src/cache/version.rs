//! The live cache generation.

use chrono::Utc;
use color_eyre::Result;
use std::sync::Arc;
use tracing::info;

use super::storage::CacheStorage;
use super::traits::CacheEntry;
use crate::http::HttpResponse;

/// Cache store bound to one namespace.
///
/// The version comes from configuration; nothing here mutates it.
pub struct VersionedCache<S: CacheStorage> {
  storage: Arc<S>,
  version: String,
}

impl<S: CacheStorage> VersionedCache<S> {
  pub fn new(storage: S, version: impl Into<String>) -> Self {
    Self {
      storage: Arc::new(storage),
      version: version.into(),
    }
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  pub fn lookup(&self, key: &str) -> Result<Option<CacheEntry>> {
    self.storage.get(&self.version, key)
  }

  /// Snapshot a response under `key`, stamped with the current time.
  pub fn store(&self, key: &str, url: &str, response: &HttpResponse) -> Result<()> {
    self.put_entry(
      key,
      &CacheEntry {
        url: url.to_string(),
        response: response.clone(),
        cached_at: Utc::now(),
      },
    )
  }

  pub fn put_entry(&self, key: &str, entry: &CacheEntry) -> Result<()> {
    self.storage.put(&self.version, key, entry)
  }

  pub fn namespaces(&self) -> Result<Vec<String>> {
    self.storage.namespaces()
  }

  /// Make this version live and delete every other namespace.
  pub fn activate(&self) -> Result<usize> {
    let removed = self.storage.retain_only(&self.version)?;
    info!(version = %self.version, removed, "Activated cache namespace");
    Ok(removed)
  }
}

impl<S: CacheStorage> Clone for VersionedCache<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      version: self.version.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::db::Database;

  #[test]
  fn test_activation_keeps_only_new_version() {
    let db = Database::open_in_memory().unwrap();
    let response = HttpResponse::new(200, "body");

    for version in ["v0", "v1"] {
      VersionedCache::new(SqliteStorage::new(db.clone()), version)
        .store("k", "https://a.test/", &response)
        .unwrap();
    }

    let v2 = VersionedCache::new(SqliteStorage::new(db.clone()), "v2");
    v2.store("k", "https://a.test/", &response).unwrap();
    v2.activate().unwrap();

    assert_eq!(v2.namespaces().unwrap(), vec!["v2"]);
    let v1 = VersionedCache::new(SqliteStorage::new(db), "v1");
    assert!(v1.lookup("k").unwrap().is_none());
  }
}
