//! Core types for the caching system.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::http::{HttpRequest, HttpResponse};

/// Resource-class independent key for a request.
///
/// SHA256 of the method and the URL without its fragment, for stable, fixed-length keys.
pub fn request_key(request: &HttpRequest) -> String {
  let mut url = request.url.clone();
  url.set_fragment(None);

  let mut hasher = Sha256::new();
  hasher.update(request.method.as_bytes());
  hasher.update(b" ");
  hasher.update(url.as_str().as_bytes());
  hex::encode(hasher.finalize())
}

/// Last observed response for a key, with its capture time.
///
/// `cached_at` doubles as the soft-TTL marker for API responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  pub url: String,
  pub response: HttpResponse,
  pub cached_at: DateTime<Utc>,
}

/// Response handed back to the caller, including metadata about the source.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: HttpResponse,
  /// Where the response came from
  pub source: CacheSource,
  /// When the response was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl Served {
  /// Fresh data from the network.
  pub fn from_network(response: HttpResponse) -> Self {
    Self {
      response,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Data from cache.
  pub fn from_cache(entry: CacheEntry, is_stale: bool) -> Self {
    Self {
      response: entry.response,
      source: if is_stale {
        CacheSource::CacheStale
      } else {
        CacheSource::CacheFresh
      },
      cached_at: Some(entry.cached_at),
    }
  }

  /// Network failed, serving cached data.
  pub fn offline(entry: CacheEntry) -> Self {
    Self {
      response: entry.response,
      source: CacheSource::Offline,
      cached_at: Some(entry.cached_at),
    }
  }

  /// Never intercepted; straight from the network.
  pub fn passthrough(response: HttpResponse) -> Self {
    Self {
      response,
      source: CacheSource::Passthrough,
      cached_at: None,
    }
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Data from cache while a revalidation runs in the background
  CacheStale,
  /// Network unavailable, serving cached data
  Offline,
  /// Bypassed the cache entirely
  Passthrough,
}

impl std::fmt::Display for CacheSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      Self::Network => "network",
      Self::CacheFresh => "cache-fresh",
      Self::CacheStale => "cache-stale",
      Self::Offline => "offline",
      Self::Passthrough => "passthrough",
    };
    f.write_str(name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn req(method: &str, url: &str) -> HttpRequest {
    HttpRequest::new(method, Url::parse(url).unwrap())
  }

  #[test]
  fn test_key_ignores_fragment() {
    assert_eq!(
      request_key(&req("GET", "https://a.test/page#top")),
      request_key(&req("GET", "https://a.test/page"))
    );
  }

  #[test]
  fn test_key_depends_on_method_and_query() {
    let base = request_key(&req("GET", "https://a.test/api/x?id=1"));
    assert_ne!(base, request_key(&req("HEAD", "https://a.test/api/x?id=1")));
    assert_ne!(base, request_key(&req("GET", "https://a.test/api/x?id=2")));
    assert_eq!(base.len(), 64);
  }
}
