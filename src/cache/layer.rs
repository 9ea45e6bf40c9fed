//! Cache layer that picks a strategy per resource class and runs it against the network.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use super::classify::ResourceClass;
use super::storage::CacheStorage;
use super::traits::{request_key, CacheEntry, Served};
use super::version::VersionedCache;
use crate::config::OtherStrategy;
use crate::http::{HttpRequest, HttpResponse, Transport, TransportError};

/// Cache layer that manages caching strategies and network fetching.
///
/// Sits between the caller and the transport. Every path resolves with a
/// response unless the network failed and there is nothing cached to fall
/// back on.
pub struct CacheLayer<S: CacheStorage> {
  cache: VersionedCache<S>,
  transport: Arc<dyn Transport>,
  /// Soft freshness window for API responses
  api_soft_ttl: Duration,
  other_strategy: OtherStrategy,
  /// In-flight background revalidations
  tasks: TaskTracker,
}

impl<S: CacheStorage> CacheLayer<S> {
  /// Create a new cache layer over the live namespace.
  pub fn new(cache: VersionedCache<S>, transport: Arc<dyn Transport>) -> Self {
    Self {
      cache,
      transport,
      api_soft_ttl: Duration::seconds(10),
      other_strategy: OtherStrategy::default(),
      tasks: TaskTracker::new(),
    }
  }

  /// Set the soft TTL for API responses.
  ///
  /// Out-of-range values keep the current window.
  pub fn with_api_soft_ttl(mut self, ttl: std::time::Duration) -> Self {
    match Duration::from_std(ttl) {
      Ok(ttl) => self.api_soft_ttl = ttl,
      Err(e) => warn!(
        requested = ?ttl,
        kept = %self.api_soft_ttl,
        error = %e,
        "API soft TTL out of range, keeping current window"
      ),
    }
    self
  }

  pub fn with_other_strategy(mut self, strategy: OtherStrategy) -> Self {
    self.other_strategy = strategy;
    self
  }

  pub fn cache(&self) -> &VersionedCache<S> {
    &self.cache
  }

  /// Wait for every background revalidation started so far to finish.
  ///
  /// Tasks left on a runtime that shuts down are cancelled before they write
  /// back, so short-lived callers must settle before exiting.
  pub async fn settle(&self) {
    self.tasks.close();
    self.tasks.wait().await;
    self.tasks.reopen();
  }

  /// Serve a read request according to its class.
  pub async fn handle(
    &self,
    request: &HttpRequest,
    class: ResourceClass,
  ) -> Result<Served, TransportError> {
    debug!(url = %request.url, ?class, "Handling request");
    match class {
      ResourceClass::Navigation => self.stale_while_revalidate(request).await,
      ResourceClass::Api => self.api_soft_ttl_revalidate(request).await,
      ResourceClass::Asset => self.cache_first(request).await,
      ResourceClass::Other => match self.other_strategy {
        OtherStrategy::StaleWhileRevalidate => self.stale_while_revalidate(request).await,
        OtherStrategy::NetworkFirst => self.network_first(request).await,
      },
    }
  }

  /// Return the cached entry immediately if present and refresh it in the
  /// background. Without an entry, wait on the network.
  pub async fn stale_while_revalidate(
    &self,
    request: &HttpRequest,
  ) -> Result<Served, TransportError> {
    let key = request_key(request);
    let cached = self.lookup(&key);
    let revalidation = self.revalidate(request, &key);

    match cached {
      Some(entry) => Ok(Served::from_cache(entry, true)),
      None => join(revalidation).await.map(Served::from_network),
    }
  }

  /// Serve from cache without touching the network; fetch and store on a miss.
  pub async fn cache_first(&self, request: &HttpRequest) -> Result<Served, TransportError> {
    let key = request_key(request);
    if let Some(entry) = self.lookup(&key) {
      return Ok(Served::from_cache(entry, false));
    }

    let response = self.transport.send(request).await?;
    self.write_back(&key, request, &response);
    Ok(Served::from_network(response))
  }

  /// Prefer the network; fall back to cache only when it is unreachable.
  pub async fn network_first(&self, request: &HttpRequest) -> Result<Served, TransportError> {
    let key = request_key(request);
    match self.transport.send(request).await {
      Ok(response) => {
        self.write_back(&key, request, &response);
        Ok(Served::from_network(response))
      }
      Err(e) => match self.lookup(&key) {
        Some(entry) => {
          debug!(url = %request.url, error = %e, "Network failed, serving cached response");
          Ok(Served::offline(entry))
        }
        None => Err(e),
      },
    }
  }

  /// Stale-while-revalidate with a soft freshness window.
  ///
  /// The network fetch always starts. A cached entry younger than the window
  /// is returned right away; an older one is only used if the fetch fails.
  pub async fn api_soft_ttl_revalidate(
    &self,
    request: &HttpRequest,
  ) -> Result<Served, TransportError> {
    let key = request_key(request);
    let cached = self.lookup(&key);
    let revalidation = self.revalidate(request, &key);

    match cached {
      Some(entry) if self.is_fresh(&entry) => {
        Ok(Served::from_cache(entry, false))
      }
      Some(entry) => match join(revalidation).await {
        Ok(response) => Ok(Served::from_network(response)),
        Err(e) => {
          debug!(url = %request.url, error = %e, "Network failed, serving stale API response");
          Ok(Served::offline(entry))
        }
      },
      None => join(revalidation).await.map(Served::from_network),
    }
  }

  /// Fetch `url` into the cache regardless of what is there.
  pub async fn precache(&self, request: &HttpRequest) -> Result<(), TransportError> {
    let response = self.transport.send(request).await?;
    if !response.is_success() {
      return Err(TransportError::Status(response.status));
    }
    self.write_back(&request_key(request), request, &response);
    Ok(())
  }

  /// Younger than the soft window. A timestamp from the future counts as stale.
  fn is_fresh(&self, entry: &CacheEntry) -> bool {
    let age = Utc::now() - entry.cached_at;
    age >= Duration::zero() && age < self.api_soft_ttl
  }

  /// Store read errors degrade to a miss.
  fn lookup(&self, key: &str) -> Option<CacheEntry> {
    self.cache.lookup(key).unwrap_or_else(|e| {
      warn!(error = %e, "Cache read failed, treating as miss");
      None
    })
  }

  fn write_back(&self, key: &str, request: &HttpRequest, response: &HttpResponse) {
    store_success(&self.cache, key, request, response);
  }

  /// Start a tracked network fetch that writes back on success.
  ///
  /// The task keeps running even if the handle is dropped; `settle` waits for it.
  fn revalidate(
    &self,
    request: &HttpRequest,
    key: &str,
  ) -> JoinHandle<Result<HttpResponse, TransportError>> {
    let transport = Arc::clone(&self.transport);
    let cache = self.cache.clone();
    let request = request.clone();
    let key = key.to_string();

    self.tasks.spawn(async move {
      let response = transport.send(&request).await?;
      store_success(&cache, &key, &request, &response);
      Ok(response)
    })
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      cache: self.cache.clone(),
      transport: Arc::clone(&self.transport),
      api_soft_ttl: self.api_soft_ttl,
      other_strategy: self.other_strategy,
      tasks: self.tasks.clone(),
    }
  }
}

/// Error responses are never cached.
fn store_success<S: CacheStorage>(
  cache: &VersionedCache<S>,
  key: &str,
  request: &HttpRequest,
  response: &HttpResponse,
) {
  if !response.is_success() {
    return;
  }
  if let Err(e) = cache.store(key, request.url.as_str(), response) {
    warn!(url = %request.url, error = %e, "Failed to write cache entry");
  }
}

async fn join(
  handle: JoinHandle<Result<HttpResponse, TransportError>>,
) -> Result<HttpResponse, TransportError> {
  handle.await.unwrap_or_else(|e| {
    Err(TransportError::Unavailable(format!(
      "revalidation task failed: {}",
      e
    )))
  })
}
