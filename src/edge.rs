//! Interception boundary: every outbound request goes through `EdgeCache::fetch`.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::cache::{CacheLayer, Classifier, Served, SqliteStorage, VersionedCache};
use crate::config::Config;
use crate::db::Database;
use crate::http::{HttpRequest, ReqwestTransport, Transport, TransportError};
use crate::queue::{ChannelTrigger, DrainReport, NewOperation, SyncOrchestrator, WriteQueue};

#[derive(Debug, Error)]
pub enum FetchError {
  /// Network failed and there was nothing cached to serve
  #[error(transparent)]
  Network(#[from] TransportError),
  /// The write could not reach the server and was persisted for replay
  #[error("request queued for replay as operation {id}: {cause}")]
  Queued { id: i64, cause: TransportError },
  /// The write could not reach the server and could not be persisted either
  #[error("failed to queue request: {0}")]
  Store(color_eyre::Report),
}

/// Client-side edge: cache for reads, durable queue for writes.
pub struct EdgeCache {
  classifier: Classifier,
  layer: CacheLayer<SqliteStorage>,
  queue: WriteQueue,
  orchestrator: Arc<SyncOrchestrator>,
  transport: Arc<dyn Transport>,
  /// Nudged whenever a write is queued
  sync_trigger: Option<Arc<ChannelTrigger>>,
  origin: Url,
  precache: Vec<String>,
}

impl EdgeCache {
  /// Open the durable store under the configured data directory and talk to the real network.
  pub fn open(config: &Config) -> Result<Self> {
    let db = Database::open(&config.data_dir()?)?;
    let transport = Arc::new(ReqwestTransport::new(config.request_timeout())?);
    Self::new(config, db, transport)
  }

  pub fn new(config: &Config, db: Database, transport: Arc<dyn Transport>) -> Result<Self> {
    let origin = Url::parse(&config.origin)
      .map_err(|e| eyre!("Invalid origin '{}': {}", config.origin, e))?;

    let cache = VersionedCache::new(SqliteStorage::new(db.clone()), config.version.clone());
    let layer = CacheLayer::new(cache, Arc::clone(&transport))
      .with_api_soft_ttl(config.api_soft_ttl())
      .with_other_strategy(config.other_strategy);

    let queue = WriteQueue::new(db);
    let orchestrator = Arc::new(SyncOrchestrator::new(
      queue.clone(),
      Arc::clone(&transport),
    ));

    Ok(Self {
      classifier: Classifier::from_config(config),
      layer,
      queue,
      orchestrator,
      transport,
      sync_trigger: None,
      origin,
      precache: config.precache.clone(),
    })
  }

  /// Fire `trigger` whenever a write is queued.
  pub fn with_sync_trigger(mut self, trigger: Arc<ChannelTrigger>) -> Self {
    self.sync_trigger = Some(trigger);
    self
  }

  /// Resolve a path or absolute URL against the configured origin.
  pub fn resolve(&self, target: &str) -> Result<Url> {
    self
      .origin
      .join(target)
      .map_err(|e| eyre!("Invalid URL '{}': {}", target, e))
  }

  /// Serve one outbound request.
  pub async fn fetch(&self, request: HttpRequest) -> Result<Served, FetchError> {
    if self.classifier.bypass(&request) {
      let response = self.transport.send(&request).await?;
      return Ok(Served::passthrough(response));
    }

    if request.is_mutating() {
      return self.send_or_enqueue(&request).await;
    }

    if !request.is_read() {
      let response = self.transport.send(&request).await?;
      return Ok(Served::passthrough(response));
    }

    let class = self.classifier.classify(&request);
    Ok(self.layer.handle(&request, class).await?)
  }

  /// Send a write; on network failure or non-2xx, persist it for replay.
  async fn send_or_enqueue(&self, request: &HttpRequest) -> Result<Served, FetchError> {
    let cause = match self.transport.send(request).await {
      Ok(response) if response.is_success() => return Ok(Served::from_network(response)),
      Ok(response) => TransportError::Status(response.status),
      Err(e) => e,
    };

    warn!(method = %request.method, url = %request.url, error = %cause, "Write failed, queueing");
    let id = self
      .queue
      .enqueue(&NewOperation::from(request))
      .map_err(FetchError::Store)?;

    if let Some(trigger) = &self.sync_trigger {
      trigger.notify();
    }

    Err(FetchError::Queued { id, cause })
  }

  /// Wait for background cache refreshes started by earlier fetches.
  pub async fn settle(&self) {
    self.layer.settle().await;
  }

  /// Manual resync: one drain pass, counts for display.
  pub async fn resync(&self) -> DrainReport {
    self.orchestrator.drain().await
  }

  /// Fetch the precache list into the configured namespace.
  ///
  /// Returns how many paths were stored; failures are logged and skipped.
  pub async fn install(&self) -> Result<usize> {
    let requests = self
      .precache
      .iter()
      .map(|path| self.resolve(path).map(HttpRequest::get))
      .collect::<Result<Vec<_>>>()?;

    let results = join_all(requests.iter().map(|r| self.layer.precache(r))).await;

    let mut stored = 0;
    for (request, result) in requests.iter().zip(results) {
      match result {
        Ok(()) => stored += 1,
        Err(e) => warn!(url = %request.url, error = %e, "Precache failed"),
      }
    }
    info!(
      version = self.layer.cache().version(),
      stored,
      total = self.precache.len(),
      "Installed cache namespace"
    );
    Ok(stored)
  }

  /// Make the configured namespace live and sweep every other one.
  pub fn activate(&self) -> Result<usize> {
    self.layer.cache().activate()
  }

  pub fn namespaces(&self) -> Result<Vec<String>> {
    self.layer.cache().namespaces()
  }

  pub fn queue(&self) -> &WriteQueue {
    &self.queue
  }

  pub fn orchestrator(&self) -> Arc<SyncOrchestrator> {
    Arc::clone(&self.orchestrator)
  }

  pub fn transport(&self) -> Arc<dyn Transport> {
    Arc::clone(&self.transport)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::CacheSource;
  use crate::http::mock::{MockTransport, Outcome};
  use crate::queue::spawn_background_replay;
  use std::time::Duration;

  fn config() -> Config {
    Config {
      origin: "https://app.test".to_string(),
      ..Config::default()
    }
  }

  fn edge(transport: Arc<MockTransport>) -> EdgeCache {
    EdgeCache::new(&config(), Database::open_in_memory().unwrap(), transport).unwrap()
  }

  fn post(edge: &EdgeCache, path: &str, body: &str) -> HttpRequest {
    HttpRequest::new("POST", edge.resolve(path).unwrap())
      .with_header("content-type", "application/json")
      .with_body(body)
  }

  #[tokio::test]
  async fn test_offline_write_is_queued() {
    let transport = Arc::new(MockTransport::offline());
    let edge = edge(transport.clone());

    let result = edge.fetch(post(&edge, "/api/likes", "{}")).await;
    let id = match result {
      Err(FetchError::Queued { id, .. }) => id,
      other => panic!("expected queued, got {:?}", other.map(|s| s.source)),
    };

    let pending = edge.queue().list();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, id);
    assert_eq!(pending[0].url, "https://app.test/api/likes");
    assert_eq!(pending[0].headers["content-type"], "application/json");
  }

  #[tokio::test]
  async fn test_rejected_write_is_queued() {
    let transport = Arc::new(MockTransport::new(Outcome::Respond(500, "boom".to_string())));
    let edge = edge(transport);

    let result = edge.fetch(post(&edge, "/api/likes", "{}")).await;
    assert!(matches!(
      result,
      Err(FetchError::Queued {
        cause: TransportError::Status(500),
        ..
      })
    ));
  }

  #[tokio::test]
  async fn test_successful_write_is_not_queued() {
    let edge = edge(Arc::new(MockTransport::ok("created")));
    let served = edge.fetch(post(&edge, "/api/likes", "{}")).await.unwrap();
    assert_eq!(served.source, CacheSource::Network);
    assert!(edge.queue().list().is_empty());
  }

  #[tokio::test]
  async fn test_storage_upload_bypasses_queue_and_cache() {
    let transport = Arc::new(MockTransport::offline());
    let edge = edge(transport.clone());
    let upload = HttpRequest::new(
      "POST",
      Url::parse("https://firebasestorage.googleapis.com/v0/b/x/o?uploadType=resumable").unwrap(),
    );

    let result = edge.fetch(upload).await;
    assert!(matches!(result, Err(FetchError::Network(_))));
    assert!(edge.queue().list().is_empty());
    assert_eq!(transport.call_count(), 1);
  }

  #[tokio::test]
  async fn test_offline_scenario_then_resync() {
    let transport = Arc::new(MockTransport::offline());
    let edge = edge(transport.clone());

    for name in ["A", "B", "C"] {
      let _ = edge.fetch(post(&edge, &format!("/api/ops/{}", name), name)).await;
    }
    assert_eq!(edge.queue().list().len(), 3);

    transport.on("https://app.test/api/ops/A", Outcome::Respond(200, String::new()));
    transport.on("https://app.test/api/ops/C", Outcome::Respond(201, String::new()));
    let report = edge.resync().await;
    assert_eq!(report, DrainReport { success: 2, failed: 1 });

    let left: Vec<String> = edge.queue().list().into_iter().map(|o| o.url).collect();
    assert_eq!(left, vec!["https://app.test/api/ops/B"]);

    transport.on("https://app.test/api/ops/B", Outcome::Respond(200, String::new()));
    assert_eq!(edge.resync().await, DrainReport { success: 1, failed: 0 });
    assert!(edge.queue().list().is_empty());
  }

  #[tokio::test]
  async fn test_queued_write_nudges_background_replay() {
    let transport = Arc::new(MockTransport::ok("ok"));
    let trigger = Arc::new(ChannelTrigger::new());
    let edge = edge(transport.clone()).with_sync_trigger(trigger.clone());
    let mut replay = spawn_background_replay(trigger.as_ref(), edge.orchestrator()).unwrap();

    let url = "https://app.test/api/retry";
    transport.on(url, Outcome::Fail);
    let _ = edge.fetch(post(&edge, "/api/retry", "{}")).await;

    let report = tokio::time::timeout(Duration::from_secs(2), replay.reports.recv())
      .await
      .unwrap()
      .unwrap();
    assert_eq!(report.success, 1);
    assert!(edge.queue().list().is_empty());
  }

  #[tokio::test]
  async fn test_reads_are_classified() {
    let transport = Arc::new(MockTransport::ok("bytes"));
    let edge = edge(transport.clone());
    let logo = HttpRequest::get(edge.resolve("/logo.png").unwrap());

    edge.fetch(logo.clone()).await.unwrap();
    let served = edge.fetch(logo).await.unwrap();
    assert_eq!(served.source, CacheSource::CacheFresh);
    assert_eq!(transport.call_count(), 1);
  }

  #[test]
  fn test_settled_refresh_survives_runtime_shutdown() {
    let transport = Arc::new(MockTransport::ok("v1"));
    let edge = edge(transport.clone());
    let home = HttpRequest::get(edge.resolve("/").unwrap());

    let invoke = |edge: &EdgeCache| {
      let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();
      let served = runtime.block_on(async {
        let served = edge.fetch(home.clone()).await.unwrap();
        edge.settle().await;
        served
      });
      drop(runtime);
      served
    };

    let first = invoke(&edge);
    assert_eq!(first.source, CacheSource::Network);
    assert_eq!(first.response.body_text(), "v1");

    transport.on(
      "https://app.test/",
      Outcome::Slow(Duration::from_millis(30), 200, "v2".to_string()),
    );
    let second = invoke(&edge);
    assert_eq!(second.source, CacheSource::CacheStale);
    assert_eq!(second.response.body_text(), "v1");

    let third = invoke(&edge);
    assert_eq!(third.source, CacheSource::CacheStale);
    assert_eq!(third.response.body_text(), "v2");
    assert_eq!(transport.call_count(), 3);
  }

  #[tokio::test]
  async fn test_install_then_activate() {
    let transport = Arc::new(MockTransport::ok("<html></html>"));
    transport.on("https://app.test/index.html", Outcome::Fail);
    let db = Database::open_in_memory().unwrap();

    let old = EdgeCache::new(
      &Config {
        version: "v0".to_string(),
        ..config()
      },
      db.clone(),
      transport.clone(),
    )
    .unwrap();
    old.install().await.unwrap();

    let new = EdgeCache::new(
      &Config {
        version: "v2".to_string(),
        ..config()
      },
      db,
      transport,
    )
    .unwrap();
    assert_eq!(new.install().await.unwrap(), 2);
    assert_eq!(new.namespaces().unwrap(), vec!["v0", "v2"]);

    assert_eq!(new.activate().unwrap(), 1);
    assert_eq!(new.namespaces().unwrap(), vec!["v2"]);
  }
}
