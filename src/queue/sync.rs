//! Replays the write queue against the network.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use url::Url;

use super::store::{QueueOperation, WriteQueue};
use crate::http::{HttpRequest, Transport, TransportError};

/// Outcome of one drain pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrainReport {
  pub success: usize,
  pub failed: usize,
}

/// Drains the queue in id order, best-effort over every entry.
pub struct SyncOrchestrator {
  queue: WriteQueue,
  transport: Arc<dyn Transport>,
  /// Held for a whole pass so two drains never interleave
  pass: Mutex<()>,
}

impl SyncOrchestrator {
  pub fn new(queue: WriteQueue, transport: Arc<dyn Transport>) -> Self {
    Self {
      queue,
      transport,
      pass: Mutex::new(()),
    }
  }

  /// One full pass over the pending operations.
  ///
  /// Each operation is attempted once, in order. A 2xx response removes it;
  /// anything else leaves it for the next pass and the loop moves on.
  pub async fn drain(&self) -> DrainReport {
    let _pass = self.pass.lock().await;
    let ops = self.queue.list();
    let mut report = DrainReport::default();

    if ops.is_empty() {
      return report;
    }
    info!(pending = ops.len(), "Replaying queued operations");

    for op in ops {
      match self.replay(&op).await {
        Ok(()) => match self.queue.dequeue(op.id) {
          Ok(()) => report.success += 1,
          Err(e) => {
            error!(id = op.id, error = %e, "Replayed operation could not be dequeued");
            report.failed += 1;
          }
        },
        Err(e) => {
          warn!(id = op.id, method = %op.method, url = %op.url, error = %e, "Replay failed");
          report.failed += 1;
        }
      }
    }

    info!(
      success = report.success,
      failed = report.failed,
      "Drain finished"
    );
    report
  }

  async fn replay(&self, op: &QueueOperation) -> Result<(), TransportError> {
    let url = Url::parse(&op.url)
      .map_err(|e| TransportError::Unavailable(format!("invalid url {}: {}", op.url, e)))?;

    let request = HttpRequest {
      headers: op.headers.clone(),
      body: op.body.clone(),
      ..HttpRequest::new(&op.method, url)
    };

    let response = self.transport.send(&request).await?;
    if response.is_success() {
      Ok(())
    } else {
      Err(TransportError::Status(response.status))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Database;
  use crate::http::mock::{MockTransport, Outcome};
  use crate::http::Headers;
  use crate::queue::NewOperation;

  fn op(name: &str) -> NewOperation {
    NewOperation {
      url: format!("https://app.test/api/{}", name),
      method: "POST".to_string(),
      headers: Headers::new(),
      body: Some(name.to_string()),
    }
  }

  fn setup(transport: MockTransport) -> (WriteQueue, Arc<MockTransport>, SyncOrchestrator) {
    let queue = WriteQueue::new(Database::open_in_memory().unwrap());
    let transport = Arc::new(transport);
    let orchestrator = SyncOrchestrator::new(queue.clone(), transport.clone());
    (queue, transport, orchestrator)
  }

  fn pending(queue: &WriteQueue) -> Vec<String> {
    queue.list().into_iter().filter_map(|o| o.body).collect()
  }

  #[tokio::test]
  async fn test_failure_does_not_halt_drain() {
    let (queue, transport, orchestrator) = setup(MockTransport::ok("ok"));
    for name in ["A", "B", "C"] {
      queue.enqueue(&op(name)).unwrap();
    }
    transport.on("https://app.test/api/B", Outcome::Fail);

    let report = orchestrator.drain().await;
    assert_eq!(report, DrainReport { success: 2, failed: 1 });
    assert_eq!(pending(&queue), vec!["B"]);
    assert_eq!(
      transport.calls(),
      vec![
        "POST https://app.test/api/A",
        "POST https://app.test/api/B",
        "POST https://app.test/api/C",
      ]
    );

    let report = orchestrator.drain().await;
    assert_eq!(report, DrainReport { success: 1, failed: 0 });
    assert!(queue.list().is_empty());
  }

  #[tokio::test]
  async fn test_non_success_status_keeps_operation() {
    let (queue, transport, orchestrator) = setup(MockTransport::ok("ok"));
    queue.enqueue(&op("A")).unwrap();
    queue.enqueue(&op("B")).unwrap();
    transport.on(
      "https://app.test/api/A",
      Outcome::Respond(503, "busy".to_string()),
    );

    let report = orchestrator.drain().await;
    assert_eq!(report, DrainReport { success: 1, failed: 1 });
    assert_eq!(pending(&queue), vec!["A"]);
  }

  #[tokio::test]
  async fn test_replay_order_matches_enqueue_order() {
    let (queue, transport, orchestrator) = setup(MockTransport::ok("ok"));
    let names: Vec<String> = (0..10).map(|i| format!("op{}", i)).collect();
    for name in &names {
      queue.enqueue(&op(name)).unwrap();
    }

    orchestrator.drain().await;

    let expected: Vec<String> = names
      .iter()
      .map(|n| format!("POST https://app.test/api/{}", n))
      .collect();
    assert_eq!(transport.calls(), expected);
  }

  #[tokio::test]
  async fn test_replay_sends_stored_method_headers_and_body() {
    let queue = WriteQueue::new(Database::open_in_memory().unwrap());

    struct Capture(std::sync::Mutex<Vec<HttpRequest>>);

    #[async_trait::async_trait]
    impl Transport for Capture {
      async fn send(
        &self,
        request: &HttpRequest,
      ) -> Result<crate::http::HttpResponse, TransportError> {
        self.0.lock().unwrap().push(request.clone());
        Ok(crate::http::HttpResponse::new(201, ""))
      }
    }

    let capture = Arc::new(Capture(std::sync::Mutex::new(Vec::new())));
    let orchestrator = SyncOrchestrator::new(queue.clone(), capture.clone());
    queue
      .enqueue(&NewOperation {
        url: "https://app.test/api/items/7".to_string(),
        method: "PATCH".to_string(),
        headers: Headers::from([("x-token".to_string(), "abc".to_string())]),
        body: Some("{}".to_string()),
      })
      .unwrap();

    orchestrator.drain().await;

    let sent = capture.0.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].method, "PATCH");
    assert_eq!(sent[0].headers["x-token"], "abc");
    assert_eq!(sent[0].body.as_deref(), Some("{}"));
  }

  #[tokio::test]
  async fn test_empty_queue_drains_to_zero() {
    let (_queue, transport, orchestrator) = setup(MockTransport::ok("ok"));
    assert_eq!(orchestrator.drain().await, DrainReport::default());
    assert_eq!(transport.call_count(), 0);
  }

  #[tokio::test]
  async fn test_uninitialized_store_drains_to_zero() {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    let queue = WriteQueue::new(Database::from_connection(conn));
    let orchestrator = SyncOrchestrator::new(queue, Arc::new(MockTransport::ok("ok")));
    assert_eq!(orchestrator.drain().await, DrainReport::default());
  }
}
