//! Connectivity-restored triggers that start a background drain.

use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::sync::{DrainReport, SyncOrchestrator};
use crate::http::{HttpRequest, Transport};

pub type Callback = Box<dyn Fn() + Send + Sync>;

/// Platform hook that reports when the network comes back.
pub trait ReplayTrigger: Send + Sync {
  /// Register `callback` to run on every connectivity-restored event.
  fn on_connectivity_restored(&self, callback: Callback) -> Result<()>;
}

/// Fires when `notify` is called.
///
/// Stands in for a platform "sync requested" signal.
#[derive(Default)]
pub struct ChannelTrigger {
  callbacks: Mutex<Vec<Callback>>,
}

impl ChannelTrigger {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn notify(&self) {
    match self.callbacks.lock() {
      Ok(callbacks) => callbacks.iter().for_each(|cb| cb()),
      Err(e) => warn!(error = %e, "Trigger callbacks poisoned"),
    }
  }
}

impl ReplayTrigger for ChannelTrigger {
  fn on_connectivity_restored(&self, callback: Callback) -> Result<()> {
    self
      .callbacks
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?
      .push(callback);
    Ok(())
  }
}

/// Probes a URL on an interval and fires on each offline → online transition.
///
/// Starts out assuming offline, so the first successful probe fires once.
pub struct PollingTrigger {
  transport: Arc<dyn Transport>,
  probe: Url,
  interval: Duration,
  /// One polling loop per registered callback
  loops: Mutex<Vec<JoinHandle<()>>>,
}

impl PollingTrigger {
  pub fn new(transport: Arc<dyn Transport>, probe: Url, interval: Duration) -> Self {
    Self {
      transport,
      probe,
      interval,
      loops: Mutex::new(Vec::new()),
    }
  }

  /// Abort every polling loop. Registered callbacks stop firing.
  pub fn stop(&self) {
    match self.loops.lock() {
      Ok(mut loops) => loops.drain(..).for_each(|handle| handle.abort()),
      Err(e) => warn!(error = %e, "Polling loops poisoned"),
    }
  }
}

impl Drop for PollingTrigger {
  fn drop(&mut self) {
    self.stop();
  }
}

impl ReplayTrigger for PollingTrigger {
  fn on_connectivity_restored(&self, callback: Callback) -> Result<()> {
    let runtime = tokio::runtime::Handle::try_current()
      .map_err(|e| eyre!("Connectivity polling needs a Tokio runtime: {}", e))?;

    let transport = Arc::clone(&self.transport);
    let request = HttpRequest::new("HEAD", self.probe.clone());
    let interval = self.interval;

    let handle = runtime.spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      let mut online = false;
      loop {
        ticker.tick().await;
        let reachable = transport.send(&request).await.is_ok();
        if reachable && !online {
          info!(probe = %request.url, "Connectivity restored");
          callback();
        } else if !reachable && online {
          info!(probe = %request.url, "Connectivity lost");
        }
        online = reachable;
      }
    });

    self
      .loops
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?
      .push(handle);
    Ok(())
  }
}

/// Running background replay worker.
pub struct BackgroundReplay {
  pub handle: JoinHandle<()>,
  /// One report per completed drain
  pub reports: mpsc::UnboundedReceiver<DrainReport>,
}

/// Run exactly one drain per trigger firing, one pass at a time.
///
/// Registration failure is logged and ignored: manual resync still works.
pub fn spawn_background_replay(
  trigger: &dyn ReplayTrigger,
  orchestrator: Arc<SyncOrchestrator>,
) -> Option<BackgroundReplay> {
  let runtime = match tokio::runtime::Handle::try_current() {
    Ok(runtime) => runtime,
    Err(e) => {
      warn!(error = %e, "Background replay unavailable, use manual resync");
      return None;
    }
  };

  let (fire_tx, mut fire_rx) = mpsc::unbounded_channel::<()>();
  let callback: Callback = Box::new(move || {
    if fire_tx.send(()).is_err() {
      debug!("Background replay worker is gone");
    }
  });

  if let Err(e) = trigger.on_connectivity_restored(callback) {
    warn!(error = %e, "Background replay registration failed, use manual resync");
    return None;
  }

  let (report_tx, reports) = mpsc::unbounded_channel();
  let handle = runtime.spawn(async move {
    while fire_rx.recv().await.is_some() {
      let report = orchestrator.drain().await;
      let _ = report_tx.send(report);
    }
  });

  Some(BackgroundReplay { handle, reports })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Database;
  use crate::http::mock::{MockTransport, Outcome};
  use crate::http::Headers;
  use crate::queue::{NewOperation, WriteQueue};

  struct Unsupported;

  impl ReplayTrigger for Unsupported {
    fn on_connectivity_restored(&self, _callback: Callback) -> Result<()> {
      Err(eyre!("background sync not supported"))
    }
  }

  fn setup(transport: Arc<MockTransport>) -> (WriteQueue, Arc<SyncOrchestrator>) {
    let queue = WriteQueue::new(Database::open_in_memory().unwrap());
    let orchestrator = Arc::new(SyncOrchestrator::new(queue.clone(), transport));
    (queue, orchestrator)
  }

  fn enqueue(queue: &WriteQueue, name: &str) {
    queue
      .enqueue(&NewOperation {
        url: format!("https://app.test/api/{}", name),
        method: "POST".to_string(),
        headers: Headers::new(),
        body: None,
      })
      .unwrap();
  }

  #[tokio::test]
  async fn test_each_firing_runs_one_drain() {
    let transport = Arc::new(MockTransport::ok("ok"));
    let (queue, orchestrator) = setup(transport.clone());
    let trigger = ChannelTrigger::new();
    let mut replay = spawn_background_replay(&trigger, orchestrator).unwrap();

    enqueue(&queue, "a");
    trigger.notify();
    let first = replay.reports.recv().await.unwrap();
    assert_eq!(first, DrainReport { success: 1, failed: 0 });

    enqueue(&queue, "b");
    trigger.notify();
    trigger.notify();
    let second = replay.reports.recv().await.unwrap();
    let third = replay.reports.recv().await.unwrap();
    assert_eq!(second.success + third.success, 1);
    assert_eq!(transport.call_count(), 2);
    assert!(queue.list().is_empty());
  }

  #[tokio::test]
  async fn test_registration_failure_is_tolerated() {
    let (_queue, orchestrator) = setup(Arc::new(MockTransport::ok("ok")));
    assert!(spawn_background_replay(&Unsupported, orchestrator.clone()).is_none());
    assert_eq!(orchestrator.drain().await, DrainReport::default());
  }

  #[test]
  fn test_polling_needs_runtime() {
    let trigger = PollingTrigger::new(
      Arc::new(MockTransport::ok("ok")),
      Url::parse("https://app.test/").unwrap(),
      Duration::from_millis(5),
    );
    assert!(trigger.on_connectivity_restored(Box::new(|| {})).is_err());
  }

  #[tokio::test]
  async fn test_polling_fires_once_per_reconnect() {
    let probe = "https://app.test/";
    let transport = Arc::new(MockTransport::ok("ok"));
    for outcome in [Outcome::Fail, Outcome::Fail] {
      transport.on(probe, outcome);
    }
    let trigger = PollingTrigger::new(
      transport.clone(),
      Url::parse(probe).unwrap(),
      Duration::from_millis(5),
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    trigger
      .on_connectivity_restored(Box::new(move || {
        let _ = tx.send(());
      }))
      .unwrap();

    tokio::time::timeout(Duration::from_secs(2), rx.recv())
      .await
      .unwrap()
      .unwrap();
    assert!(transport.call_count() >= 3);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_stop_ends_polling() {
    let transport = Arc::new(MockTransport::offline());
    let trigger = PollingTrigger::new(
      transport.clone(),
      Url::parse("https://app.test/").unwrap(),
      Duration::from_millis(5),
    );
    trigger.on_connectivity_restored(Box::new(|| {})).unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    trigger.stop();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let after_stop = transport.call_count();
    assert!(after_stop >= 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.call_count(), after_stop);
  }
}
