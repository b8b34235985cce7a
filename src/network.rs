//! Connectivity monitoring.
//!
//! [`NetworkStatusMonitor`] holds the latest [`NetworkStatus`] in a `tokio::sync::watch`
//! channel. Subscribers always see the current status immediately and are then notified
//! of every change. The status is fed either by the platform through
//! [`NetworkStatusMonitor::report`] or by the HTTP probe started with
//! [`NetworkStatusMonitor::spawn_probe`].

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, info};
use url::Url;

/// Coarse connection quality, as browsers report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffectiveType {
  #[serde(rename = "slow-2g")]
  Slow2g,
  #[serde(rename = "2g")]
  TwoG,
  #[serde(rename = "3g")]
  ThreeG,
  #[serde(rename = "4g")]
  FourG,
}

impl EffectiveType {
  /// Classify a round-trip time in milliseconds.
  pub fn from_rtt(rtt_ms: u64) -> Self {
    match rtt_ms {
      2000.. => EffectiveType::Slow2g,
      1400.. => EffectiveType::TwoG,
      270.. => EffectiveType::ThreeG,
      _ => EffectiveType::FourG,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
  pub is_online: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub effective_type: Option<EffectiveType>,
  /// Estimated bandwidth in Mbit/s
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub downlink: Option<f64>,
  /// Round-trip time in milliseconds
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub rtt: Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub save_data: Option<bool>,
}

impl NetworkStatus {
  pub fn online() -> Self {
    Self {
      is_online: true,
      effective_type: None,
      downlink: None,
      rtt: None,
      save_data: None,
    }
  }

  pub fn offline() -> Self {
    Self {
      is_online: false,
      ..Self::online()
    }
  }
}

pub struct NetworkStatusMonitor {
  tx: watch::Sender<NetworkStatus>,
}

impl NetworkStatusMonitor {
  pub fn new(initial: NetworkStatus) -> Self {
    let (tx, _rx) = watch::channel(initial);
    Self { tx }
  }

  pub fn status(&self) -> NetworkStatus {
    self.tx.borrow().clone()
  }

  pub fn is_online(&self) -> bool {
    self.tx.borrow().is_online
  }

  /// Publish a new status. Subscribers are only notified when it differs from the
  /// current one. Returns whether anything changed.
  pub fn report(&self, status: NetworkStatus) -> bool {
    self.tx.send_if_modified(|current| {
      if *current == status {
        return false;
      }
      if current.is_online != status.is_online {
        info!(online = status.is_online, "Connectivity changed");
      }
      *current = status;
      true
    })
  }

  /// Flip connectivity, keeping the quality attributes.
  pub fn set_online(&self, online: bool) -> bool {
    self.tx.send_if_modified(|current| {
      if current.is_online == online {
        return false;
      }
      info!(online, "Connectivity changed");
      current.is_online = online;
      true
    })
  }

  /// A pull-style handle. Its current status is available immediately.
  pub fn watch(&self) -> StatusWatcher {
    StatusWatcher {
      rx: self.tx.subscribe(),
    }
  }

  /// Call `on_change` with the current status right away, then after every change,
  /// until the returned [`Subscription`] is dropped.
  pub fn subscribe<F>(&self, mut on_change: F) -> Subscription
  where
    F: FnMut(&NetworkStatus) + Send + 'static,
  {
    let mut rx = self.tx.subscribe();
    let initial = rx.borrow_and_update().clone();
    on_change(&initial);

    let task = tokio::spawn(async move {
      while rx.changed().await.is_ok() {
        let status = rx.borrow_and_update().clone();
        on_change(&status);
      }
    });

    Subscription { task }
  }

  /// Live receivers, including watchers and subscriptions.
  pub fn subscriber_count(&self) -> usize {
    self.tx.receiver_count()
  }

  /// Probe `url` with a HEAD request every `interval` and publish the outcome. Any HTTP
  /// response counts as online; the measured latency fills in `rtt` and
  /// `effective_type`.
  pub fn spawn_probe(
    self: &Arc<Self>,
    client: reqwest::Client,
    url: Url,
    interval: Duration,
  ) -> ProbeHandle {
    let monitor: Weak<Self> = Arc::downgrade(self);
    let task = tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      loop {
        ticker.tick().await;
        let Some(monitor) = monitor.upgrade() else {
          break;
        };

        let started = Instant::now();
        let status = match client.head(url.clone()).timeout(interval).send().await {
          Ok(_) => {
            let rtt = started.elapsed().as_millis() as u64;
            NetworkStatus {
              rtt: Some(rtt),
              effective_type: Some(EffectiveType::from_rtt(rtt)),
              ..NetworkStatus::online()
            }
          }
          Err(e) => {
            debug!("Connectivity probe failed: {}", e);
            NetworkStatus::offline()
          }
        };
        monitor.report(status);
      }
    });
    ProbeHandle { task }
  }
}

impl Default for NetworkStatusMonitor {
  fn default() -> Self {
    Self::new(NetworkStatus::online())
  }
}

pub struct StatusWatcher {
  rx: watch::Receiver<NetworkStatus>,
}

impl StatusWatcher {
  pub fn current(&mut self) -> NetworkStatus {
    self.rx.borrow_and_update().clone()
  }

  /// Wait for the next change. `None` once the monitor is gone.
  pub async fn changed(&mut self) -> Option<NetworkStatus> {
    self.rx.changed().await.ok()?;
    Some(self.rx.borrow_and_update().clone())
  }
}

/// Keeps a [`NetworkStatusMonitor::subscribe`] callback alive. Dropping it unsubscribes.
pub struct Subscription {
  task: JoinHandle<()>,
}

impl Subscription {
  /// Stop delivering changes. Same as dropping the subscription.
  pub fn unsubscribe(self) {
    drop(self);
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.task.abort();
  }
}

/// Owns the probe task and aborts it on drop.
pub struct ProbeHandle {
  task: JoinHandle<()>,
}

impl Drop for ProbeHandle {
  fn drop(&mut self) {
    self.task.abort();
  }
}
