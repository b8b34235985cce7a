//! Request counters for the cache-consulting operations.
//!
//! Shared across `ComputationCache` consumers and `DistrictSearch`; holds no cache state.
//! Nothing is persisted, counters start from zero with the process.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{Duration, Instant};

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
  pub total_requests: u64,
  pub cache_hits: u64,
  pub errors: u64,
  pub avg_latency_ms: f64,
}

impl MetricsSnapshot {
  /// Hit rate as a percentage (0.0 to 100.0)
  pub fn hit_rate(&self) -> f64 {
    if self.total_requests == 0 {
      0.0
    } else {
      (self.cache_hits as f64 / self.total_requests as f64) * 100.0
    }
  }
}

#[derive(Debug, Default)]
struct Counters {
  total_requests: AtomicU64,
  cache_hits: AtomicU64,
  errors: AtomicU64,
  total_latency_us: AtomicU64,
}

/// Thread-safe, cheaply cloneable request recorder.
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorder {
  counters: Arc<Counters>,
}

impl MetricsRecorder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Record one completed request.
  pub fn record(&self, hit: bool, latency: Duration) {
    let c = &self.counters;
    c.total_requests.fetch_add(1, Ordering::Relaxed);
    if hit {
      c.cache_hits.fetch_add(1, Ordering::Relaxed);
    }
    c.total_latency_us
      .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
  }

  /// Record one failed request. Counts towards the total and the average latency.
  pub fn record_error(&self, latency: Duration) {
    let c = &self.counters;
    c.total_requests.fetch_add(1, Ordering::Relaxed);
    c.errors.fetch_add(1, Ordering::Relaxed);
    c.total_latency_us
      .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
  }

  /// Start timing a request; finish it with `hit`, `miss` or `error`.
  pub fn start(&self) -> RequestTimer {
    RequestTimer {
      recorder: self.clone(),
      started: Instant::now(),
    }
  }

  pub fn snapshot(&self) -> MetricsSnapshot {
    let c = &self.counters;
    let total_requests = c.total_requests.load(Ordering::Relaxed);
    let total_latency_us = c.total_latency_us.load(Ordering::Relaxed);

    let avg_latency_ms = if total_requests > 0 {
      total_latency_us as f64 / total_requests as f64 / 1000.0
    } else {
      0.0
    };

    MetricsSnapshot {
      total_requests,
      cache_hits: c.cache_hits.load(Ordering::Relaxed),
      errors: c.errors.load(Ordering::Relaxed),
      avg_latency_ms,
    }
  }
}

/// In-flight request measurement.
#[must_use = "finish the timer with hit(), miss() or error()"]
pub struct RequestTimer {
  recorder: MetricsRecorder,
  started: Instant,
}

impl RequestTimer {
  pub fn hit(self) {
    self.recorder.record(true, self.started.elapsed());
  }

  pub fn miss(self) {
    self.recorder.record(false, self.started.elapsed());
  }

  pub fn error(self) {
    self.recorder.record_error(self.started.elapsed());
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_snapshot() {
    let snapshot = MetricsRecorder::new().snapshot();
    assert_eq!(snapshot.total_requests, 0);
    assert_eq!(snapshot.avg_latency_ms, 0.0);
    assert_eq!(snapshot.hit_rate(), 0.0);
  }

  #[test]
  fn test_running_average() {
    let metrics = MetricsRecorder::new();
    metrics.record(true, Duration::from_millis(10));
    metrics.record(false, Duration::from_millis(30));
    metrics.record_error(Duration::from_millis(20));

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.total_requests, 3);
    assert_eq!(snapshot.cache_hits, 1);
    assert_eq!(snapshot.errors, 1);
    assert!((snapshot.avg_latency_ms - 20.0).abs() < 1e-9);
  }

  #[tokio::test(start_paused = true)]
  async fn test_timer_measures_elapsed() {
    let metrics = MetricsRecorder::new();
    let timer = metrics.start();
    tokio::time::advance(Duration::from_millis(40)).await;
    timer.hit();

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.cache_hits, 1);
    assert!((snapshot.avg_latency_ms - 40.0).abs() < 1e-9);
  }

  #[test]
  fn test_clones_share_counters() {
    let metrics = MetricsRecorder::new();
    metrics.clone().record(true, Duration::ZERO);
    assert_eq!(metrics.snapshot().total_requests, 1);
  }

  #[test]
  fn test_snapshot_serializes_camel_case() {
    let json = serde_json::to_value(MetricsRecorder::new().snapshot()).unwrap();
    assert!(json.get("totalRequests").is_some());
    assert!(json.get("avgLatencyMs").is_some());
  }
}
