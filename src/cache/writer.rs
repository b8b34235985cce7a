//! Background queue for durable writes.
//!
//! Callers enqueue and return immediately. A single worker task drains the queue, retrying
//! each write a few times before logging it as dead-lettered. A full queue drops the write
//! at enqueue time, also logged.

use serde_json::Value;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, warn};

use crate::store::DocumentStore;

#[derive(Debug, Clone)]
pub struct WriterConfig {
  pub queue_capacity: usize,
  /// Attempts per write, including the first
  pub max_attempts: u32,
  /// Base delay between attempts, multiplied by the attempt number
  pub backoff: Duration,
  /// Bound on each individual store call
  pub timeout: Duration,
}

impl Default for WriterConfig {
  fn default() -> Self {
    Self {
      queue_capacity: 256,
      max_attempts: 3,
      backoff: Duration::from_millis(200),
      timeout: Duration::from_secs(5),
    }
  }
}

struct WriteJob {
  collection: String,
  id: String,
  record: Value,
}

#[derive(Default)]
struct WriterState {
  pending: AtomicUsize,
  written: AtomicU64,
  dead_lettered: AtomicU64,
  idle: Notify,
}

impl WriterState {
  fn finish_one(&self) {
    if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
      self.idle.notify_waiters();
    }
  }
}

/// Fire-and-forget durable writer.
pub struct DurableWriter {
  tx: mpsc::Sender<WriteJob>,
  state: Arc<WriterState>,
  worker: JoinHandle<()>,
}

impl DurableWriter {
  /// Start the worker. Must be called from within a tokio runtime.
  pub fn spawn<S>(store: Arc<S>, config: WriterConfig) -> Self
  where
    S: DocumentStore + ?Sized + 'static,
  {
    let (tx, mut rx) = mpsc::channel::<WriteJob>(config.queue_capacity.max(1));
    let state = Arc::new(WriterState::default());

    let worker_state = Arc::clone(&state);
    let worker = tokio::spawn(async move {
      while let Some(job) = rx.recv().await {
        if write_with_retry(store.as_ref(), &job, &config).await {
          worker_state.written.fetch_add(1, Ordering::Relaxed);
        } else {
          worker_state.dead_lettered.fetch_add(1, Ordering::Relaxed);
        }
        worker_state.finish_one();
      }
    });

    Self { tx, state, worker }
  }

  /// Queue a write without waiting. Returns false if the write was dropped.
  pub fn enqueue(&self, collection: &str, id: &str, record: Value) -> bool {
    let job = WriteJob {
      collection: collection.to_string(),
      id: id.to_string(),
      record,
    };

    self.state.pending.fetch_add(1, Ordering::SeqCst);
    match self.tx.try_send(job) {
      Ok(()) => true,
      Err(e) => {
        let reason = match e {
          mpsc::error::TrySendError::Full(_) => "queue full",
          mpsc::error::TrySendError::Closed(_) => "writer stopped",
        };
        error!(collection, id, reason, "Dead-lettered durable write");
        self.state.dead_lettered.fetch_add(1, Ordering::Relaxed);
        self.state.finish_one();
        false
      }
    }
  }

  /// Wait until every queued write has been written or dead-lettered.
  pub async fn flush(&self) {
    loop {
      let idle = self.state.idle.notified();
      if self.state.pending.load(Ordering::SeqCst) == 0 {
        return;
      }
      idle.await;
    }
  }

  pub fn written(&self) -> u64 {
    self.state.written.load(Ordering::Relaxed)
  }

  pub fn dead_lettered(&self) -> u64 {
    self.state.dead_lettered.load(Ordering::Relaxed)
  }

  /// Stop accepting writes, drain the queue and wait for the worker to exit.
  pub async fn shutdown(self) {
    let DurableWriter { tx, worker, .. } = self;
    drop(tx);
    if let Err(e) = worker.await {
      warn!("Durable writer worker ended abnormally: {}", e);
    }
  }
}

async fn write_with_retry<S>(store: &S, job: &WriteJob, config: &WriterConfig) -> bool
where
  S: DocumentStore + ?Sized,
{
  let attempts = config.max_attempts.max(1);

  for attempt in 1..=attempts {
    let result =
      tokio::time::timeout(config.timeout, store.set(&job.collection, &job.id, &job.record)).await;

    match result {
      Ok(Ok(())) => {
        debug!(collection = %job.collection, id = %job.id, attempt, "Durable write stored");
        return true;
      }
      Ok(Err(e)) => {
        warn!(collection = %job.collection, id = %job.id, attempt, "Durable write failed: {}", e);
      }
      Err(_) => {
        warn!(collection = %job.collection, id = %job.id, attempt, "Durable write timed out");
      }
    }

    if attempt < attempts {
      tokio::time::sleep(config.backoff * attempt).await;
    }
  }

  error!(
    collection = %job.collection,
    id = %job.id,
    attempts,
    "Dead-lettered durable write after exhausting retries"
  );
  false
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::MemoryDocumentStore;
  use serde_json::json;

  fn fast_config() -> WriterConfig {
    WriterConfig {
      backoff: Duration::from_millis(1),
      ..WriterConfig::default()
    }
  }

  #[tokio::test]
  async fn test_writes_reach_the_store() {
    let store = Arc::new(MemoryDocumentStore::new());
    let writer = DurableWriter::spawn(Arc::clone(&store), fast_config());

    assert!(writer.enqueue("c", "a", json!({"v": 1})));
    writer.flush().await;

    assert_eq!(store.get("c", "a").await.unwrap(), Some(json!({"v": 1})));
    assert_eq!(writer.written(), 1);
    assert_eq!(writer.dead_lettered(), 0);
  }

  #[tokio::test]
  async fn test_failed_write_is_retried_then_dead_lettered() {
    let store = Arc::new(MemoryDocumentStore::new());
    store.set_failing(true);
    let writer = DurableWriter::spawn(Arc::clone(&store), fast_config());

    writer.enqueue("c", "a", json!(1));
    writer.flush().await;

    assert_eq!(store.set_count(), 3);
    assert_eq!(writer.dead_lettered(), 1);
    assert_eq!(writer.written(), 0);
  }

  #[tokio::test]
  async fn test_shutdown_drains_queue() {
    let store = Arc::new(MemoryDocumentStore::new());
    let writer = DurableWriter::spawn(Arc::clone(&store), fast_config());

    for i in 0..10 {
      writer.enqueue("c", &i.to_string(), json!(i));
    }
    writer.shutdown().await;

    assert_eq!(store.len("c").await, 10);
  }

  #[tokio::test]
  async fn test_flush_with_nothing_queued_returns() {
    let store = Arc::new(MemoryDocumentStore::new());
    let writer = DurableWriter::spawn(store, fast_config());
    writer.flush().await;
  }

  #[tokio::test(start_paused = true)]
  async fn test_timed_out_write_is_dead_lettered() {
    let store = Arc::new(MemoryDocumentStore::new());
    store.set_latency(Duration::from_secs(10));
    let writer = DurableWriter::spawn(
      Arc::clone(&store),
      WriterConfig {
        max_attempts: 2,
        timeout: Duration::from_secs(1),
        ..fast_config()
      },
    );

    writer.enqueue("c", "a", json!(1));
    writer.flush().await;

    assert_eq!(store.set_count(), 2);
    assert_eq!(writer.dead_lettered(), 1);
    assert_eq!(writer.written(), 0);
    assert_eq!(store.len("c").await, 0);
  }

  #[tokio::test]
  async fn test_full_queue_dead_letters_without_blocking() {
    let store = Arc::new(MemoryDocumentStore::new());
    let writer = DurableWriter::spawn(
      Arc::clone(&store),
      WriterConfig {
        queue_capacity: 1,
        ..fast_config()
      },
    );

    // The worker has not run yet, so the single slot is still taken
    assert!(writer.enqueue("c", "a", json!(1)));
    assert!(!writer.enqueue("c", "b", json!(2)));
    assert_eq!(writer.dead_lettered(), 1);

    writer.flush().await;
    assert_eq!(writer.written(), 1);
    assert_eq!(store.len("c").await, 1);
  }
}
