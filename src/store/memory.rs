//! In-memory document store with call counters and failure injection.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tokio::time::Duration;

use super::{DocumentStore, Query};

/// `DocumentStore` kept entirely in process memory.
///
/// Counts every call so callers can assert how often the store was actually hit, and can
/// be switched into a failing or slow mode to exercise recovery paths.
#[derive(Default)]
pub struct MemoryDocumentStore {
  collections: RwLock<HashMap<String, BTreeMap<String, Value>>>,
  gets: AtomicUsize,
  sets: AtomicUsize,
  queries: AtomicUsize,
  failing: AtomicBool,
  latency_ms: AtomicU64,
}

impl MemoryDocumentStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Make every subsequent call fail (or succeed again).
  pub fn set_failing(&self, failing: bool) {
    self.failing.store(failing, Ordering::SeqCst);
  }

  /// Delay every subsequent call. Reads return what was stored when the call started;
  /// writes land after the delay.
  pub fn set_latency(&self, latency: Duration) {
    self
      .latency_ms
      .store(latency.as_millis() as u64, Ordering::SeqCst);
  }

  async fn simulate_latency(&self) {
    let ms = self.latency_ms.load(Ordering::SeqCst);
    if ms > 0 {
      tokio::time::sleep(Duration::from_millis(ms)).await;
    }
  }

  pub fn get_count(&self) -> usize {
    self.gets.load(Ordering::SeqCst)
  }

  pub fn set_count(&self) -> usize {
    self.sets.load(Ordering::SeqCst)
  }

  pub fn query_count(&self) -> usize {
    self.queries.load(Ordering::SeqCst)
  }

  /// Number of documents in a collection, without counting as a store call.
  pub async fn len(&self, collection: &str) -> usize {
    self
      .collections
      .read()
      .await
      .get(collection)
      .map_or(0, BTreeMap::len)
  }

  fn check_available(&self) -> Result<()> {
    if self.failing.load(Ordering::SeqCst) {
      return Err(eyre!("Document store unavailable"));
    }
    Ok(())
  }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
  async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
    self.gets.fetch_add(1, Ordering::SeqCst);
    self.check_available()?;

    let doc = {
      let collections = self.collections.read().await;
      collections.get(collection).and_then(|c| c.get(id)).cloned()
    };
    self.simulate_latency().await;
    Ok(doc)
  }

  async fn set(&self, collection: &str, id: &str, record: &Value) -> Result<()> {
    self.sets.fetch_add(1, Ordering::SeqCst);
    self.check_available()?;
    self.simulate_latency().await;

    let mut collections = self.collections.write().await;
    collections
      .entry(collection.to_string())
      .or_default()
      .insert(id.to_string(), record.clone());
    Ok(())
  }

  async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Value>> {
    self.queries.fetch_add(1, Ordering::SeqCst);
    self.check_available()?;

    let docs = {
      let collections = self.collections.read().await;
      collections
        .get(collection)
        .map(|c| c.values().cloned().collect::<Vec<_>>())
        .unwrap_or_default()
    };
    self.simulate_latency().await;
    Ok(query.apply(docs))
  }
}
