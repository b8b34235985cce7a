//! Two-tier cache for computation results.
//!
//! L1 is a [`VolatileMemo`] with a short TTL; L2 is a [`DurableCacheRecord`] in the
//! document store with a much longer freshness window. The two windows are independent: a
//! value can be expired in L1 and still fresh in L2, in which case an L2 hit hydrates L1
//! again with a full L1 TTL.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::Duration;
use tracing::{debug, warn};

use super::memo::VolatileMemo;
use super::writer::{DurableWriter, WriterConfig};
use crate::store::DocumentStore;

/// Collection holding L2 records.
pub const DURABLE_COLLECTION: &str = "computation_cache";

/// Deterministic key for one `(subject, param1, param2)` input tuple.
///
/// Formatted as `subject:param1:param2`. Numbers use the shortest round-trip
/// representation, and since they never contain `:` the last two segments are always the
/// parameters, so distinct tuples cannot produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComputationKey(String);

impl ComputationKey {
  pub fn new(subject_id: &str, param1: f64, param2: f64) -> Self {
    Self(format!("{}:{}:{}", subject_id, param1, param2))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for ComputationKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Persisted L2 record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DurableCacheRecord<R> {
  pub result: R,
  pub written_at: DateTime<Utc>,
  pub id: String,
}

impl<R> DurableCacheRecord<R> {
  /// Fresh while `now - written_at < ttl`.
  pub fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
    now - self.written_at < to_chrono(ttl)
  }
}

pub(crate) fn to_chrono(d: Duration) -> chrono::Duration {
  chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

/// Which tier answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
  Memory,
  Durable,
  /// Produced by the compute function on a full miss
  Computed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue<R> {
  pub value: R,
  pub source: ResultSource,
}

#[derive(Debug, Clone)]
pub struct ComputationConfig {
  pub l1_ttl: Duration,
  pub l1_capacity: usize,
  pub l2_ttl: Duration,
  /// Bound on each durable read
  pub store_timeout: Duration,
  pub writer: WriterConfig,
}

impl Default for ComputationConfig {
  fn default() -> Self {
    Self {
      l1_ttl: Duration::from_secs(5 * 60),
      l1_capacity: 1000,
      l2_ttl: Duration::from_secs(24 * 60 * 60),
      store_timeout: Duration::from_secs(5),
      writer: WriterConfig::default(),
    }
  }
}

/// Memory + durable cache for results of the external compute function.
///
/// Concurrent misses through [`ComputationCache::get_or_compute`] are de-duplicated per
/// key. Plain [`get`](Self::get) / [`set`](Self::set) leave coordination to the caller.
pub struct ComputationCache<R, S: ?Sized> {
  memo: VolatileMemo<R>,
  store: Arc<S>,
  writer: DurableWriter,
  in_flight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
  config: ComputationConfig,
}

impl<R, S> ComputationCache<R, S>
where
  R: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
  S: DocumentStore + ?Sized + 'static,
{
  /// Create the cache and start its durable writer. Requires a tokio runtime.
  pub fn new(store: Arc<S>, config: ComputationConfig) -> Self {
    let writer = DurableWriter::spawn(Arc::clone(&store), config.writer.clone());
    Self {
      memo: VolatileMemo::new(config.l1_capacity, config.l1_ttl),
      store,
      writer,
      in_flight: Mutex::new(HashMap::new()),
      config,
    }
  }

  pub fn config(&self) -> &ComputationConfig {
    &self.config
  }

  /// Look the key up in L1, then L2. `None` is a miss in both tiers.
  ///
  /// Durable read failures and timeouts are logged and reported as a miss.
  pub async fn get(&self, key: &ComputationKey) -> Option<CachedValue<R>> {
    if let Some(value) = self.memo.get(key.as_str()) {
      debug!(%key, "Computation cache hit (memory)");
      return Some(CachedValue {
        value,
        source: ResultSource::Memory,
      });
    }

    let generation = self.memo.generation();
    let record = self.read_durable(key).await?;
    if !record.is_fresh(self.config.l2_ttl, Utc::now()) {
      debug!(%key, written_at = %record.written_at, "Durable record too old");
      return None;
    }

    // A set that landed during the read is newer than the durable record
    if self
      .memo
      .insert_if_unchanged(key.as_str(), record.result.clone(), generation)
    {
      debug!(%key, "Computation cache hit (durable), hydrated memory");
    } else {
      debug!(%key, "Computation cache hit (durable), memory already newer");
    }
    Some(CachedValue {
      value: record.result,
      source: ResultSource::Durable,
    })
  }

  async fn read_durable(&self, key: &ComputationKey) -> Option<DurableCacheRecord<R>> {
    let read = tokio::time::timeout(
      self.config.store_timeout,
      self.store.get(DURABLE_COLLECTION, key.as_str()),
    )
    .await;

    let doc = match read {
      Ok(Ok(doc)) => doc?,
      Ok(Err(e)) => {
        warn!(%key, "Durable read failed, treating as miss: {}", e);
        return None;
      }
      Err(_) => {
        warn!(%key, "Durable read timed out, treating as miss");
        return None;
      }
    };

    match serde_json::from_value(doc) {
      Ok(record) => Some(record),
      Err(e) => {
        warn!(%key, "Unreadable durable record, treating as miss: {}", e);
        None
      }
    }
  }

  /// Store a value. L1 is written before returning; L2 is queued for the background
  /// writer and its failure never reaches the caller.
  pub fn set(&self, key: &ComputationKey, value: R) {
    if let Some(evicted) = self.memo.insert(key.as_str(), value.clone()) {
      debug!(%key, %evicted, "Evicted oldest memory entry");
    }

    let record = DurableCacheRecord {
      result: value,
      written_at: Utc::now(),
      id: key.as_str().to_string(),
    };

    match serde_json::to_value(&record) {
      Ok(doc) => {
        self.writer.enqueue(DURABLE_COLLECTION, key.as_str(), doc);
      }
      Err(e) => warn!(%key, "Failed to serialize durable record: {}", e),
    }
  }

  /// Return the cached value or run `compute` once for all concurrent callers of the
  /// same key and cache its result. Errors from `compute` are returned and not cached.
  pub async fn get_or_compute<F, Fut, E>(
    &self,
    key: &ComputationKey,
    compute: F,
  ) -> Result<CachedValue<R>, E>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<R, E>>,
  {
    if let Some(hit) = self.get(key).await {
      return Ok(hit);
    }

    let gate = self.gate(key);
    let result = {
      let _guard = gate.lock().await;

      // Whoever held the gate before us may already have filled the cache
      match self.get(key).await {
        Some(hit) => Ok(hit),
        None => {
          debug!(%key, "Computation cache miss, computing");
          match compute().await {
            Ok(value) => {
              self.set(key, value.clone());
              Ok(CachedValue {
                value,
                source: ResultSource::Computed,
              })
            }
            Err(e) => Err(e),
          }
        }
      }
    };

    self.release_gate(key, &gate);
    result
  }

  fn gate(&self, key: &ComputationKey) -> Arc<tokio::sync::Mutex<()>> {
    let mut in_flight = self
      .in_flight
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    Arc::clone(in_flight.entry(key.as_str().to_string()).or_default())
  }

  fn release_gate(&self, key: &ComputationKey, gate: &Arc<tokio::sync::Mutex<()>>) {
    let mut in_flight = self
      .in_flight
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    // One reference in the map plus ours means nobody else is waiting
    if Arc::strong_count(gate) <= 2 {
      in_flight.remove(key.as_str());
    }
  }

  /// Drop the memory entry for `key`. The durable record is left alone.
  pub fn invalidate(&self, key: &ComputationKey) -> bool {
    self.memo.remove(key.as_str())
  }

  pub fn memory_len(&self) -> usize {
    self.memo.len()
  }

  /// Sweep expired memory entries.
  pub fn purge_expired(&self) -> usize {
    self.memo.purge_expired()
  }

  /// Wait for queued durable writes to finish.
  pub async fn flush(&self) {
    self.writer.flush().await;
  }

  pub fn dead_lettered_writes(&self) -> u64 {
    self.writer.dead_lettered()
  }

  /// Drain pending durable writes and stop the writer.
  pub async fn shutdown(self) {
    self.writer.shutdown().await;
  }

  #[cfg(test)]
  fn in_flight_len(&self) -> usize {
    self
      .in_flight
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .len()
  }
}
