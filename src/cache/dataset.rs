//! Single-tier TTL cache for bulk dataset snapshots.
//!
//! Shields the durable store from repeated broad scans: a snapshot is loaded once per TTL
//! window and every filtered request in that window works from the same `Arc`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::debug;

use super::entry::CacheEntry;

/// Stored snapshot: the ordered items plus their expiry.
pub type DatasetCacheRecord<T> = CacheEntry<Arc<Vec<T>>>;

pub const DEFAULT_DATASET_TTL: Duration = Duration::from_secs(5 * 60);

pub struct DatasetCache<T> {
  entries: Mutex<HashMap<String, DatasetCacheRecord<T>>>,
  default_ttl: Duration,
  /// Serialises loads in `get_or_load` so one expiry triggers one reload
  loading: tokio::sync::Mutex<()>,
}

impl<T: Send + Sync + 'static> DatasetCache<T> {
  pub fn new(default_ttl: Duration) -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
      default_ttl,
      loading: tokio::sync::Mutex::new(()),
    }
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<String, DatasetCacheRecord<T>>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// The snapshot for `key` if present and unexpired.
  pub fn get(&self, key: &str) -> Option<Arc<Vec<T>>> {
    let mut entries = self.lock();
    match entries.get(key) {
      Some(entry) if !entry.is_expired() => Some(Arc::clone(&entry.value)),
      Some(_) => {
        debug!(key, "Dataset snapshot expired");
        entries.remove(key);
        None
      }
      None => None,
    }
  }

  /// Replace the snapshot for `key`. `ttl` defaults to the cache's TTL.
  pub fn set(&self, key: &str, items: Vec<T>, ttl: Option<Duration>) -> Arc<Vec<T>> {
    let items = Arc::new(items);
    let entry = CacheEntry::new(Arc::clone(&items), ttl.unwrap_or(self.default_ttl));
    self.lock().insert(key.to_string(), entry);
    items
  }

  pub fn del(&self, key: &str) -> bool {
    self.lock().remove(key).is_some()
  }

  /// Drop every snapshot.
  pub fn flush(&self) {
    self.lock().clear();
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn purge_expired(&self) -> usize {
    let now = Instant::now();
    let mut entries = self.lock();
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_expired_at(now));
    before - entries.len()
  }

  /// Return the cached snapshot or run `loader` and cache what it returns.
  ///
  /// Loader errors are returned as-is and nothing is cached.
  pub async fn get_or_load<F, Fut, E>(&self, key: &str, loader: F) -> Result<Arc<Vec<T>>, E>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<T>, E>>,
  {
    if let Some(items) = self.get(key) {
      return Ok(items);
    }

    let _loading = self.loading.lock().await;
    if let Some(items) = self.get(key) {
      return Ok(items);
    }

    let items = loader().await?;
    debug!(key, count = items.len(), "Loaded dataset snapshot");
    Ok(self.set(key, items, None))
  }

  /// Periodically drop expired snapshots. Stops when the handle is dropped or the cache
  /// itself is gone.
  pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
    let cache: Weak<Self> = Arc::downgrade(self);
    let task = tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.tick().await;
      loop {
        ticker.tick().await;
        let Some(cache) = cache.upgrade() else {
          break;
        };
        let removed = cache.purge_expired();
        if removed > 0 {
          debug!(removed, "Swept expired dataset snapshots");
        }
      }
    });
    SweeperHandle { task }
  }
}

/// Owns the sweeper task and aborts it on drop.
pub struct SweeperHandle {
  task: JoinHandle<()>,
}

impl Drop for SweeperHandle {
  fn drop(&mut self) {
    self.task.abort();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  #[tokio::test]
  async fn test_repeated_get_returns_same_snapshot() {
    let cache = DatasetCache::new(DEFAULT_DATASET_TTL);
    let stored = cache.set("all_raw", (0..100).collect::<Vec<u32>>(), None);

    let a = cache.get("all_raw").unwrap();
    let b = cache.get("all_raw").unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert!(Arc::ptr_eq(&a, &stored));
    assert_eq!(a.len(), 100);
  }

  #[tokio::test(start_paused = true)]
  async fn test_expires_after_ttl() {
    let cache = DatasetCache::new(Duration::from_secs(300));
    cache.set("all_raw", vec![1, 2, 3], None);
    cache.set("short", vec![4], Some(Duration::from_secs(10)));

    tokio::time::advance(Duration::from_secs(10)).await;
    assert!(cache.get("short").is_none());
    assert!(cache.get("all_raw").is_some());

    tokio::time::advance(Duration::from_secs(290)).await;
    assert!(cache.get("all_raw").is_none());
    assert!(cache.is_empty());
  }

  #[tokio::test]
  async fn test_del_and_flush() {
    let cache = DatasetCache::new(DEFAULT_DATASET_TTL);
    cache.set("a", vec![1], None);
    cache.set("b", vec![2], None);

    assert!(cache.del("a"));
    assert!(!cache.del("a"));
    assert_eq!(cache.len(), 1);

    cache.flush();
    assert!(cache.get("b").is_none());
  }

  #[tokio::test(start_paused = true)]
  async fn test_get_or_load_loads_once_per_window() {
    let cache = DatasetCache::new(Duration::from_secs(300));
    let loads = AtomicUsize::new(0);
    let loader = || async {
      loads.fetch_add(1, Ordering::SeqCst);
      Ok::<_, String>(vec![1, 2, 3])
    };

    cache.get_or_load("all_raw", loader).await.unwrap();
    cache.get_or_load("all_raw", loader).await.unwrap();
    assert_eq!(loads.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(300)).await;
    cache.get_or_load("all_raw", loader).await.unwrap();
    assert_eq!(loads.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_concurrent_loads_share_one_query() {
    let cache = DatasetCache::new(DEFAULT_DATASET_TTL);
    let loads = AtomicUsize::new(0);

    let requests = (0..5).map(|_| {
      cache.get_or_load("all_raw", || async {
        loads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok::<_, String>(vec![1])
      })
    });
    let results = futures::future::join_all(requests).await;

    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert!(results.iter().all(|r| r.is_ok()));
  }

  #[tokio::test]
  async fn test_loader_error_is_not_cached() {
    let cache: DatasetCache<u32> = DatasetCache::new(DEFAULT_DATASET_TTL);
    let result = cache
      .get_or_load("all_raw", || async { Err("store down") })
      .await;
    assert_eq!(result.unwrap_err(), "store down");
    assert!(cache.is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_sweeper_removes_expired() {
    let cache = Arc::new(DatasetCache::new(Duration::from_secs(5)));
    cache.set("a", vec![1], None);
    let _sweeper = cache.spawn_sweeper(Duration::from_secs(10));

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(cache.len(), 0);
  }
}
