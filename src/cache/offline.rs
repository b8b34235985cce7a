//! Offline-aware detail cache.
//!
//! Sits between detail views and the network. While online it goes network-first and
//! mirrors every successful fetch locally; while offline (or when the network fails) it
//! serves the local mirror, flagging records older than the stale threshold.

use chrono::Utc;
use std::marker::PhantomData;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use super::computation::to_chrono;
use super::storage::{CacheStats, CachedEntity, LocalStore};
use super::traits::{Cacheable, DataSource, DetailFetcher, FetchOptions, FetchResult};
use crate::error::FetchError;
use crate::network::{NetworkStatus, NetworkStatusMonitor, Subscription};

#[derive(Debug, Clone)]
pub struct OfflineConfig {
  /// Records older than this are served but flagged stale
  pub stale_threshold: Duration,
  /// `cleanup` deletes records older than this
  pub max_retention: Duration,
  /// Period of the background stats refresh
  pub refresh_interval: Duration,
  /// Bound on each network fetch
  pub fetch_timeout: Duration,
}

impl Default for OfflineConfig {
  fn default() -> Self {
    Self {
      stale_threshold: Duration::from_secs(24 * 60 * 60),
      max_retention: Duration::from_secs(30 * 24 * 60 * 60),
      refresh_interval: Duration::from_secs(5 * 60),
      fetch_timeout: Duration::from_secs(10),
    }
  }
}

/// Network-status-aware mirror of detail entities.
pub struct OfflineDataCache<T, F, S> {
  fetcher: F,
  storage: Arc<S>,
  network: Arc<NetworkStatusMonitor>,
  config: OfflineConfig,
  source: watch::Sender<DataSource>,
  /// Id of the most recent fetch, used to re-evaluate the source on connectivity changes
  current_id: RwLock<Option<String>>,
  last_stats: RwLock<Option<CacheStats>>,
  _entity: PhantomData<fn() -> T>,
}

impl<T, F, S> OfflineDataCache<T, F, S>
where
  T: Cacheable,
  F: DetailFetcher<T> + 'static,
  S: LocalStore + 'static,
{
  pub fn new(
    fetcher: F,
    storage: Arc<S>,
    network: Arc<NetworkStatusMonitor>,
    config: OfflineConfig,
  ) -> Self {
    let (source, _rx) = watch::channel(DataSource::Unknown);
    Self {
      fetcher,
      storage,
      network,
      config,
      source,
      current_id: RwLock::new(None),
      last_stats: RwLock::new(None),
      _entity: PhantomData,
    }
  }

  /// Fetch `id`, choosing network-first or cache-first from the connectivity status.
  ///
  /// 1. `force_refresh` always tries the network
  /// 2. Online: network first, local record on failure
  /// 3. Offline: local record only
  ///
  /// Errors only when no tier has the data.
  pub async fn fetch_with_cache(
    &self,
    id: &str,
    options: FetchOptions,
  ) -> Result<FetchResult<T>, FetchError> {
    self.set_current_id(id);
    let online = self.network.is_online();

    if options.force_refresh || online {
      match self.fetch_remote(id).await {
        Ok(entity) => {
          if let Err(e) = self.storage.store_entity(&entity) {
            warn!(id, "Failed to mirror entity locally: {}", e);
          }
          let result = FetchResult::from_network(entity);
          self.publish_source(result.source());
          return Ok(result);
        }
        Err(reason) => {
          warn!(id, online, "Network fetch failed, falling back to local mirror: {}", reason);
          return match self.load_local(id) {
            Some(cached) => Ok(self.serve_cached(cached)),
            None => {
              self.publish_source(DataSource::Unknown);
              Err(FetchError::Unavailable {
                id: id.to_string(),
                reason,
              })
            }
          };
        }
      }
    }

    debug!(id, "Offline, serving local mirror");
    match self.load_local(id) {
      Some(cached) => Ok(self.serve_cached(cached)),
      None => {
        self.publish_source(DataSource::Unknown);
        Err(FetchError::NotCached { id: id.to_string() })
      }
    }
  }

  async fn fetch_remote(&self, id: &str) -> Result<T, String> {
    match tokio::time::timeout(self.config.fetch_timeout, self.fetcher.fetch(id)).await {
      Ok(Ok(entity)) => Ok(entity),
      Ok(Err(e)) => Err(e.to_string()),
      Err(_) => Err(format!(
        "timed out after {}ms",
        self.config.fetch_timeout.as_millis()
      )),
    }
  }

  fn load_local(&self, id: &str) -> Option<CachedEntity<T>> {
    match self.storage.get_entity::<T>(id) {
      Ok(cached) => cached,
      Err(e) => {
        warn!(id, "Failed to read local mirror: {}", e);
        None
      }
    }
  }

  fn serve_cached(&self, cached: CachedEntity<T>) -> FetchResult<T> {
    let is_stale = self.is_stale(&cached);
    let result = FetchResult::from_cache(cached.entity, cached.cached_at, is_stale);
    self.publish_source(result.source());
    result
  }

  fn is_stale(&self, cached: &CachedEntity<T>) -> bool {
    cached.is_stale(to_chrono(self.config.stale_threshold), Utc::now())
  }

  fn set_current_id(&self, id: &str) {
    let mut current = self
      .current_id
      .write()
      .unwrap_or_else(PoisonError::into_inner);
    *current = Some(id.to_string());
  }

  fn publish_source(&self, source: DataSource) {
    self.source.send_if_modified(|current| {
      if *current == source {
        return false;
      }
      debug!(from = ?*current, to = ?source, "Data source changed");
      *current = source;
      true
    });
  }

  /// Current data-source state.
  pub fn data_source(&self) -> DataSource {
    *self.source.borrow()
  }

  /// Receiver for data-source changes, e.g. to drive an "offline" badge.
  pub fn watch_source(&self) -> watch::Receiver<DataSource> {
    self.source.subscribe()
  }

  /// Re-evaluate the data source after a connectivity change.
  ///
  /// Going offline switches to the local record of the current entity if there is one,
  /// otherwise to `Unknown`. Coming online keeps the current state until the next fetch.
  pub fn reevaluate(&self, status: &NetworkStatus) {
    if status.is_online {
      return;
    }

    let current = self
      .current_id
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone();

    let source = match current.as_deref().and_then(|id| self.load_local(id)) {
      Some(cached) if self.is_stale(&cached) => DataSource::StaleCache,
      Some(_) => DataSource::Cache,
      None => DataSource::Unknown,
    };
    self.publish_source(source);
  }

  /// Enumerate the local mirror. On failure the last known stats are returned.
  pub fn get_stats(&self) -> CacheStats {
    match self.storage.stats() {
      Ok(stats) => {
        *self
          .last_stats
          .write()
          .unwrap_or_else(PoisonError::into_inner) = Some(stats.clone());
        stats
      }
      Err(e) => {
        warn!("Failed to compute cache stats: {}", e);
        self.last_stats().unwrap_or_default()
      }
    }
  }

  /// Stats from the most recent successful refresh.
  pub fn last_stats(&self) -> Option<CacheStats> {
    self
      .last_stats
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  /// Delete records older than the retention window. Returns how many were removed.
  pub fn cleanup(&self) -> usize {
    let retention = to_chrono(self.config.max_retention);
    let Some(cutoff) = Utc::now().checked_sub_signed(retention) else {
      debug!("Retention window reaches past the earliest timestamp, nothing to remove");
      return 0;
    };
    match self.storage.delete_older_than(cutoff) {
      Ok(removed) => {
        if removed > 0 {
          info!(removed, "Removed expired offline records");
        }
        removed
      }
      Err(e) => {
        warn!("Offline cache cleanup failed: {}", e);
        0
      }
    }
  }

  /// Delete every local record. Returns how many were removed.
  pub fn clear_all(&self) -> usize {
    let removed = match self.storage.clear() {
      Ok(removed) => removed,
      Err(e) => {
        warn!("Failed to clear offline cache: {}", e);
        0
      }
    };
    *self
      .last_stats
      .write()
      .unwrap_or_else(PoisonError::into_inner) = None;
    self.publish_source(DataSource::Unknown);
    removed
  }

  /// Fetch and mirror several ids concurrently. Returns how many were stored.
  /// Does nothing while offline.
  pub async fn prefetch(&self, ids: &[String]) -> usize {
    if !self.network.is_online() {
      debug!(count = ids.len(), "Offline, skipping prefetch");
      return 0;
    }

    let fetches = ids.iter().map(|id| async move {
      match self.fetch_remote(id).await {
        Ok(entity) => match self.storage.store_entity(&entity) {
          Ok(()) => true,
          Err(e) => {
            warn!(%id, "Failed to mirror prefetched entity: {}", e);
            false
          }
        },
        Err(reason) => {
          debug!(%id, "Prefetch failed: {}", reason);
          false
        }
      }
    });

    futures::future::join_all(fetches)
      .await
      .into_iter()
      .filter(|stored| *stored)
      .count()
  }

  /// Refresh stats once now and then every `refresh_interval`, off the caller's path.
  pub fn spawn_background_refresh(self: &Arc<Self>) -> RefreshHandle {
    let cache: Weak<Self> = Arc::downgrade(self);
    let interval = self.config.refresh_interval;

    let task = tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      loop {
        ticker.tick().await;
        let Some(cache) = cache.upgrade() else {
          break;
        };
        // SQLite access blocks, keep it off the async workers
        match tokio::task::spawn_blocking(move || cache.get_stats()).await {
          Ok(stats) => debug!(entries = stats.total_entries, "Refreshed offline cache stats"),
          Err(e) => warn!("Offline stats refresh task failed: {}", e),
        }
      }
    });

    RefreshHandle { task }
  }

  /// Re-evaluate the data source on every connectivity change.
  pub fn follow_connectivity(self: &Arc<Self>) -> Subscription {
    let cache: Weak<Self> = Arc::downgrade(self);
    self.network.subscribe(move |status| {
      if let Some(cache) = cache.upgrade() {
        cache.reevaluate(status);
      }
    })
  }
}

/// Owns the background refresh task and aborts it on drop.
pub struct RefreshHandle {
  task: JoinHandle<()>,
}

impl Drop for RefreshHandle {
  fn drop(&mut self) {
    self.task.abort();
  }
}
