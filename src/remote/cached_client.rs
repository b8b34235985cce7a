//! Client that wires the remote service through every cache.

use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{
  CacheStats, CachedValue, ComputationCache, ComputationKey, DataSource, FetchOptions,
  FetchResult, OfflineDataCache, RefreshHandle, ResultSource, SqliteStorage, SweeperHandle,
};
use crate::config::Config;
use crate::error::FetchError;
use crate::metrics::{MetricsRecorder, MetricsSnapshot};
use crate::network::{NetworkStatus, NetworkStatusMonitor, ProbeHandle, Subscription};
use crate::search::{DistrictSearch, SearchFilter};
use crate::store::{DocumentStore, SqliteDocumentStore};

use super::client::RemoteClient;
use super::types::{DistrictDetail, DistrictSummary, OxygenMetrics};

type DetailCache = OfflineDataCache<DistrictDetail, RemoteClient, SqliteStorage>;

/// Snapshot printed by the `health` command.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
  pub metrics: MetricsSnapshot,
  pub hit_rate: f64,
  pub network: NetworkStatus,
  pub data_source: DataSource,
  pub offline_stats: Option<CacheStats>,
  pub memory_entries: usize,
  pub dead_lettered_writes: u64,
}

/// Remote client with transparent caching.
///
/// - metrics: two-tier computation cache with single-flight misses
/// - search: one dataset snapshot per TTL window, filtered in memory
/// - detail: offline-aware mirror, network-first while online
pub struct CachedEnvClient {
  remote: RemoteClient,
  computations: ComputationCache<OxygenMetrics, dyn DocumentStore>,
  search: DistrictSearch<dyn DocumentStore>,
  details: Arc<DetailCache>,
  network: Arc<NetworkStatusMonitor>,
  metrics: MetricsRecorder,
  _refresh: RefreshHandle,
  _connectivity: Subscription,
  _sweeper: SweeperHandle,
  _probe: Option<ProbeHandle>,
}

impl CachedEnvClient {
  /// Open the SQLite files under the configured data dir and start background tasks.
  pub fn open(config: &Config) -> Result<Self> {
    let data_dir = config.data_dir()?;
    std::fs::create_dir_all(&data_dir)
      .map_err(|e| eyre!("Failed to create data directory {}: {}", data_dir.display(), e))?;

    let store = SqliteDocumentStore::open(&SqliteDocumentStore::default_path(&data_dir))?;
    let storage = SqliteStorage::open(&SqliteStorage::default_path(&data_dir))?;
    info!(data_dir = %data_dir.display(), "Opened cache storage");

    let client = Self::new(
      config,
      Arc::new(store),
      Arc::new(storage),
      Arc::new(NetworkStatusMonitor::default()),
    )?;
    Ok(client.with_probe(config))
  }

  /// Build from explicit collaborators. Requires a tokio runtime.
  pub fn new(
    config: &Config,
    store: Arc<dyn DocumentStore>,
    storage: Arc<SqliteStorage>,
    network: Arc<NetworkStatusMonitor>,
  ) -> Result<Self> {
    let remote = RemoteClient::new(&config.api)?;
    let metrics = MetricsRecorder::new();

    let computations = ComputationCache::new(Arc::clone(&store), config.computation_config());
    let search = DistrictSearch::new(
      store,
      config.dataset_ttl(),
      config.cache.dataset_page_limit,
      config.store_timeout(),
      metrics.clone(),
    );
    let details = Arc::new(OfflineDataCache::new(
      remote.clone(),
      storage,
      Arc::clone(&network),
      config.offline_config(),
    ));

    let _refresh = details.spawn_background_refresh();
    let _connectivity = details.follow_connectivity();
    let _sweeper = search.spawn_sweeper(config.dataset_ttl());

    Ok(Self {
      remote,
      computations,
      search,
      details,
      network,
      metrics,
      _refresh,
      _connectivity,
      _sweeper,
      _probe: None,
    })
  }

  fn with_probe(mut self, config: &Config) -> Self {
    if let Some(interval) = config.probe_interval() {
      self._probe = Some(self.network.spawn_probe(
        self.remote.http().clone(),
        self.remote.base_url().clone(),
        interval,
      ));
    }
    self
  }

  pub fn network(&self) -> &Arc<NetworkStatusMonitor> {
    &self.network
  }

  pub fn computations(&self) -> &ComputationCache<OxygenMetrics, dyn DocumentStore> {
    &self.computations
  }

  pub fn metrics(&self) -> &MetricsRecorder {
    &self.metrics
  }

  /// Oxygen metrics for a district and parameter pair, computed remotely only on a full miss.
  pub async fn metric(
    &self,
    district: &str,
    param1: f64,
    param2: f64,
  ) -> Result<CachedValue<OxygenMetrics>> {
    let key = ComputationKey::new(district, param1, param2);
    let timer = self.metrics.start();

    let result = self
      .computations
      .get_or_compute(&key, || self.remote.compute(district, param1, param2))
      .await;

    match &result {
      Ok(cached) if cached.source == ResultSource::Computed => timer.miss(),
      Ok(cached) => {
        debug!(%key, source = ?cached.source, "Metric served from cache");
        timer.hit()
      }
      Err(_) => timer.error(),
    }
    result
  }

  /// District detail, network-first while online and served locally otherwise.
  pub async fn detail(
    &self,
    slug: &str,
    force_refresh: bool,
  ) -> Result<FetchResult<DistrictDetail>, FetchError> {
    let options = FetchOptions { force_refresh };
    let timer = self.metrics.start();

    let result = self.details.fetch_with_cache(slug, options).await;
    match &result {
      Ok(fetched) if fetched.metadata.from_cache => timer.hit(),
      Ok(_) => timer.miss(),
      Err(_) => timer.error(),
    }
    result
  }

  pub fn data_source(&self) -> DataSource {
    self.details.data_source()
  }

  pub async fn search(&self, filter: &SearchFilter) -> Result<Vec<DistrictSummary>> {
    self.search.search(filter).await
  }

  /// Warm the offline mirror for several districts. Returns how many were stored.
  pub async fn prefetch(&self, slugs: &[String]) -> usize {
    self.details.prefetch(slugs).await
  }

  pub async fn stats(&self) -> Result<CacheStats> {
    let details = Arc::clone(&self.details);
    tokio::task::spawn_blocking(move || details.get_stats())
      .await
      .map_err(|e| eyre!("Stats task failed: {}", e))
  }

  /// Drop offline records past the retention window. Returns how many were removed.
  pub async fn cleanup(&self) -> Result<usize> {
    let details = Arc::clone(&self.details);
    tokio::task::spawn_blocking(move || details.cleanup())
      .await
      .map_err(|e| eyre!("Cleanup task failed: {}", e))
  }

  /// Empty the offline mirror and the dataset snapshot. Returns how many records were removed.
  pub async fn clear(&self) -> Result<usize> {
    self.search.dataset().flush();
    let details = Arc::clone(&self.details);
    tokio::task::spawn_blocking(move || details.clear_all())
      .await
      .map_err(|e| eyre!("Clear task failed: {}", e))
  }

  pub fn health(&self) -> HealthReport {
    let metrics = self.metrics.snapshot();
    HealthReport {
      hit_rate: metrics.hit_rate(),
      metrics,
      network: self.network.status(),
      data_source: self.details.data_source(),
      offline_stats: self.details.last_stats(),
      memory_entries: self.computations.memory_len(),
      dead_lettered_writes: self.computations.dead_lettered_writes(),
    }
  }

  /// Wait for queued durable writes, then stop background work.
  pub async fn shutdown(self) {
    self.computations.shutdown().await;
    info!("Cache client shut down");
  }
}
