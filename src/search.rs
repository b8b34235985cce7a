//! Filtered district listing over a cached dataset snapshot.
//!
//! The durable store is scanned for one bounded page per TTL window. Every filter combination
//! in that window is answered from the same snapshot.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{debug, warn};

use crate::cache::{DatasetCache, SweeperHandle};
use crate::metrics::MetricsRecorder;
use crate::remote::DistrictSummary;
use crate::store::{DocumentStore, OrderBy, Query};

/// Dataset cache key for the full district snapshot.
pub const DATASET_KEY: &str = "all_raw";

/// Collection the district rows are read from.
pub const DISTRICTS_COLLECTION: &str = "districts";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilter {
  /// Exact state name, case-insensitive
  pub state: Option<String>,
  /// Substring of the district name, case-insensitive
  pub name_contains: Option<String>,
  pub min_population: Option<u64>,
  pub limit: Option<usize>,
}

impl SearchFilter {
  pub fn matches(&self, district: &DistrictSummary) -> bool {
    if let Some(state) = &self.state {
      if !district.state.eq_ignore_ascii_case(state) {
        return false;
      }
    }
    if let Some(needle) = &self.name_contains {
      if !district
        .name
        .to_lowercase()
        .contains(&needle.to_lowercase())
      {
        return false;
      }
    }
    if let Some(min) = self.min_population {
      if district.population < min {
        return false;
      }
    }
    true
  }

  pub fn apply(&self, districts: &[DistrictSummary]) -> Vec<DistrictSummary> {
    districts
      .iter()
      .filter(|d| self.matches(d))
      .take(self.limit.unwrap_or(usize::MAX))
      .cloned()
      .collect()
  }
}

pub struct DistrictSearch<S: ?Sized> {
  store: Arc<S>,
  dataset: Arc<DatasetCache<DistrictSummary>>,
  metrics: MetricsRecorder,
  page_limit: usize,
  store_timeout: Duration,
}

impl<S: DocumentStore + ?Sized> DistrictSearch<S> {
  pub fn new(
    store: Arc<S>,
    dataset_ttl: Duration,
    page_limit: usize,
    store_timeout: Duration,
    metrics: MetricsRecorder,
  ) -> Self {
    Self {
      store,
      dataset: Arc::new(DatasetCache::new(dataset_ttl)),
      metrics,
      page_limit,
      store_timeout,
    }
  }

  pub fn dataset(&self) -> &Arc<DatasetCache<DistrictSummary>> {
    &self.dataset
  }

  /// Periodically drop the expired snapshot.
  pub fn spawn_sweeper(&self, interval: Duration) -> SweeperHandle {
    self.dataset.spawn_sweeper(interval)
  }

  /// Filter the cached snapshot, loading it from the store first if absent or expired.
  pub async fn search(&self, filter: &SearchFilter) -> Result<Vec<DistrictSummary>> {
    let timer = self.metrics.start();

    if let Some(districts) = self.dataset.get(DATASET_KEY) {
      timer.hit();
      return Ok(filter.apply(&districts));
    }

    match self.dataset.get_or_load(DATASET_KEY, || self.load_page()).await {
      Ok(districts) => {
        timer.miss();
        Ok(filter.apply(&districts))
      }
      Err(e) => {
        timer.error();
        Err(e)
      }
    }
  }

  async fn load_page(&self) -> Result<Vec<DistrictSummary>> {
    let query = Query::new()
      .order_by(OrderBy::asc("name"))
      .limit(self.page_limit);

    let docs = tokio::time::timeout(
      self.store_timeout,
      self.store.query(DISTRICTS_COLLECTION, &query),
    )
    .await
    .map_err(|_| eyre!("District query timed out"))?
    .map_err(|e| eyre!("District query failed: {}", e))?;

    let districts: Vec<DistrictSummary> = docs
      .into_iter()
      .filter_map(|doc| match serde_json::from_value(doc) {
        Ok(district) => Some(district),
        Err(e) => {
          warn!("Skipping malformed district row: {}", e);
          None
        }
      })
      .collect();

    debug!(count = districts.len(), "Loaded district snapshot");
    Ok(districts)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::MemoryDocumentStore;
  use serde_json::json;

  fn district(i: usize) -> DistrictSummary {
    DistrictSummary {
      slug: format!("district-{:03}", i),
      name: format!("District {:03}", i),
      state: if i % 2 == 0 { "Maharashtra" } else { "Kerala" }.to_string(),
      population: (i as u64) * 10_000,
    }
  }

  async fn seeded_store(count: usize) -> Arc<MemoryDocumentStore> {
    let store = Arc::new(MemoryDocumentStore::new());
    for i in 0..count {
      let d = district(i);
      store
        .set(DISTRICTS_COLLECTION, &d.slug, &serde_json::to_value(&d).unwrap())
        .await
        .unwrap();
    }
    store
  }

  fn build_search(
    store: &Arc<MemoryDocumentStore>,
    metrics: &MetricsRecorder,
  ) -> DistrictSearch<MemoryDocumentStore> {
    DistrictSearch::new(
      Arc::clone(store),
      Duration::from_secs(300),
      500,
      Duration::from_secs(5),
      metrics.clone(),
    )
  }

  #[tokio::test]
  async fn test_preloaded_snapshot_needs_no_queries() {
    let store = Arc::new(MemoryDocumentStore::new());
    let metrics = MetricsRecorder::new();
    let search = build_search(&store, &metrics);
    search
      .dataset()
      .set(DATASET_KEY, (0..100).map(district).collect(), None);

    let kerala = search
      .search(&SearchFilter {
        state: Some("kerala".to_string()),
        ..SearchFilter::default()
      })
      .await
      .unwrap();
    let big = search
      .search(&SearchFilter {
        min_population: Some(900_000),
        ..SearchFilter::default()
      })
      .await
      .unwrap();

    assert_eq!(kerala.len(), 50);
    assert_eq!(big.len(), 10);
    assert_eq!(store.query_count(), 0);
    assert_eq!(metrics.snapshot().cache_hits, 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_one_query_per_ttl_window() {
    let store = seeded_store(20).await;
    let metrics = MetricsRecorder::new();
    let search = build_search(&store, &metrics);

    let all = search.search(&SearchFilter::default()).await.unwrap();
    assert_eq!(all.len(), 20);
    assert_eq!(all[0].name, "District 000");

    search
      .search(&SearchFilter {
        name_contains: Some("01".to_string()),
        ..SearchFilter::default()
      })
      .await
      .unwrap();
    assert_eq!(store.query_count(), 1);

    tokio::time::advance(Duration::from_secs(300)).await;
    search.search(&SearchFilter::default()).await.unwrap();
    assert_eq!(store.query_count(), 2);

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.total_requests, 3);
    assert_eq!(snapshot.cache_hits, 1);
  }

  #[tokio::test]
  async fn test_page_limit_bounds_the_snapshot() {
    let store = seeded_store(30).await;
    let search = DistrictSearch::new(
      Arc::clone(&store),
      Duration::from_secs(300),
      10,
      Duration::from_secs(5),
      MetricsRecorder::new(),
    );

    let all = search.search(&SearchFilter::default()).await.unwrap();
    assert_eq!(all.len(), 10);
  }

  #[tokio::test]
  async fn test_limit_and_name_filter() {
    let store = seeded_store(30).await;
    let metrics = MetricsRecorder::new();
    let search = build_search(&store, &metrics);

    let found = search
      .search(&SearchFilter {
        name_contains: Some("district 0".to_string()),
        limit: Some(3),
        ..SearchFilter::default()
      })
      .await
      .unwrap();
    let slugs: Vec<_> = found.iter().map(|d| d.slug.as_str()).collect();
    assert_eq!(slugs, vec!["district-000", "district-001", "district-002"]);
  }

  #[tokio::test]
  async fn test_malformed_rows_are_skipped() {
    let store = seeded_store(2).await;
    store
      .set(DISTRICTS_COLLECTION, "broken", &json!({"name": "Broken"}))
      .await
      .unwrap();
    let search = build_search(&store, &MetricsRecorder::new());

    assert_eq!(search.search(&SearchFilter::default()).await.unwrap().len(), 2);
  }

  #[tokio::test]
  async fn test_store_failure_is_reported_and_counted() {
    let store = seeded_store(2).await;
    store.set_failing(true);
    let metrics = MetricsRecorder::new();
    let search = build_search(&store, &metrics);

    assert!(search.search(&SearchFilter::default()).await.is_err());
    assert_eq!(metrics.snapshot().errors, 1);
    assert!(search.dataset().is_empty());

    store.set_failing(false);
    assert_eq!(search.search(&SearchFilter::default()).await.unwrap().len(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_query_timeout_leaves_snapshot_unset() {
    let store = seeded_store(2).await;
    store.set_latency(Duration::from_secs(10));
    let metrics = MetricsRecorder::new();
    let search = build_search(&store, &metrics);

    let err = search.search(&SearchFilter::default()).await.unwrap_err();
    assert!(err.to_string().contains("timed out"));
    assert!(search.dataset().is_empty());
    assert_eq!(metrics.snapshot().errors, 1);
  }
}
