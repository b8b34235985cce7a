//! Core traits and types for the offline-aware detail cache.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::{de::DeserializeOwned, Serialize};

/// Trait for entities that can be mirrored locally.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Unique identifier for this entity (e.g., district slug)
  fn cache_key(&self) -> String;

  /// Entity type name for storage organization (e.g., "district")
  fn entity_type() -> &'static str;
}

/// Network source of detail entities.
#[async_trait]
pub trait DetailFetcher<T>: Send + Sync {
  async fn fetch(&self, id: &str) -> Result<T>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
  /// Skip straight to the network even when a local record exists
  pub force_refresh: bool,
}

impl FetchOptions {
  pub fn force_refresh() -> Self {
    Self {
      force_refresh: true,
    }
  }
}

/// Where a [`FetchResult`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchMetadata {
  pub from_cache: bool,
  pub is_stale: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cached_at: Option<DateTime<Utc>>,
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone, Serialize)]
pub struct FetchResult<T> {
  pub data: T,
  pub metadata: FetchMetadata,
}

impl<T> FetchResult<T> {
  /// Fresh data from network
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      metadata: FetchMetadata {
        from_cache: false,
        is_stale: false,
        cached_at: None,
      },
    }
  }

  /// Data served from the local mirror
  pub fn from_cache(data: T, cached_at: DateTime<Utc>, is_stale: bool) -> Self {
    Self {
      data,
      metadata: FetchMetadata {
        from_cache: true,
        is_stale,
        cached_at: Some(cached_at),
      },
    }
  }

  pub fn source(&self) -> DataSource {
    DataSource::from(&self.metadata)
  }
}

/// Indicates where the data being shown came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataSource {
  /// Nothing fetched yet, or nothing available
  #[default]
  Unknown,
  /// Fresh data from network
  Network,
  /// Local record, within the staleness threshold
  Cache,
  /// Local record past the staleness threshold
  StaleCache,
}

impl DataSource {
  pub fn is_cached(self) -> bool {
    matches!(self, DataSource::Cache | DataSource::StaleCache)
  }
}

impl From<&FetchMetadata> for DataSource {
  fn from(metadata: &FetchMetadata) -> Self {
    match (metadata.from_cache, metadata.is_stale) {
      (false, _) => DataSource::Network,
      (true, false) => DataSource::Cache,
      (true, true) => DataSource::StaleCache,
    }
  }
}
