//! Caching subsystem.
//!
//! - [`ComputationCache`]: memory (L1) + durable (L2) cache for computed metrics, with
//!   single-flight de-duplication of concurrent misses
//! - [`DatasetCache`]: TTL cache for whole dataset snapshots, filtered by callers
//! - [`OfflineDataCache`]: local mirror of detail entities that keeps serving while
//!   offline, flagging stale records

mod computation;
mod dataset;
mod entry;
mod memo;
mod offline;
mod storage;
mod traits;
mod writer;

pub use computation::{
  CachedValue, ComputationCache, ComputationConfig, ComputationKey, DurableCacheRecord,
  ResultSource, DURABLE_COLLECTION,
};
pub use dataset::{DatasetCache, DatasetCacheRecord, SweeperHandle, DEFAULT_DATASET_TTL};
pub use entry::CacheEntry;
pub use memo::VolatileMemo;
pub use offline::{OfflineConfig, OfflineDataCache, RefreshHandle};
pub use storage::{CacheStats, CachedEntity, LocalStore, SqliteStorage};
pub use traits::{Cacheable, DataSource, DetailFetcher, FetchMetadata, FetchOptions, FetchResult};
pub use writer::{DurableWriter, WriterConfig};
