mod cache;
pub mod cached_client;
pub mod client;
pub mod types;

pub use cached_client::{CachedEnvClient, HealthReport};
pub use client::RemoteClient;
pub use types::{DistrictDetail, DistrictSummary, OxygenMetrics};
