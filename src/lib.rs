//! Caching subsystem for environmental metrics.
//!
//! - `cache`: two-tier computation cache, bulk dataset cache and the offline-aware
//!   detail mirror
//! - `network`: connectivity monitoring used to pick network-first or cache-first reads
//! - `metrics`: hit/miss/latency counters for the health endpoint
//! - `store`: the durable document store the caches sit in front of
//! - `remote`: HTTP collaborator plus the client that wires every cache together

pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod network;
pub mod remote;
pub mod search;
pub mod store;
