//! Durable document store consumed by the caches.
//!
//! The caches only ever need three operations: point reads, point writes, and a bounded
//! filtered scan. Anything implementing [`DocumentStore`] can back them, which lets tests
//! swap in [`MemoryDocumentStore`].

mod memory;
mod query;
mod sqlite;

use async_trait::async_trait;
use color_eyre::Result;
use serde_json::Value;

pub use memory::MemoryDocumentStore;
pub use query::{Direction, Filter, FilterOp, OrderBy, Query};
pub use sqlite::SqliteDocumentStore;

/// Async key-value document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
  /// Read one document, `None` when absent.
  async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>>;

  /// Write one document, replacing any existing one.
  async fn set(&self, collection: &str, id: &str, record: &Value) -> Result<()>;

  /// Filter, order and limit a collection.
  async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Value>>;
}
