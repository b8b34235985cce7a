//! Errors surfaced to consumers of the cache layer.
//!
//! Infrastructure failures (durable store, network, local mirror) are recovered inside the
//! caches. The only thing a consumer ever sees is that no tier had the data.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
  /// Offline and nothing is mirrored locally for this id.
  #[error("No cached data for '{id}' while offline")]
  NotCached { id: String },

  /// The network fetch failed and there is no local record to fall back to.
  #[error("'{id}' is unavailable: {reason}")]
  Unavailable { id: String, reason: String },
}

impl FetchError {
  pub fn id(&self) -> &str {
    match self {
      FetchError::NotCached { id } | FetchError::Unavailable { id, .. } => id,
    }
  }
}
