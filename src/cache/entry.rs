//! Expiring cache entries on the monotonic clock.

use tokio::time::{Duration, Instant};

/// Expiry used when `now + ttl` does not fit in an `Instant` (roughly 30 years).
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// A cached value with its own expiry.
///
/// Uses `tokio::time::Instant` so expiry follows the runtime clock, which tests can pause
/// and advance.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
  pub value: T,
  pub expires_at: Instant,
  pub inserted_at: Instant,
}

impl<T> CacheEntry<T> {
  pub fn new(value: T, ttl: Duration) -> Self {
    let now = Instant::now();
    Self {
      value,
      expires_at: now
        .checked_add(ttl)
        .unwrap_or_else(|| now + FAR_FUTURE),
      inserted_at: now,
    }
  }

  /// An entry is expired from the instant `now >= expires_at`.
  pub fn is_expired_at(&self, now: Instant) -> bool {
    now >= self.expires_at
  }

  pub fn is_expired(&self) -> bool {
    self.is_expired_at(Instant::now())
  }

  /// Time left before expiry, zero once expired.
  pub fn ttl_remaining(&self) -> Duration {
    self.expires_at.saturating_duration_since(Instant::now())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test(start_paused = true)]
  async fn test_expires_exactly_at_deadline() {
    let entry = CacheEntry::new(7, Duration::from_secs(10));
    assert!(!entry.is_expired());

    tokio::time::advance(Duration::from_secs(9)).await;
    assert!(!entry.is_expired());
    assert_eq!(entry.ttl_remaining(), Duration::from_secs(1));

    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(entry.is_expired());
    assert_eq!(entry.ttl_remaining(), Duration::ZERO);
  }

  #[tokio::test(start_paused = true)]
  async fn test_huge_ttl_never_expires() {
    let entry = CacheEntry::new("v", Duration::MAX);
    tokio::time::advance(Duration::from_secs(10 * 365 * 24 * 60 * 60)).await;
    assert!(!entry.is_expired());
  }
}
