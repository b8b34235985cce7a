//! Bounded in-process map of short-lived entries (the L1 tier).

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::time::{Duration, Instant};

use super::entry::CacheEntry;

struct Slot<V> {
  entry: CacheEntry<V>,
  /// Insertion sequence, matched against `order` to skip superseded positions.
  seq: u64,
}

struct MemoInner<V> {
  slots: HashMap<String, Slot<V>>,
  /// Keys in insertion order. May hold positions for keys that were since replaced or
  /// removed; those are skipped on eviction and compacted away.
  order: VecDeque<(u64, String)>,
  next_seq: u64,
}

impl<V> MemoInner<V> {
  fn is_live(&self, seq: u64, key: &str) -> bool {
    self.slots.get(key).map(|s| s.seq) == Some(seq)
  }

  fn evict_oldest(&mut self) -> Option<String> {
    while let Some((seq, key)) = self.order.pop_front() {
      if self.is_live(seq, &key) {
        self.slots.remove(&key);
        return Some(key);
      }
    }
    None
  }

  fn compact(&mut self, capacity: usize) {
    if self.order.len() <= capacity.saturating_mul(2) + 16 {
      return;
    }
    let MemoInner { slots, order, .. } = self;
    order.retain(|(seq, key)| slots.get(key).map(|s| s.seq) == Some(*seq));
  }
}

/// Capacity-bounded, TTL-expiring map.
///
/// Eviction is first-in-first-out: when an insert of a new key pushes the map past
/// capacity, the single oldest-inserted key goes. Reads do not refresh position.
/// Replacing an existing key counts as a fresh insertion.
pub struct VolatileMemo<V> {
  inner: Mutex<MemoInner<V>>,
  capacity: usize,
  ttl: Duration,
}

impl<V: Clone> VolatileMemo<V> {
  pub fn new(capacity: usize, ttl: Duration) -> Self {
    Self {
      inner: Mutex::new(MemoInner {
        slots: HashMap::with_capacity(capacity.min(4096)),
        order: VecDeque::new(),
        next_seq: 0,
      }),
      capacity: capacity.max(1),
      ttl,
    }
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn ttl(&self) -> Duration {
    self.ttl
  }

  // The map is never left half-updated, so a poisoned lock is still usable.
  fn lock(&self) -> MutexGuard<'_, MemoInner<V>> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Look up an unexpired value. Expired entries are dropped on the way out.
  pub fn get(&self, key: &str) -> Option<V> {
    let mut inner = self.lock();
    let now = Instant::now();

    match inner.slots.get(key) {
      Some(slot) if !slot.entry.is_expired_at(now) => Some(slot.entry.value.clone()),
      Some(_) => {
        inner.slots.remove(key);
        None
      }
      None => None,
    }
  }

  /// Insert with the standard TTL. Returns the key evicted to make room, if any.
  pub fn insert(&self, key: &str, value: V) -> Option<String> {
    let mut inner = self.lock();
    self.insert_locked(&mut inner, key, value)
  }

  /// Sequence number the next insert will receive. Capture it before a slow lookup and
  /// pass it to [`insert_if_unchanged`](Self::insert_if_unchanged).
  pub fn generation(&self) -> u64 {
    self.lock().next_seq
  }

  /// Insert unless `key` was written at or after `generation`. Returns whether the value
  /// was stored.
  pub fn insert_if_unchanged(&self, key: &str, value: V, generation: u64) -> bool {
    let mut inner = self.lock();
    if inner.slots.get(key).is_some_and(|slot| slot.seq >= generation) {
      return false;
    }
    self.insert_locked(&mut inner, key, value);
    true
  }

  fn insert_locked(&self, inner: &mut MemoInner<V>, key: &str, value: V) -> Option<String> {
    let seq = inner.next_seq;
    inner.next_seq += 1;

    let replaced = inner
      .slots
      .insert(
        key.to_string(),
        Slot {
          entry: CacheEntry::new(value, self.ttl),
          seq,
        },
      )
      .is_some();
    inner.order.push_back((seq, key.to_string()));

    let evicted = if !replaced && inner.slots.len() > self.capacity {
      inner.evict_oldest()
    } else {
      None
    };

    inner.compact(self.capacity);
    evicted
  }

  pub fn remove(&self, key: &str) -> bool {
    self.lock().slots.remove(key).is_some()
  }

  pub fn clear(&self) {
    let mut inner = self.lock();
    inner.slots.clear();
    inner.order.clear();
  }

  /// Drop every expired entry. Returns how many were removed.
  pub fn purge_expired(&self) -> usize {
    let mut inner = self.lock();
    let now = Instant::now();
    let before = inner.slots.len();
    inner.slots.retain(|_, slot| !slot.entry.is_expired_at(now));
    let removed = before - inner.slots.len();
    inner.compact(self.capacity);
    removed
  }

  /// Number of stored entries, including expired ones not yet swept.
  pub fn len(&self) -> usize {
    self.lock().slots.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
