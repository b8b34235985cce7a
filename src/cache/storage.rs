//! Local persistent mirror for the offline cache, backed by SQLite.

use chrono::{DateTime, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::traits::Cacheable;

/// A single cached entity.
#[derive(Debug, Clone)]
pub struct CachedEntity<T> {
  /// The cached entity
  pub entity: T,
  /// When the entity was cached
  pub cached_at: DateTime<Utc>,
}

impl<T> CachedEntity<T> {
  pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
    now - self.cached_at
  }

  /// Stale once strictly older than `threshold`. Stale records are still served.
  pub fn is_stale(&self, threshold: chrono::Duration, now: DateTime<Utc>) -> bool {
    self.age(now) > threshold
  }

  /// Human readable age, e.g. "5m ago".
  pub fn age_display(&self, now: DateTime<Utc>) -> String {
    let minutes = self.age(now).num_minutes();
    if minutes < 1 {
      // Also covers clock skew
      "just now".to_string()
    } else if minutes < 60 {
      format!("{}m ago", minutes)
    } else if minutes < 1440 {
      format!("{}h ago", minutes / 60)
    } else {
      format!("{}d ago", minutes / 1440)
    }
  }
}

/// Snapshot of what the local mirror holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
  /// Entity count per entity type
  pub domains: BTreeMap<String, usize>,
  pub total_entries: usize,
  /// Serialized payload plus key sizes
  pub estimated_bytes: u64,
  pub oldest_cached_at: Option<DateTime<Utc>>,
}

/// Trait for local mirror backends.
pub trait LocalStore: Send + Sync {
  /// Get a single entity by key.
  fn get_entity<T: Cacheable>(&self, entity_key: &str) -> Result<Option<CachedEntity<T>>>;

  /// Store a single entity, stamped now. Replaces any previous record.
  fn store_entity<T: Cacheable>(&self, entity: &T) -> Result<()> {
    self.store_entity_at(entity, Utc::now())
  }

  /// Store a single entity with an explicit `cached_at`.
  fn store_entity_at<T: Cacheable>(&self, entity: &T, cached_at: DateTime<Utc>) -> Result<()>;

  /// Enumerate the store into per-type counts and an estimated size.
  fn stats(&self) -> Result<CacheStats>;

  /// Delete every record cached before `cutoff`. Returns how many were removed.
  fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize>;

  /// Delete everything. Returns how many records were removed.
  fn clear(&self) -> Result<usize>;
}

/// SQLite-based local storage.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open or create the mirror at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  /// Default location inside the data directory.
  pub fn default_path(data_dir: &Path) -> PathBuf {
    data_dir.join("offline.db")
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;
    Ok(())
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Generic entity cache (stores serialized JSON)
CREATE TABLE IF NOT EXISTS entity_cache (
    entity_type TEXT NOT NULL,
    entity_key TEXT NOT NULL,
    data BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (entity_type, entity_key)
);

CREATE INDEX IF NOT EXISTS idx_entity_cache_cached_at
    ON entity_cache(cached_at);
"#;

impl LocalStore for SqliteStorage {
  fn get_entity<T: Cacheable>(&self, entity_key: &str) -> Result<Option<CachedEntity<T>>> {
    let conn = self.conn()?;
    let entity_type = T::entity_type();

    let result: Option<(Vec<u8>, String)> = conn
      .query_row(
        "SELECT data, cached_at FROM entity_cache
         WHERE entity_type = ? AND entity_key = ?",
        params![entity_type, entity_key],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read {} {}: {}", entity_type, entity_key, e))?;

    match result {
      Some((data, cached_at_str)) => {
        let entity: T = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize entity: {}", e))?;
        let cached_at = parse_datetime(&cached_at_str)?;
        Ok(Some(CachedEntity { entity, cached_at }))
      }
      None => Ok(None),
    }
  }

  fn store_entity_at<T: Cacheable>(&self, entity: &T, cached_at: DateTime<Utc>) -> Result<()> {
    let data =
      serde_json::to_vec(entity).map_err(|e| eyre!("Failed to serialize entity: {}", e))?;
    let conn = self.conn()?;

    conn
      .execute(
        "INSERT OR REPLACE INTO entity_cache (entity_type, entity_key, data, cached_at)
         VALUES (?, ?, ?, ?)",
        params![
          T::entity_type(),
          entity.cache_key(),
          data,
          format_datetime(cached_at)
        ],
      )
      .map_err(|e| eyre!("Failed to store entity: {}", e))?;

    Ok(())
  }

  fn stats(&self) -> Result<CacheStats> {
    let conn = self.conn()?;

    let mut stmt = conn
      .prepare(
        "SELECT entity_type, COUNT(*), COALESCE(SUM(LENGTH(data) + LENGTH(entity_key)), 0),
                MIN(cached_at)
         FROM entity_cache GROUP BY entity_type",
      )
      .map_err(|e| eyre!("Failed to prepare stats query: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, i64>(1)?,
          row.get::<_, i64>(2)?,
          row.get::<_, Option<String>>(3)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query stats: {}", e))?;

    let mut stats = CacheStats::default();
    for row in rows {
      let (entity_type, count, bytes, oldest) =
        row.map_err(|e| eyre!("Failed to read stats row: {}", e))?;

      stats.domains.insert(entity_type, count as usize);
      stats.total_entries += count as usize;
      stats.estimated_bytes += bytes as u64;

      if let Some(oldest) = oldest {
        let oldest = parse_datetime(&oldest)?;
        stats.oldest_cached_at = Some(match stats.oldest_cached_at {
          Some(current) => current.min(oldest),
          None => oldest,
        });
      }
    }

    Ok(stats)
  }

  fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
    self
      .conn()?
      .execute(
        "DELETE FROM entity_cache WHERE cached_at < ?",
        params![format_datetime(cutoff)],
      )
      .map_err(|e| eyre!("Failed to delete old cache entries: {}", e))
  }

  fn clear(&self) -> Result<usize> {
    self
      .conn()?
      .execute("DELETE FROM entity_cache", [])
      .map_err(|e| eyre!("Failed to clear cache: {}", e))
  }
}

/// Fixed-width RFC 3339 so stored timestamps sort lexicographically.
fn format_datetime(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde::Deserialize;

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Place {
    slug: String,
    population: u64,
  }

  impl Cacheable for Place {
    fn cache_key(&self) -> String {
      self.slug.clone()
    }

    fn entity_type() -> &'static str {
      "place"
    }
  }

  #[derive(Debug, Clone, Serialize, Deserialize)]
  struct Note {
    id: String,
  }

  impl Cacheable for Note {
    fn cache_key(&self) -> String {
      self.id.clone()
    }

    fn entity_type() -> &'static str {
      "note"
    }
  }

  fn place(slug: &str) -> Place {
    Place {
      slug: slug.to_string(),
      population: 100,
    }
  }

  #[test]
  fn test_store_and_get() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.store_entity(&place("mumbai")).unwrap();

    let cached = storage.get_entity::<Place>("mumbai").unwrap().unwrap();
    assert_eq!(cached.entity, place("mumbai"));
    assert!(cached.age(Utc::now()) < chrono::Duration::seconds(5));
    assert!(storage.get_entity::<Place>("pune").unwrap().is_none());
  }

  #[test]
  fn test_entity_types_are_separate() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.store_entity(&place("x")).unwrap();
    assert!(storage.get_entity::<Note>("x").unwrap().is_none());
  }

  #[test]
  fn test_store_replaces_record() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let old = Utc::now() - chrono::Duration::days(3);
    storage.store_entity_at(&place("mumbai"), old).unwrap();

    let updated = Place {
      population: 200,
      ..place("mumbai")
    };
    storage.store_entity(&updated).unwrap();

    let cached = storage.get_entity::<Place>("mumbai").unwrap().unwrap();
    assert_eq!(cached.entity.population, 200);
    assert!(cached.cached_at > old);
    assert_eq!(storage.stats().unwrap().total_entries, 1);
  }

  #[test]
  fn test_stats_per_domain() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let old = Utc::now() - chrono::Duration::days(2);
    storage.store_entity_at(&place("a"), old).unwrap();
    storage.store_entity(&place("b")).unwrap();
    storage
      .store_entity(&Note {
        id: "n1".to_string(),
      })
      .unwrap();

    let stats = storage.stats().unwrap();
    assert_eq!(stats.total_entries, 3);
    assert_eq!(stats.domains.get("place"), Some(&2));
    assert_eq!(stats.domains.get("note"), Some(&1));
    assert!(stats.estimated_bytes > 0);
    let oldest = stats.oldest_cached_at.unwrap();
    assert!((oldest - old).num_milliseconds().abs() < 1);
  }

  #[test]
  fn test_delete_older_than() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let now = Utc::now();
    storage
      .store_entity_at(&place("old"), now - chrono::Duration::days(40))
      .unwrap();
    storage
      .store_entity_at(&place("recent"), now - chrono::Duration::days(1))
      .unwrap();

    let cutoff = now - chrono::Duration::days(30);
    assert_eq!(storage.delete_older_than(cutoff).unwrap(), 1);
    assert_eq!(storage.delete_older_than(cutoff).unwrap(), 0);
    assert!(storage.get_entity::<Place>("recent").unwrap().is_some());
  }

  #[test]
  fn test_clear() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.store_entity(&place("a")).unwrap();
    storage.store_entity(&place("b")).unwrap();

    assert_eq!(storage.clear().unwrap(), 2);
    assert_eq!(storage.stats().unwrap(), CacheStats::default());
  }

  #[test]
  fn test_age_display() {
    let now = Utc::now();
    let at = |minutes: i64| CachedEntity {
      entity: (),
      cached_at: now - chrono::Duration::minutes(minutes),
    };
    assert_eq!(at(0).age_display(now), "just now");
    assert_eq!(at(-5).age_display(now), "just now");
    assert_eq!(at(5).age_display(now), "5m ago");
    assert_eq!(at(150).age_display(now), "2h ago");
    assert_eq!(at(3 * 1440).age_display(now), "3d ago");
  }

  #[test]
  fn test_open_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = SqliteStorage::default_path(dir.path());
    {
      let storage = SqliteStorage::open(&path).unwrap();
      storage.store_entity(&place("kept")).unwrap();
    }
    let reopened = SqliteStorage::open(&path).unwrap();
    assert!(reopened.get_entity::<Place>("kept").unwrap().is_some());
  }
}
