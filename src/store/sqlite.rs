//! SQLite-backed document store.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

use super::{DocumentStore, Query};

/// Schema for the document table.
const DOCUMENT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    data BLOB NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (collection, id)
);
"#;

/// Durable store keeping JSON documents in a single SQLite table.
pub struct SqliteDocumentStore {
  conn: Mutex<Connection>,
}

impl SqliteDocumentStore {
  /// Open or create the store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create store directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open document store at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a throwaway in-memory store.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory document store: {}", e))?;
    Self::with_connection(conn)
  }

  /// Default location inside the data directory.
  pub fn default_path(data_dir: &Path) -> PathBuf {
    data_dir.join("store.db")
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(DOCUMENT_SCHEMA)
      .map_err(|e| eyre!("Failed to run document store migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
  async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
    let conn = self.conn()?;

    let data: Option<Vec<u8>> = conn
      .query_row(
        "SELECT data FROM documents WHERE collection = ? AND id = ?",
        params![collection, id],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read {}/{}: {}", collection, id, e))?;

    data
      .map(|bytes| {
        serde_json::from_slice(&bytes)
          .map_err(|e| eyre!("Failed to deserialize {}/{}: {}", collection, id, e))
      })
      .transpose()
  }

  async fn set(&self, collection: &str, id: &str, record: &Value) -> Result<()> {
    let data =
      serde_json::to_vec(record).map_err(|e| eyre!("Failed to serialize document: {}", e))?;
    let conn = self.conn()?;

    conn
      .execute(
        "INSERT OR REPLACE INTO documents (collection, id, data, updated_at)
         VALUES (?, ?, ?, datetime('now'))",
        params![collection, id, data],
      )
      .map_err(|e| eyre!("Failed to write {}/{}: {}", collection, id, e))?;

    Ok(())
  }

  async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Value>> {
    let conn = self.conn()?;

    let mut stmt = conn
      .prepare("SELECT data FROM documents WHERE collection = ? ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map(params![collection], |row| row.get::<_, Vec<u8>>(0))
      .map_err(|e| eyre!("Failed to query {}: {}", collection, e))?;

    let mut docs: Vec<Value> = Vec::new();
    for row in rows {
      let data = match row {
        Ok(data) => data,
        Err(e) => {
          warn!(collection, "Skipping unreadable document row: {}", e);
          continue;
        }
      };
      match serde_json::from_slice(&data) {
        Ok(doc) => docs.push(doc),
        Err(e) => warn!(collection, "Skipping undecodable document: {}", e),
      }
    }

    Ok(query.apply(docs))
  }
}
