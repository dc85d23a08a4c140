use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use tokio_rusqlite::Connection;

use super::{StorageBackend, StorageError};
use crate::cache::config::StorageType;
use crate::cache::entry::now_ms;

pub const DATABASE_NAME: &str = "CacheDB";
pub const SCHEMA_VERSION: i64 = 1;

const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;
"#;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache (
    key TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    timestamp INTEGER NOT NULL
) WITHOUT ROWID;
"#;

/// Indexed-record store: one `cache` table keyed by `key`, records
/// `{key, data, timestamp}`, schema version tracked in `user_version`.
pub struct IndexedStorage {
  conn: Connection,
}

impl IndexedStorage {
  pub async fn open(path: &str) -> Result<Self, StorageError> {
    let conn = if path == ":memory:" {
      Connection::open_in_memory().await?
    } else {
      if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
          tokio::fs::create_dir_all(parent).await?;
        }
      }
      Connection::open(path).await?
    };

    conn
      .call(|conn| {
        conn.execute_batch(PRAGMAS)?;
        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version < SCHEMA_VERSION {
          conn.execute_batch(SCHEMA)?;
          conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }
        Ok(())
      })
      .await?;

    tracing::info!("{} opened at {} (schema v{})", DATABASE_NAME, path, SCHEMA_VERSION);
    Ok(Self { conn })
  }

  pub async fn in_memory() -> Result<Self, StorageError> {
    Self::open(":memory:").await
  }

  pub async fn schema_version(&self) -> Result<i64, StorageError> {
    let version = self
      .conn
      .call(|conn| {
        conn
          .query_row("PRAGMA user_version", [], |row| row.get(0))
          .map_err(|e| e.into())
      })
      .await?;
    Ok(version)
  }

  /// Stored write time of a record (epoch ms)
  pub async fn record_timestamp(&self, key: &str) -> Result<Option<i64>, StorageError> {
    let key = key.to_string();
    let ts = self
      .conn
      .call(move |conn| {
        conn
          .query_row(
            "SELECT timestamp FROM cache WHERE key = ?1",
            params![key],
            |row| row.get(0),
          )
          .optional()
          .map_err(|e| e.into())
      })
      .await?;
    Ok(ts)
  }
}

#[async_trait]
impl StorageBackend for IndexedStorage {
  fn kind(&self) -> StorageType {
    StorageType::IndexedDb
  }

  async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
    let key = key.to_string();
    let data = self
      .conn
      .call(move |conn| {
        conn
          .query_row(
            "SELECT data FROM cache WHERE key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
          )
          .optional()
          .map_err(|e| e.into())
      })
      .await?;
    Ok(data)
  }

  async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
    let key = key.to_string();
    let value = value.to_string();
    let timestamp = now_ms();
    self
      .conn
      .call(move |conn| {
        conn
          .execute(
            "INSERT INTO cache (key, data, timestamp) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET data = excluded.data, timestamp = excluded.timestamp",
            params![key, value, timestamp],
          )
          .map(|_| ())
          .map_err(|e| e.into())
      })
      .await?;
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<(), StorageError> {
    let key = key.to_string();
    self
      .conn
      .call(move |conn| {
        conn
          .execute("DELETE FROM cache WHERE key = ?1", params![key])
          .map(|_| ())
          .map_err(|e| e.into())
      })
      .await?;
    Ok(())
  }

  async fn clear(&self) -> Result<(), StorageError> {
    self
      .conn
      .call(|conn| {
        conn
          .execute("DELETE FROM cache", [])
          .map(|_| ())
          .map_err(|e| e.into())
      })
      .await?;
    Ok(())
  }

  async fn count(&self) -> Result<usize, StorageError> {
    let count: i64 = self
      .conn
      .call(|conn| {
        conn
          .query_row("SELECT COUNT(*) FROM cache", [], |row| row.get(0))
          .map_err(|e| e.into())
      })
      .await?;
    Ok(count as usize)
  }
}
