//! Persistent storage backends for the tiered cache

mod indexed;
mod local;
mod session;

use async_trait::async_trait;
use std::sync::Arc;

use super::codec::CodecError;
use super::config::{CacheConfig, StorageType};

pub use indexed::{IndexedStorage, DATABASE_NAME, SCHEMA_VERSION};
pub use local::LocalStorage;
pub use session::SessionStorage;

/// Storage operation error
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("SQLite error: {0}")]
  Sqlite(#[from] tokio_rusqlite::Error),
  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
  #[error("Codec error: {0}")]
  Codec(#[from] CodecError),
  #[error("Quota exceeded: {needed} bytes needed, quota is {quota}")]
  QuotaExceeded { needed: usize, quota: usize },
}

/// Uniform key/value surface consumed by `TieredCache`.
///
/// Keys arrive already namespaced (`cache_<key>`). `clear` removes only
/// keys in that namespace.
#[async_trait]
pub trait StorageBackend: Send + Sync {
  fn kind(&self) -> StorageType;
  async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
  async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
  async fn delete(&self, key: &str) -> Result<(), StorageError>;
  async fn clear(&self) -> Result<(), StorageError>;
  /// Number of records in the `cache_` namespace
  async fn count(&self) -> Result<usize, StorageError>;
}

/// Open the backend selected by `config.storage_type`.
///
/// Returns `Ok(None)` for memory-only caches.
pub async fn open_backend(
  config: &CacheConfig,
) -> Result<Option<Arc<dyn StorageBackend>>, StorageError> {
  let backend: Arc<dyn StorageBackend> = match config.storage_type {
    StorageType::Memory => return Ok(None),
    StorageType::SessionStorage => Arc::new(SessionStorage::new()),
    StorageType::LocalStorage => Arc::new(
      LocalStorage::open(&config.local_path, config.local_quota_bytes()).await?,
    ),
    StorageType::IndexedDb => Arc::new(IndexedStorage::open(&config.indexed_path).await?),
  };
  tracing::info!("Cache backend opened: {}", backend.kind());
  Ok(Some(backend))
}
