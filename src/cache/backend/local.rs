use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{StorageBackend, StorageError};
use crate::cache::config::StorageType;
use crate::cache::entry::KEY_PREFIX;

/// Durable key/value store persisted to a single JSON file.
///
/// Every mutation rewrites the file through a temp file + rename, so a crash
/// leaves either the old or the new contents. The total size of keys and
/// values is capped by `quota`.
pub struct LocalStorage {
  path: PathBuf,
  quota: usize,
  data: RwLock<HashMap<String, String>>,
  /// Serializes file writes so they land in mutation order
  write_lock: Mutex<()>,
}

impl LocalStorage {
  pub async fn open(path: impl AsRef<Path>, quota: usize) -> Result<Self, StorageError> {
    let path = path.as_ref().to_path_buf();
    let data = if fs::try_exists(&path).await? {
      let raw = fs::read(&path).await?;
      if raw.is_empty() {
        HashMap::new()
      } else {
        serde_json::from_slice(&raw)?
      }
    } else {
      HashMap::new()
    };

    tracing::debug!(
      "Local storage opened at {} with {} keys",
      path.display(),
      data.len()
    );

    Ok(Self {
      path,
      quota,
      data: RwLock::new(data),
      write_lock: Mutex::new(()),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Bytes currently used (keys + values)
  pub fn used(&self) -> usize {
    self
      .data
      .read()
      .iter()
      .map(|(k, v)| k.len() + v.len())
      .sum()
  }

  async fn flush(&self) -> Result<(), StorageError> {
    let _guard = self.write_lock.lock().await;
    // Snapshot under the write lock so the file reflects the latest state
    let json = serde_json::to_vec(&*self.data.read())?;

    if let Some(parent) = self.path.parent() {
      if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent).await?;
      }
    }

    let temp_path = self.path.with_extension("tmp");
    let mut file = fs::File::create(&temp_path).await?;
    file.write_all(&json).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&temp_path, &self.path).await?;
    Ok(())
  }
}

#[async_trait]
impl StorageBackend for LocalStorage {
  fn kind(&self) -> StorageType {
    StorageType::LocalStorage
  }

  async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
    Ok(self.data.read().get(key).cloned())
  }

  async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
    {
      let mut data = self.data.write();
      let current: usize = data.iter().map(|(k, v)| k.len() + v.len()).sum();
      let replaced = data.get(key).map(|v| key.len() + v.len()).unwrap_or(0);
      let needed = current - replaced + key.len() + value.len();
      if needed > self.quota {
        return Err(StorageError::QuotaExceeded {
          needed,
          quota: self.quota,
        });
      }
      data.insert(key.to_string(), value.to_string());
    }
    self.flush().await
  }

  async fn delete(&self, key: &str) -> Result<(), StorageError> {
    let removed = self.data.write().remove(key).is_some();
    if removed {
      self.flush().await?;
    }
    Ok(())
  }

  async fn clear(&self) -> Result<(), StorageError> {
    self.data.write().retain(|k, _| !k.starts_with(KEY_PREFIX));
    self.flush().await
  }

  async fn count(&self) -> Result<usize, StorageError> {
    Ok(
      self
        .data
        .read()
        .keys()
        .filter(|k| k.starts_with(KEY_PREFIX))
        .count(),
    )
  }
}
