use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{StorageBackend, StorageError};
use crate::cache::config::StorageType;
use crate::cache::entry::KEY_PREFIX;

/// Process-lifetime key/value store.
///
/// Data survives `TieredCache::clear` of the memory layer and promotion
/// round-trips, but not the process. Clones of the owning `Arc` share it.
#[derive(Debug, Default)]
pub struct SessionStorage {
  data: RwLock<HashMap<String, String>>,
}

impl SessionStorage {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.data.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.read().is_empty()
  }
}

#[async_trait]
impl StorageBackend for SessionStorage {
  fn kind(&self) -> StorageType {
    StorageType::SessionStorage
  }

  async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
    Ok(self.data.read().get(key).cloned())
  }

  async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
    self.data.write().insert(key.to_string(), value.to_string());
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<(), StorageError> {
    self.data.write().remove(key);
    Ok(())
  }

  async fn clear(&self) -> Result<(), StorageError> {
    self.data.write().retain(|k, _| !k.starts_with(KEY_PREFIX));
    Ok(())
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
