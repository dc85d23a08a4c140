//! Tiered cache implementation

use futures_util::future::join_all;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::backend::{open_backend, StorageBackend, StorageError};
use super::codec::CodecPipeline;
use super::config::CacheConfig;
use super::entry::{now_ms, storage_key, CacheEntry, SetOptions, StoredEntry, DEFAULT_VERSION};
use super::tags::TagIndex;

/// Cache statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
  pub size: usize,
  pub max_size: usize,
  pub hits: u64,
  pub misses: u64,
  pub evictions: u64,
  pub expired: u64,
  /// Approximate bytes held by the memory layer
  pub memory_usage: usize,
  /// Key of the oldest live entry
  pub oldest_key: Option<String>,
}

impl CacheStats {
  pub fn hit_rate(&self) -> f64 {
    let total = self.hits + self.misses;
    if total == 0 {
      0.0
    } else {
      self.hits as f64 / total as f64
    }
  }
}

/// Bounded in-memory LRU layer fronting an optional persistent backend.
///
/// Persistence failures never surface to callers: they are logged and the
/// cache keeps working from memory.
///
/// The memory layer is authoritative. Backend writes run one at a time in
/// the order their memory updates happened, and a record loaded from the
/// backend is only promoted if nothing removed a key while it was loading.
pub struct TieredCache {
  memory: Mutex<LruCache<String, CacheEntry>>,
  tags: RwLock<TagIndex>,
  backend: Option<Arc<dyn StorageBackend>>,
  config: CacheConfig,
  /// Held for every backend read and mutation
  writes: tokio::sync::Mutex<()>,
  /// Token of the newest unpersisted `set` per key
  pending: Mutex<HashMap<String, u64>>,
  next_token: AtomicU64,
  /// Bumped whenever a key leaves memory (delete, clear, eviction)
  removals: AtomicU64,
  hits: AtomicU64,
  misses: AtomicU64,
  evictions: AtomicU64,
  expired: AtomicU64,
}

impl TieredCache {
  pub fn new(config: CacheConfig, backend: Option<Arc<dyn StorageBackend>>) -> Self {
    let capacity = NonZeroUsize::new(config.max_size).unwrap_or(NonZeroUsize::MIN);
    Self {
      memory: Mutex::new(LruCache::new(capacity)),
      tags: RwLock::new(TagIndex::new()),
      backend,
      config,
      writes: tokio::sync::Mutex::new(()),
      pending: Mutex::new(HashMap::new()),
      next_token: AtomicU64::new(0),
      removals: AtomicU64::new(0),
      hits: AtomicU64::new(0),
      misses: AtomicU64::new(0),
      evictions: AtomicU64::new(0),
      expired: AtomicU64::new(0),
    }
  }

  /// Memory-only cache
  pub fn in_memory(config: CacheConfig) -> Self {
    Self::new(config, None)
  }

  /// Build a cache with the backend selected by `config.storage_type`.
  ///
  /// A backend that fails to open is logged and the cache runs memory-only.
  pub async fn from_config(config: CacheConfig) -> Self {
    let backend = match open_backend(&config).await {
      Ok(backend) => backend,
      Err(e) => {
        tracing::warn!(
          "Failed to open {} cache backend, running memory-only: {}",
          config.storage_type,
          e
        );
        None
      }
    };
    Self::new(config, backend)
  }

  pub fn config(&self) -> &CacheConfig {
    &self.config
  }

  pub fn backend(&self) -> Option<&Arc<dyn StorageBackend>> {
    self.backend.as_ref()
  }

  /// Store a serializable value.
  ///
  /// Only a value that cannot be represented as JSON is an error;
  /// persistence problems are absorbed.
  pub async fn set<T: Serialize + ?Sized>(
    &self,
    key: &str,
    data: &T,
    options: SetOptions,
  ) -> Result<(), serde_json::Error> {
    let value = serde_json::to_value(data)?;
    self.set_value(key, value, options).await;
    Ok(())
  }

  pub async fn set_value(&self, key: &str, data: serde_json::Value, options: SetOptions) {
    let ttl = options.ttl.unwrap_or_else(|| self.config.default_ttl());
    let version = options
      .version
      .clone()
      .unwrap_or_else(|| DEFAULT_VERSION.to_string());
    let entry = CacheEntry::new(data, ttl, version, options.priority.unwrap_or(0));

    let token = self.next_token.fetch_add(1, Ordering::Relaxed);
    let evicted = {
      let mut memory = self.memory.lock();
      self.tags.write().register(key, &options.tags);
      if self.backend.is_some() {
        self.pending.lock().insert(key.to_string(), token);
      }
      self.push_memory(&mut memory, key, entry.clone())
    };

    let Some(backend) = &self.backend else {
      return;
    };

    if let Some(evicted) = evicted {
      self.drop_backend_record(backend.as_ref(), &evicted).await;
    }

    let compress = options.compress.unwrap_or(self.config.enable_compression);
    let pipeline = CodecPipeline::from_flags(compress, self.config.enable_encryption);
    let stored = StoredEntry {
      entry,
      tags: options.tags,
    };

    let _writing = self.writes.lock().await;
    {
      // Deleted or overwritten while waiting for the backend
      let mut pending = self.pending.lock();
      if pending.get(key) != Some(&token) {
        tracing::debug!("Skipping superseded write of '{}'", key);
        return;
      }
      pending.remove(key);
    }

    if let Err(e) = persist(backend.as_ref(), key, &stored, &pipeline).await {
      tracing::warn!(
        "Cache persistence failed for '{}', continuing memory-only: {}",
        key,
        e
      );
    }
  }

  /// Fetch and deserialize a value. Type mismatches count as a miss.
  pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    let value = self.get_value(key).await?;
    match serde_json::from_value(value) {
      Ok(v) => Some(v),
      Err(e) => {
        tracing::debug!("Cached value for '{}' has unexpected shape: {}", key, e);
        None
      }
    }
  }

  pub async fn get_value(&self, key: &str) -> Option<serde_json::Value> {
    self.get_entry(key).await.map(|entry| entry.data)
  }

  /// Full entry lookup: memory first, then backend with promotion.
  pub async fn get_entry(&self, key: &str) -> Option<CacheEntry> {
    let now = now_ms();
    let (cached, removals) = {
      let mut memory = self.memory.lock();
      (memory.get(key).cloned(), self.removals.load(Ordering::SeqCst))
    };

    if let Some(entry) = cached {
      if entry.is_expired_at(now) {
        self.expire(key).await;
        self.misses.fetch_add(1, Ordering::Relaxed);
        return None;
      }
      self.hits.fetch_add(1, Ordering::Relaxed);
      return Some(entry);
    }

    let Some(backend) = &self.backend else {
      self.misses.fetch_add(1, Ordering::Relaxed);
      return None;
    };

    let Some(stored) = self.load_record(backend.as_ref(), key).await else {
      self.misses.fetch_add(1, Ordering::Relaxed);
      return None;
    };

    if stored.entry.is_expired_at(now) {
      let replaced = self.memory.lock().contains(key);
      if !replaced {
        self.expire(key).await;
      }
      self.misses.fetch_add(1, Ordering::Relaxed);
      return None;
    }

    let promoted = {
      let mut memory = self.memory.lock();
      if let Some(current) = memory.get(key).cloned() {
        // A concurrent set landed while the record was loading
        Some((current, None))
      } else if self.removals.load(Ordering::SeqCst) != removals {
        None
      } else {
        {
          let mut tags = self.tags.write();
          if !tags.contains_key(key) && !stored.tags.is_empty() {
            tags.register(key, &stored.tags);
          }
        }
        let evicted = self.push_memory(&mut memory, key, stored.entry.clone());
        Some((stored.entry, evicted))
      }
    };

    let Some((entry, evicted)) = promoted else {
      tracing::debug!("Not promoting '{}': keys were removed while it loaded", key);
      self.misses.fetch_add(1, Ordering::Relaxed);
      return None;
    };
    if let Some(evicted) = evicted {
      self.drop_backend_record(backend.as_ref(), &evicted).await;
    }
    tracing::debug!("Promoted '{}' from {} backend", key, backend.kind());

    self.hits.fetch_add(1, Ordering::Relaxed);
    Some(entry)
  }

  /// Live-entry check on the memory layer without touching LRU order or stats
  pub fn has(&self, key: &str) -> bool {
    self
      .memory
      .lock()
      .peek(key)
      .map(|e| !e.is_expired())
      .unwrap_or(false)
  }

  /// Remove a key from memory, backend and the tag index.
  pub async fn delete(&self, key: &str) {
    {
      let mut memory = self.memory.lock();
      memory.pop(key);
      self.tags.write().remove_key(key);
      self.pending.lock().remove(key);
      self.removals.fetch_add(1, Ordering::SeqCst);
    }
    if let Some(backend) = &self.backend {
      self.drop_backend_record(backend.as_ref(), key).await;
    }
  }

  /// Wipe the memory layer, the tag index and the backend namespace.
  pub async fn clear(&self) {
    {
      let mut memory = self.memory.lock();
      memory.clear();
      self.tags.write().clear();
      self.pending.lock().clear();
      self.removals.fetch_add(1, Ordering::SeqCst);
    }
    if let Some(backend) = &self.backend {
      let _writing = self.writes.lock().await;
      if let Err(e) = backend.clear().await {
        tracing::warn!("Cache backend clear failed: {}", e);
      }
    }
  }

  /// Delete exactly the keys currently indexed under `tag`.
  pub async fn invalidate_by_tag(&self, tag: &str) -> usize {
    let keys = self.tags.read().keys_for(tag);
    for key in &keys {
      self.delete(key).await;
    }
    if !keys.is_empty() {
      tracing::debug!("Invalidated {} keys tagged '{}'", keys.len(), tag);
    }
    keys.len()
  }

  /// Concurrent `set_value` fan-out. Each key stands alone; nothing is rolled back.
  pub async fn mset(&self, entries: Vec<(String, serde_json::Value, SetOptions)>) {
    join_all(
      entries
        .into_iter()
        .map(|(key, value, options)| async move { self.set_value(&key, value, options).await }),
    )
    .await;
  }

  /// Concurrent `get_value` fan-out; results line up with `keys`.
  pub async fn mget<S: AsRef<str>>(&self, keys: &[S]) -> Vec<Option<serde_json::Value>> {
    join_all(keys.iter().map(|key| self.get_value(key.as_ref()))).await
  }

  /// Live keys in the memory layer, most recently used first
  pub fn keys(&self) -> Vec<String> {
    let now = now_ms();
    self
      .memory
      .lock()
      .iter()
      .filter(|(_, e)| !e.is_expired_at(now))
      .map(|(k, _)| k.clone())
      .collect()
  }

  pub fn len(&self) -> usize {
    self.memory.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.memory.lock().is_empty()
  }

  /// Drop every expired entry from the memory layer (and its backend record).
  pub async fn purge_expired(&self) -> usize {
    let now = now_ms();
    let expired: Vec<String> = self
      .memory
      .lock()
      .iter()
      .filter(|(_, e)| e.is_expired_at(now))
      .map(|(k, _)| k.clone())
      .collect();

    for key in &expired {
      self.expire(key).await;
    }
    expired.len()
  }

  /// Periodic expiry sweep. The task ends on its own once the cache is dropped.
  pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
    let cache = Arc::downgrade(self);
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.tick().await;
      loop {
        ticker.tick().await;
        let Some(cache) = cache.upgrade() else {
          break;
        };
        let purged = cache.purge_expired().await;
        if purged > 0 {
          tracing::debug!("Swept {} expired cache keys", purged);
        }
      }
    })
  }

  pub fn get_stats(&self) -> CacheStats {
    let now = now_ms();
    let memory = self.memory.lock();

    let mut memory_usage = 0usize;
    let mut oldest: Option<(&String, i64)> = None;
    for (key, entry) in memory.iter() {
      memory_usage += key.len() + entry.approximate_size();
      if entry.is_expired_at(now) {
        continue;
      }
      if oldest.map(|(_, ts)| entry.timestamp < ts).unwrap_or(true) {
        oldest = Some((key, entry.timestamp));
      }
    }

    CacheStats {
      size: memory.len(),
      max_size: self.config.max_size,
      hits: self.hits.load(Ordering::Relaxed),
      misses: self.misses.load(Ordering::Relaxed),
      evictions: self.evictions.load(Ordering::Relaxed),
      expired: self.expired.load(Ordering::Relaxed),
      memory_usage,
      oldest_key: oldest.map(|(k, _)| k.clone()),
    }
  }

  /// Insert into the locked LRU layer; returns the key evicted to make room.
  fn push_memory(
    &self,
    memory: &mut LruCache<String, CacheEntry>,
    key: &str,
    entry: CacheEntry,
  ) -> Option<String> {
    match memory.push(key.to_string(), entry) {
      Some((evicted, _)) if evicted != key => {
        self.tags.write().remove_key(&evicted);
        self.pending.lock().remove(&evicted);
        self.removals.fetch_add(1, Ordering::SeqCst);
        self.evictions.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Evicted least recently used key '{}'", evicted);
        Some(evicted)
      }
      _ => None,
    }
  }

  async fn expire(&self, key: &str) {
    self.expired.fetch_add(1, Ordering::Relaxed);
    self.delete(key).await;
  }

  async fn drop_backend_record(&self, backend: &dyn StorageBackend, key: &str) {
    let _writing = self.writes.lock().await;
    if let Err(e) = backend.delete(&storage_key(key)).await {
      tracing::warn!("Cache backend delete failed for '{}': {}", key, e);
    }
  }

  /// Read a persisted record, discarding it if it cannot be decoded.
  async fn load_record(&self, backend: &dyn StorageBackend, key: &str) -> Option<StoredEntry> {
    let _writing = self.writes.lock().await;
    match load(backend, key).await {
      Ok(stored) => stored,
      Err(e @ (StorageError::Codec(_) | StorageError::Serialization(_))) => {
        tracing::warn!("Discarding unreadable cache record '{}': {}", key, e);
        if let Err(e) = backend.delete(&storage_key(key)).await {
          tracing::warn!("Cache backend delete failed for '{}': {}", key, e);
        }
        None
      }
      Err(e) => {
        tracing::warn!("Cache backend read failed for '{}': {}", key, e);
        None
      }
    }
  }
}

async fn persist(
  backend: &dyn StorageBackend,
  key: &str,
  stored: &StoredEntry,
  pipeline: &CodecPipeline,
) -> Result<(), StorageError> {
  let json = serde_json::to_string(stored)?;
  let encoded = pipeline.encode_str(&json)?;
  backend.set(&storage_key(key), &encoded).await
}

async fn load(backend: &dyn StorageBackend, key: &str) -> Result<Option<StoredEntry>, StorageError> {
  let Some(raw) = backend.get(&storage_key(key)).await? else {
    return Ok(None);
  };
  let json = CodecPipeline::decode_str(&raw)?;
  Ok(Some(serde_json::from_str(&json)?))
}
