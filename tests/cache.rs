//! Tiered cache tests

use async_trait::async_trait;
use ripple::cache::{
  storage_key, CacheConfig, CodecPipeline, LocalStorage, SessionStorage, SetOptions,
  StorageBackend, StorageError, StorageType, TieredCache,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn config(max_size: usize) -> CacheConfig {
  CacheConfig {
    max_size,
    ..Default::default()
  }
}

fn with_session(config: CacheConfig) -> (TieredCache, Arc<SessionStorage>) {
  let session = Arc::new(SessionStorage::new());
  let backend: Arc<dyn StorageBackend> = session.clone();
  (TieredCache::new(config, Some(backend)), session)
}

// =============================================================================
// Basic Operations
// =============================================================================

#[tokio::test]
async fn test_set_and_get() {
  let cache = TieredCache::in_memory(config(10));
  cache
    .set("greeting", &json!({"text": "hello"}), SetOptions::new())
    .await
    .unwrap();

  assert_eq!(
    cache.get_value("greeting").await,
    Some(json!({"text": "hello"}))
  );
  assert_eq!(cache.get_value("missing").await, None);
}

#[tokio::test]
async fn test_typed_get() {
  #[derive(Debug, PartialEq, Serialize, Deserialize)]
  struct User {
    id: u32,
    name: String,
  }

  let cache = TieredCache::in_memory(config(10));
  let user = User {
    id: 1,
    name: "Alice".into(),
  };
  cache.set("user:1", &user, SetOptions::new()).await.unwrap();

  assert_eq!(cache.get::<User>("user:1").await, Some(user));
  // Wrong shape reads as a miss
  assert_eq!(cache.get::<Vec<u8>>("user:1").await, None);
}

#[tokio::test]
async fn test_entry_metadata() {
  let cache = TieredCache::in_memory(config(10));
  cache
    .set(
      "k",
      &1,
      SetOptions::new()
        .ttl(Duration::from_secs(60))
        .priority(7)
        .version("2.1"),
    )
    .await
    .unwrap();

  let entry = cache.get_entry("k").await.unwrap();
  assert_eq!(entry.ttl, 60_000);
  assert_eq!(entry.priority, 7);
  assert_eq!(entry.version, "2.1");
}

#[tokio::test]
async fn test_default_ttl_and_version() {
  let cache = TieredCache::in_memory(CacheConfig {
    default_ttl_ms: 1234,
    ..Default::default()
  });
  cache.set("k", &1, SetOptions::new()).await.unwrap();

  let entry = cache.get_entry("k").await.unwrap();
  assert_eq!(entry.ttl, 1234);
  assert_eq!(entry.version, "1.0");
  assert_eq!(entry.priority, 0);
}

#[tokio::test]
async fn test_delete() {
  let (cache, session) = with_session(config(10));
  cache
    .set("k", &1, SetOptions::new().tag("numbers"))
    .await
    .unwrap();
  assert!(session.get(&storage_key("k")).await.unwrap().is_some());

  cache.delete("k").await;

  assert_eq!(cache.get_value("k").await, None);
  assert!(session.get(&storage_key("k")).await.unwrap().is_none());
  assert_eq!(cache.invalidate_by_tag("numbers").await, 0);
}

#[tokio::test]
async fn test_clear_keeps_foreign_backend_keys() {
  let (cache, session) = with_session(config(10));
  session.set("theme", "dark").await.unwrap();
  cache.set("a", &1, SetOptions::new()).await.unwrap();
  cache.set("b", &2, SetOptions::new()).await.unwrap();

  cache.clear().await;

  assert!(cache.is_empty());
  assert_eq!(cache.get_value("a").await, None);
  assert_eq!(session.len(), 1);
  assert_eq!(session.get("theme").await.unwrap().as_deref(), Some("dark"));
}

// =============================================================================
// Expiry Tests
// =============================================================================

#[tokio::test]
async fn test_ttl_expiry() {
  let cache = TieredCache::in_memory(config(10));
  cache
    .set("a", &1, SetOptions::new().ttl(Duration::from_millis(100)))
    .await
    .unwrap();

  assert_eq!(cache.get_value("a").await, Some(json!(1)));

  tokio::time::sleep(Duration::from_millis(150)).await;
  assert_eq!(cache.get_value("a").await, None);
  assert_eq!(cache.get_stats().expired, 1);
}

#[tokio::test]
async fn test_zero_ttl_is_immediately_expired() {
  let cache = TieredCache::in_memory(config(10));
  cache
    .set("a", &1, SetOptions::new().ttl(Duration::ZERO))
    .await
    .unwrap();
  assert_eq!(cache.get_value("a").await, None);
}

#[tokio::test]
async fn test_expiry_removes_backend_record_and_tags() {
  let (cache, session) = with_session(config(10));
  cache
    .set(
      "a",
      &1,
      SetOptions::new().ttl(Duration::from_millis(50)).tag("t"),
    )
    .await
    .unwrap();
  cache
    .set("b", &2, SetOptions::new().tag("t"))
    .await
    .unwrap();

  tokio::time::sleep(Duration::from_millis(80)).await;
  assert_eq!(cache.get_value("a").await, None);
  assert!(session.get(&storage_key("a")).await.unwrap().is_none());

  // Only the live key is left under the tag
  assert_eq!(cache.invalidate_by_tag("t").await, 1);
}

#[tokio::test]
async fn test_purge_expired() {
  let cache = TieredCache::in_memory(config(10));
  cache
    .set("short", &1, SetOptions::new().ttl(Duration::from_millis(20)))
    .await
    .unwrap();
  cache.set("long", &2, SetOptions::new()).await.unwrap();

  tokio::time::sleep(Duration::from_millis(40)).await;
  assert_eq!(cache.purge_expired().await, 1);
  assert_eq!(cache.keys(), vec!["long"]);
}

#[tokio::test]
async fn test_sweeper_purges_in_background() {
  let cache = Arc::new(TieredCache::in_memory(config(10)));
  cache
    .set("a", &1, SetOptions::new().ttl(Duration::from_millis(10)))
    .await
    .unwrap();

  let sweeper = cache.spawn_sweeper(Duration::from_millis(20));
  tokio::time::sleep(Duration::from_millis(100)).await;

  assert_eq!(cache.len(), 0);
  sweeper.abort();
}

#[tokio::test]
async fn test_max_ttl_entry_is_readable() {
  let (cache, _session) = with_session(config(10));
  cache
    .set("k", &1, SetOptions::new().ttl(Duration::from_millis(u64::MAX)))
    .await
    .unwrap();
  cache
    .set("forever", &2, SetOptions::new().ttl(Duration::MAX))
    .await
    .unwrap();

  assert_eq!(cache.get_value("k").await, Some(json!(1)));
  assert_eq!(cache.get_value("forever").await, Some(json!(2)));
  assert_eq!(cache.purge_expired().await, 0);
}

// =============================================================================
// Tag Invalidation Tests
// =============================================================================

#[tokio::test]
async fn test_invalidate_by_tag() {
  let cache = TieredCache::in_memory(config(10));
  cache
    .set("p1", &"x", SetOptions::new().tag("posts"))
    .await
    .unwrap();
  cache
    .set("p2", &"y", SetOptions::new().tag("posts"))
    .await
    .unwrap();
  cache
    .set("u1", &"z", SetOptions::new().tag("users"))
    .await
    .unwrap();

  assert_eq!(cache.invalidate_by_tag("posts").await, 2);

  assert_eq!(cache.get_value("p1").await, None);
  assert_eq!(cache.get_value("p2").await, None);
  assert_eq!(cache.get_value("u1").await, Some(json!("z")));
}

#[tokio::test]
async fn test_retag_on_set() {
  let cache = TieredCache::in_memory(config(10));
  cache
    .set("p1", &1, SetOptions::new().tags(["posts", "feed"]))
    .await
    .unwrap();
  cache
    .set("p1", &2, SetOptions::new().tag("archive"))
    .await
    .unwrap();

  // The key left its previous tags
  assert_eq!(cache.invalidate_by_tag("posts").await, 0);
  assert_eq!(cache.get_value("p1").await, Some(json!(2)));
  assert_eq!(cache.invalidate_by_tag("archive").await, 1);
}

#[tokio::test]
async fn test_invalidate_ignores_ttl() {
  let cache = TieredCache::in_memory(config(10));
  cache
    .set(
      "p1",
      &1,
      SetOptions::new()
        .ttl(Duration::from_secs(3600))
        .tag("posts"),
    )
    .await
    .unwrap();

  assert_eq!(cache.invalidate_by_tag("posts").await, 1);
  assert!(!cache.has("p1"));
}

// =============================================================================
// Batch Tests
// =============================================================================

#[tokio::test]
async fn test_mset_mget() {
  let cache = TieredCache::in_memory(config(10));
  cache
    .mset(vec![
      ("a".to_string(), json!(1), SetOptions::new()),
      ("b".to_string(), json!({"n": 2}), SetOptions::new().tag("t")),
      ("c".to_string(), json!([3]), SetOptions::new()),
    ])
    .await;

  let values = cache.mget(&["a", "missing", "b", "c"]).await;
  assert_eq!(
    values,
    vec![Some(json!(1)), None, Some(json!({"n": 2})), Some(json!([3]))]
  );
}

// =============================================================================
// Eviction Tests
// =============================================================================

#[tokio::test]
async fn test_lru_eviction_cleans_backend() {
  let (cache, session) = with_session(config(2));
  cache.set("a", &1, SetOptions::new()).await.unwrap();
  cache.set("b", &2, SetOptions::new()).await.unwrap();

  // Touch `a` so `b` becomes least recently used
  assert!(cache.get_value("a").await.is_some());
  cache.set("c", &3, SetOptions::new()).await.unwrap();

  assert!(cache.has("a"));
  assert!(!cache.has("b"));
  assert!(cache.has("c"));
  assert!(session.get(&storage_key("b")).await.unwrap().is_none());
  assert!(session.get(&storage_key("a")).await.unwrap().is_some());
  assert_eq!(cache.get_stats().evictions, 1);
}

#[tokio::test]
async fn test_overwrite_does_not_evict() {
  let cache = TieredCache::in_memory(config(2));
  cache.set("a", &1, SetOptions::new()).await.unwrap();
  cache.set("b", &2, SetOptions::new()).await.unwrap();
  cache.set("a", &3, SetOptions::new()).await.unwrap();

  assert_eq!(cache.len(), 2);
  assert_eq!(cache.get_stats().evictions, 0);
  assert_eq!(cache.get_value("a").await, Some(json!(3)));
}

// =============================================================================
// Backend Tests
// =============================================================================

#[tokio::test]
async fn test_promotion_from_backend() {
  let session = Arc::new(SessionStorage::new());
  let backend: Arc<dyn StorageBackend> = session.clone();

  let writer = TieredCache::new(config(10), Some(backend.clone()));
  writer
    .set("p1", &"x", SetOptions::new().tag("posts"))
    .await
    .unwrap();

  // A fresh memory layer over the same backend
  let reader = TieredCache::new(config(10), Some(backend));
  assert!(!reader.has("p1"));
  assert_eq!(reader.get_value("p1").await, Some(json!("x")));
  assert!(reader.has("p1"));

  // Promoted entries rejoin the tag index
  assert_eq!(reader.invalidate_by_tag("posts").await, 1);
  assert!(session.get(&storage_key("p1")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_expired_backend_record_is_a_miss() {
  let session = Arc::new(SessionStorage::new());
  let backend: Arc<dyn StorageBackend> = session.clone();

  let writer = TieredCache::new(config(10), Some(backend.clone()));
  writer
    .set("k", &1, SetOptions::new().ttl(Duration::from_millis(30)))
    .await
    .unwrap();

  tokio::time::sleep(Duration::from_millis(60)).await;
  let reader = TieredCache::new(config(10), Some(backend));
  assert_eq!(reader.get_value("k").await, None);
  assert!(session.is_empty());
}

#[tokio::test]
async fn test_corrupt_record_is_discarded() {
  let (cache, session) = with_session(config(10));
  session.set(&storage_key("bad"), "gzip:!!!").await.unwrap();
  session
    .set(&storage_key("worse"), "plain:{not json")
    .await
    .unwrap();

  assert_eq!(cache.get_value("bad").await, None);
  assert_eq!(cache.get_value("worse").await, None);
  assert!(session.is_empty());
}

#[tokio::test]
async fn test_persisted_encoding_follows_flags() {
  let (cache, session) = with_session(CacheConfig {
    enable_compression: true,
    enable_encryption: true,
    ..Default::default()
  });
  cache
    .set("k", &json!({"body": "x".repeat(200)}), SetOptions::new())
    .await
    .unwrap();
  cache
    .set("plain", &1, SetOptions::new().compress(false))
    .await
    .unwrap();

  let raw = session.get(&storage_key("k")).await.unwrap().unwrap();
  assert!(raw.starts_with("gzip+obfuscate:"));
  let decoded: serde_json::Value =
    serde_json::from_str(&CodecPipeline::decode_str(&raw).unwrap()).unwrap();
  assert_eq!(decoded["data"]["body"].as_str().unwrap().len(), 200);

  let raw = session.get(&storage_key("plain")).await.unwrap().unwrap();
  assert!(raw.starts_with("obfuscate:"));

  // Readable by a cache configured without codecs
  let backend: Arc<dyn StorageBackend> = session.clone();
  let reader = TieredCache::new(config(10), Some(backend));
  assert_eq!(reader.get_value("plain").await, Some(json!(1)));
}

#[tokio::test]
async fn test_persistence_failure_degrades_to_memory() {
  let dir = tempfile::tempdir().unwrap();
  let local = LocalStorage::open(dir.path().join("store.json"), 16)
    .await
    .unwrap();
  let backend: Arc<dyn StorageBackend> = Arc::new(local);
  let cache = TieredCache::new(config(10), Some(backend.clone()));

  // Record exceeds the 16 byte quota
  cache
    .set("big", &"x".repeat(100), SetOptions::new())
    .await
    .unwrap();

  assert_eq!(cache.get_value("big").await, Some(json!("x".repeat(100))));
  assert!(backend.get(&storage_key("big")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_from_config_falls_back_to_memory() {
  let dir = tempfile::tempdir().unwrap();
  let blocker = dir.path().join("file");
  std::fs::write(&blocker, b"not a directory").unwrap();

  let cache = TieredCache::from_config(CacheConfig {
    storage_type: StorageType::IndexedDb,
    indexed_path: blocker.join("CacheDB.sqlite").to_string_lossy().into_owned(),
    ..Default::default()
  })
  .await;

  assert!(cache.backend().is_none());
  cache.set("k", &1, SetOptions::new()).await.unwrap();
  assert_eq!(cache.get_value("k").await, Some(json!(1)));
}

// =============================================================================
// Concurrency Tests
// =============================================================================

/// Session storage with artificial read and write latency
struct SlowBackend {
  inner: Arc<SessionStorage>,
  read_delay: Duration,
  write_delay: Duration,
}

impl SlowBackend {
  fn new(inner: Arc<SessionStorage>, read_ms: u64, write_ms: u64) -> Self {
    Self {
      inner,
      read_delay: Duration::from_millis(read_ms),
      write_delay: Duration::from_millis(write_ms),
    }
  }
}

#[async_trait]
impl StorageBackend for SlowBackend {
  fn kind(&self) -> StorageType {
    StorageType::SessionStorage
  }

  async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
    tokio::time::sleep(self.read_delay).await;
    self.inner.get(key).await
  }

  async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
    tokio::time::sleep(self.write_delay).await;
    self.inner.set(key, value).await
  }

  async fn delete(&self, key: &str) -> Result<(), StorageError> {
    self.inner.delete(key).await
  }

  async fn clear(&self) -> Result<(), StorageError> {
    self.inner.clear().await
  }

  async fn count(&self) -> Result<usize, StorageError> {
    self.inner.count().await
  }
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_during_slow_write_sticks() {
  let session = Arc::new(SessionStorage::new());
  let backend: Arc<dyn StorageBackend> = Arc::new(SlowBackend::new(session.clone(), 0, 50));
  let cache = Arc::new(TieredCache::new(config(10), Some(backend)));

  let writer = {
    let cache = cache.clone();
    tokio::spawn(async move {
      cache
        .set("p1", &"x", SetOptions::new().tag("posts"))
        .await
        .unwrap();
    })
  };
  tokio::time::sleep(Duration::from_millis(10)).await;

  assert_eq!(cache.invalidate_by_tag("posts").await, 1);
  writer.await.unwrap();

  assert_eq!(cache.get_value("p1").await, None);
  assert!(session.get(&storage_key("p1")).await.unwrap().is_none());
  assert_eq!(cache.invalidate_by_tag("posts").await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_writes_persist_latest() {
  let session = Arc::new(SessionStorage::new());
  let backend: Arc<dyn StorageBackend> = Arc::new(SlowBackend::new(session.clone(), 0, 50));
  let cache = Arc::new(TieredCache::new(config(10), Some(backend)));

  let first = {
    let cache = cache.clone();
    tokio::spawn(async move { cache.set("k", &1, SetOptions::new()).await.unwrap() })
  };
  tokio::time::sleep(Duration::from_millis(10)).await;
  cache.set("k", &2, SetOptions::new()).await.unwrap();
  first.await.unwrap();

  assert_eq!(cache.get_value("k").await, Some(json!(2)));
  // A fresh memory layer sees the same value
  let session_backend: Arc<dyn StorageBackend> = session;
  let reader = TieredCache::new(config(10), Some(session_backend));
  assert_eq!(reader.get_value("k").await, Some(json!(2)));
}

#[tokio::test(start_paused = true)]
async fn test_slow_promotion_does_not_clobber_newer_set() {
  let session = Arc::new(SessionStorage::new());
  let seed = TieredCache::new(config(10), Some(session.clone() as Arc<dyn StorageBackend>));
  seed.set("k", &"old", SetOptions::new()).await.unwrap();

  let backend: Arc<dyn StorageBackend> = Arc::new(SlowBackend::new(session, 50, 0));
  let cache = Arc::new(TieredCache::new(config(10), Some(backend)));

  let reader = {
    let cache = cache.clone();
    tokio::spawn(async move { cache.get_value("k").await })
  };
  tokio::time::sleep(Duration::from_millis(10)).await;
  cache.set("k", &"new", SetOptions::new()).await.unwrap();

  assert_eq!(reader.await.unwrap(), Some(json!("new")));
  assert_eq!(cache.get_value("k").await, Some(json!("new")));
}

#[tokio::test(start_paused = true)]
async fn test_delete_during_slow_promotion_is_not_undone() {
  let session = Arc::new(SessionStorage::new());
  let seed = TieredCache::new(config(10), Some(session.clone() as Arc<dyn StorageBackend>));
  seed
    .set("p1", &"x", SetOptions::new().tag("posts"))
    .await
    .unwrap();

  let backend: Arc<dyn StorageBackend> = Arc::new(SlowBackend::new(session.clone(), 50, 0));
  let cache = Arc::new(TieredCache::new(config(10), Some(backend)));

  let reader = {
    let cache = cache.clone();
    tokio::spawn(async move { cache.get_value("p1").await })
  };
  tokio::time::sleep(Duration::from_millis(10)).await;
  cache.delete("p1").await;

  assert_eq!(reader.await.unwrap(), None);
  assert!(!cache.has("p1"));
  assert!(session.get(&storage_key("p1")).await.unwrap().is_none());
}

// =============================================================================
// Stats Tests
// =============================================================================

#[tokio::test]
async fn test_stats() {
  let cache = TieredCache::in_memory(config(10));
  cache.set("first", &1, SetOptions::new()).await.unwrap();
  tokio::time::sleep(Duration::from_millis(5)).await;
  cache.set("second", &"two", SetOptions::new()).await.unwrap();

  cache.get_value("first").await;
  cache.get_value("second").await;
  cache.get_value("third").await;

  let stats = cache.get_stats();
  assert_eq!(stats.size, 2);
  assert_eq!(stats.max_size, 10);
  assert_eq!(stats.hits, 2);
  assert_eq!(stats.misses, 1);
  assert!((stats.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
  assert!(stats.memory_usage > 0);
  assert_eq!(stats.oldest_key.as_deref(), Some("first"));
}

#[tokio::test]
async fn test_empty_stats() {
  let cache = TieredCache::in_memory(config(10));
  let stats = cache.get_stats();
  assert_eq!(stats.size, 0);
  assert_eq!(stats.hit_rate(), 0.0);
  assert_eq!(stats.oldest_key, None);
}

#[tokio::test]
async fn test_has_does_not_count() {
  let cache = TieredCache::in_memory(config(10));
  cache.set("a", &1, SetOptions::new()).await.unwrap();
  assert!(cache.has("a"));
  assert!(!cache.has("b"));

  let stats = cache.get_stats();
  assert_eq!(stats.hits + stats.misses, 0);
}
