//! Cache entry types

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Namespace prefix for every record written to a persistent backend
pub const KEY_PREFIX: &str = "cache_";

/// Version stamped on entries when the caller does not supply one
pub const DEFAULT_VERSION: &str = "1.0";

/// Backend key for a cache key
pub fn storage_key(key: &str) -> String {
  format!("{}{}", KEY_PREFIX, key)
}

/// Wall-clock time in epoch milliseconds
pub fn now_ms() -> i64 {
  chrono::Utc::now().timestamp_millis()
}

/// A cached value with its expiry metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T = serde_json::Value> {
  pub data: T,
  /// Creation time (epoch ms)
  pub timestamp: i64,
  /// Time-to-live in milliseconds
  pub ttl: u64,
  pub version: String,
  pub priority: i32,
}

impl<T> CacheEntry<T> {
  pub fn new(data: T, ttl: Duration, version: impl Into<String>, priority: i32) -> Self {
    Self {
      data,
      timestamp: now_ms(),
      ttl: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
      version: version.into(),
      priority,
    }
  }

  /// An entry is expired once `now - timestamp` reaches its TTL.
  pub fn is_expired_at(&self, now: i64) -> bool {
    now.saturating_sub(self.timestamp) >= self.ttl_ms()
  }

  pub fn is_expired(&self) -> bool {
    self.is_expired_at(now_ms())
  }

  pub fn expires_at(&self) -> i64 {
    self.timestamp.saturating_add(self.ttl_ms())
  }

  /// TTL as a signed offset, saturating for effectively infinite TTLs
  fn ttl_ms(&self) -> i64 {
    i64::try_from(self.ttl).unwrap_or(i64::MAX)
  }

  pub fn ttl_remaining(&self) -> Option<Duration> {
    let remaining = self.expires_at() - now_ms();
    if remaining <= 0 {
      None
    } else {
      Some(Duration::from_millis(remaining as u64))
    }
  }
}

impl CacheEntry<serde_json::Value> {
  /// Size in bytes (approximate)
  pub fn approximate_size(&self) -> usize {
    estimate_json_size(&self.data) + self.version.len() + 24
  }
}

pub(crate) fn estimate_json_size(v: &serde_json::Value) -> usize {
  match v {
    serde_json::Value::Null => 4,
    serde_json::Value::Bool(_) => 5,
    serde_json::Value::Number(_) => 8,
    serde_json::Value::String(s) => s.len() + 2,
    serde_json::Value::Array(arr) => arr.iter().map(estimate_json_size).sum::<usize>() + arr.len(),
    serde_json::Value::Object(map) => map
      .iter()
      .map(|(k, v)| k.len() + estimate_json_size(v) + 4)
      .sum(),
  }
}

/// Per-call options for `TieredCache::set`
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
  /// Custom TTL (None = configured default)
  pub ttl: Option<Duration>,
  pub priority: Option<i32>,
  /// Tags for bulk invalidation
  pub tags: Vec<String>,
  pub version: Option<String>,
  /// Override the configured compression flag for this entry
  pub compress: Option<bool>,
}

impl SetOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn ttl(mut self, ttl: Duration) -> Self {
    self.ttl = Some(ttl);
    self
  }

  pub fn priority(mut self, priority: i32) -> Self {
    self.priority = Some(priority);
    self
  }

  pub fn tag(mut self, tag: impl Into<String>) -> Self {
    self.tags.push(tag.into());
    self
  }

  pub fn tags<I, S>(mut self, tags: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.tags.extend(tags.into_iter().map(Into::into));
    self
  }

  pub fn version(mut self, version: impl Into<String>) -> Self {
    self.version = Some(version.into());
    self
  }

  pub fn compress(mut self, compress: bool) -> Self {
    self.compress = Some(compress);
    self
  }
}

/// Persisted form of an entry (what backends store, before encoding)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEntry {
  #[serde(flatten)]
  pub entry: CacheEntry,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub tags: Vec<String>,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_expiry_boundary() {
    let mut entry = CacheEntry::new(json!(1), Duration::from_millis(100), DEFAULT_VERSION, 0);
    entry.timestamp = 1_000;

    assert!(!entry.is_expired_at(1_000));
    assert!(!entry.is_expired_at(1_099));
    assert!(entry.is_expired_at(1_100));
    assert!(entry.is_expired_at(5_000));
  }

  #[test]
  fn test_huge_ttl_never_expires() {
    let entry = CacheEntry::new(json!(1), Duration::from_millis(u64::MAX), DEFAULT_VERSION, 0);
    assert_eq!(entry.ttl, u64::MAX);
    assert!(!entry.is_expired());
    assert_eq!(entry.expires_at(), i64::MAX);
    assert!(entry.ttl_remaining().is_some());

    let entry = CacheEntry::new(json!(1), Duration::MAX, DEFAULT_VERSION, 0);
    assert_eq!(entry.ttl, u64::MAX);
    assert!(!entry.is_expired());
  }

  #[test]
  fn test_storage_key() {
    assert_eq!(storage_key("user:1"), "cache_user:1");
  }

  #[test]
  fn test_stored_entry_flattens() {
    let entry = CacheEntry::new(json!({"a": 1}), Duration::from_secs(1), "2", 5);
    let stored = StoredEntry {
      entry,
      tags: vec!["posts".into()],
    };
    let value = serde_json::to_value(&stored).unwrap();
    assert_eq!(value["data"]["a"], 1);
    assert_eq!(value["ttl"], 1000);
    assert_eq!(value["version"], "2");
    assert_eq!(value["tags"][0], "posts");
  }

  #[test]
  fn test_set_options_builder() {
    let options = SetOptions::new()
      .ttl(Duration::from_secs(5))
      .tag("posts")
      .tags(["feed", "home"])
      .priority(3)
      .compress(true);
    assert_eq!(options.tags, vec!["posts", "feed", "home"]);
    assert_eq!(options.priority, Some(3));
    assert_eq!(options.compress, Some(true));
  }
}
