//! Cache configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Persistent layer behind the in-memory store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
  /// Memory only, no persistent backend
  #[default]
  Memory,
  /// Durable file-backed key/value store
  #[serde(alias = "localStorage", alias = "local")]
  LocalStorage,
  /// Key/value store that lives as long as the process
  #[serde(alias = "sessionStorage", alias = "session")]
  SessionStorage,
  /// SQLite record store (`CacheDB`)
  #[serde(alias = "indexedDB", alias = "indexedDb", alias = "indexed", alias = "sqlite")]
  IndexedDb,
}

impl std::str::FromStr for StorageType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "memory" => Ok(StorageType::Memory),
      "localstorage" | "local" => Ok(StorageType::LocalStorage),
      "sessionstorage" | "session" => Ok(StorageType::SessionStorage),
      "indexeddb" | "indexed" | "sqlite" => Ok(StorageType::IndexedDb),
      _ => Err(format!("Unknown storage type: {}", s)),
    }
  }
}

impl std::fmt::Display for StorageType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      StorageType::Memory => write!(f, "memory"),
      StorageType::LocalStorage => write!(f, "localstorage"),
      StorageType::SessionStorage => write!(f, "sessionstorage"),
      StorageType::IndexedDb => write!(f, "indexeddb"),
    }
  }
}

/// Tiered cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
  /// Maximum number of entries held in memory
  #[serde(default = "default_max_size")]
  pub max_size: usize,

  /// TTL applied when `set` is called without one (milliseconds)
  #[serde(default = "default_ttl_ms")]
  pub default_ttl_ms: u64,

  /// Gzip persisted payloads
  #[serde(default)]
  pub enable_compression: bool,

  /// Run persisted payloads through the obfuscation placeholder
  #[serde(default)]
  pub enable_encryption: bool,

  #[serde(default)]
  pub storage_type: StorageType,

  /// File used by the local storage backend
  #[serde(default = "default_local_path")]
  pub local_path: String,

  /// Quota for the local storage backend (e.g. "5mb")
  #[serde(default = "default_local_quota")]
  pub local_quota: String,

  /// Database file for the indexed-record backend
  #[serde(default = "default_indexed_path")]
  pub indexed_path: String,

  /// Interval of the background expiry sweep in seconds (0 = disabled)
  #[serde(default)]
  pub sweep_interval: u64,
}

fn default_max_size() -> usize {
  1000
}

fn default_ttl_ms() -> u64 {
  5 * 60 * 1000 // 5 minutes
}

fn default_local_path() -> String {
  "./data/local_storage.json".to_string()
}

fn default_local_quota() -> String {
  "5mb".to_string()
}

fn default_indexed_path() -> String {
  "./data/CacheDB.sqlite".to_string()
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      max_size: default_max_size(),
      default_ttl_ms: default_ttl_ms(),
      enable_compression: false,
      enable_encryption: false,
      storage_type: StorageType::default(),
      local_path: default_local_path(),
      local_quota: default_local_quota(),
      indexed_path: default_indexed_path(),
      sweep_interval: 0,
    }
  }
}

impl CacheConfig {
  pub fn default_ttl(&self) -> Duration {
    Duration::from_millis(self.default_ttl_ms)
  }

  /// Local storage quota in bytes
  pub fn local_quota_bytes(&self) -> usize {
    parse_memory_size(&self.local_quota).unwrap_or(5 * 1024 * 1024)
  }
}

/// Parse a memory size string to bytes
/// Supports: b, kb, mb, gb (case insensitive)
pub fn parse_memory_size(s: &str) -> Option<usize> {
  let s = s.trim().to_lowercase();

  let (digits, multiplier) = if let Some(n) = s.strip_suffix("gb") {
    (n, 1024 * 1024 * 1024)
  } else if let Some(n) = s.strip_suffix("mb") {
    (n, 1024 * 1024)
  } else if let Some(n) = s.strip_suffix("kb") {
    (n, 1024)
  } else if let Some(n) = s.strip_suffix('b') {
    (n, 1)
  } else {
    // Assume bytes if no suffix
    (s.as_str(), 1)
  };

  digits
    .trim()
    .parse::<usize>()
    .ok()
    .and_then(|n| n.checked_mul(multiplier))
}

/// Format bytes as human-readable string
pub fn format_memory_size(bytes: usize) -> String {
  const GB: usize = 1024 * 1024 * 1024;
  const MB: usize = 1024 * 1024;
  const KB: usize = 1024;

  if bytes >= GB {
    format!("{:.1}GB", bytes as f64 / GB as f64)
  } else if bytes >= MB {
    format!("{:.1}MB", bytes as f64 / MB as f64)
  } else if bytes >= KB {
    format!("{:.1}KB", bytes as f64 / KB as f64)
  } else {
    format!("{}B", bytes)
  }
}
