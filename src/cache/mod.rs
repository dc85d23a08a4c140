//! Tiered cache
//!
//! A bounded in-memory LRU layer in front of an optional persistent
//! backend. Entries carry a TTL and an optional tag set; tags allow bulk
//! invalidation of related keys (e.g. every cached post when a `post:*`
//! event arrives).
//!
//! ## Storage Types
//!
//! - `memory` - no persistence
//! - `localstorage` - durable JSON file with a byte quota
//! - `sessionstorage` - in-process store that lives as long as the process
//! - `indexeddb` - SQLite record store (`CacheDB`)
//!
//! Persistent records live under `cache_<key>` and are written through a
//! [`CodecPipeline`] (optional gzip, optional base64 obfuscation).

pub mod backend;
pub mod codec;
pub mod config;
pub mod entry;
pub mod store;
pub mod tags;

pub use backend::{
  open_backend, IndexedStorage, LocalStorage, SessionStorage, StorageBackend, StorageError,
  DATABASE_NAME, SCHEMA_VERSION,
};
pub use codec::{Codec, CodecError, CodecPipeline, GzipCodec, ObfuscationCodec};
pub use config::{format_memory_size, parse_memory_size, CacheConfig, StorageType};
pub use entry::{now_ms, storage_key, CacheEntry, SetOptions, StoredEntry, KEY_PREFIX};
pub use store::{CacheStats, TieredCache};
pub use tags::TagIndex;
