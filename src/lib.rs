//! Tiered, tag-invalidated cache and a reconnecting real-time event client.
//!
//! Inbound real-time events can invalidate cache tags through the
//! [`CacheInvalidationBridge`](bridge::CacheInvalidationBridge); [`Ripple`]
//! wires both halves from a single [`RippleConfig`].

pub mod bridge;
pub mod cache;
pub mod config;
pub mod realtime;

mod app;

pub use app::Ripple;
pub use config::RippleConfig;
