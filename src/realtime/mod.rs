//! Real-time event client
//!
//! One [`ConnectionManager`] owns the socket. Inbound events are published
//! on an [`EventBus`]; a [`PresenceTracker`] and a
//! [`CacheInvalidationBridge`](crate::bridge::CacheInvalidationBridge) can
//! hang off it.
//!
//! ## Lifecycle
//!
//! ```text
//! Disconnected -> Connecting -> Connected <-> Reconnecting -> Failed
//!                               Connected  -> Disconnected   (close 1000)
//! ```
//!
//! Abnormal closes are retried `reconnect_attempts` times with delays of
//! `reconnect_delay_ms * 2^(attempt-1)`. Lifecycle changes are announced on
//! the bus as `connection:open`, `connection:close`, `connection:error` and
//! `connection:failed`.

pub mod bus;
pub mod config;
pub mod connection;
pub mod event;
pub mod presence;
pub mod queue;
pub mod status;
pub mod transport;

pub use bus::{EventBus, Listener, ListenerId, Subscription, WILDCARD};
pub use config::{OverflowPolicy, RealtimeConfig};
pub use connection::{ConnectionManager, RealtimeError, SendOptions, SendOutcome};
pub use event::{event_types, Priority, RealTimeEvent, PING_TIME};
pub use presence::{PresenceInfo, PresenceTracker};
pub use queue::{MessageQueue, QueuedMessage};
pub use status::{ConnectionState, ConnectionStatus};
pub use transport::{
  ChannelTransport, Frame, FrameSink, FrameStream, Transport, TransportError, WebSocketTransport,
  CLOSE_NORMAL,
};
