use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::bridge::CacheInvalidationBridge;
use crate::cache::TieredCache;
use crate::config::RippleConfig;
use crate::realtime::{ConnectionManager, EventBus, PresenceTracker, Transport, WebSocketTransport};

/// Cache, real-time client, presence tracker and invalidation bridge,
/// wired from one config.
pub struct Ripple {
  pub cache: Arc<TieredCache>,
  pub client: ConnectionManager,
  pub presence: PresenceTracker,
  pub bridge: Arc<CacheInvalidationBridge>,
  sweeper: Option<JoinHandle<()>>,
}

impl Ripple {
  /// Build over tokio-tungstenite
  pub async fn from_config(config: &RippleConfig) -> Self {
    Self::with_transport(config, Arc::new(WebSocketTransport)).await
  }

  pub async fn with_transport(config: &RippleConfig, transport: Arc<dyn Transport>) -> Self {
    let cache = Arc::new(TieredCache::from_config(config.cache.clone()).await);
    let sweeper = match config.cache.sweep_interval {
      0 => None,
      secs => Some(cache.spawn_sweeper(Duration::from_secs(secs))),
    };

    let bridge = Arc::new(
      CacheInvalidationBridge::new(cache.clone())
        .with_routes(config.invalidation.routes.iter().cloned()),
    );

    let bus = EventBus::new();
    let presence = PresenceTracker::attach(&bus);
    let client = ConnectionManager::with_bus(config.realtime.clone(), transport, bus)
      .with_bridge(bridge.clone());

    Self {
      cache,
      client,
      presence,
      bridge,
      sweeper,
    }
  }

  pub fn bus(&self) -> &Arc<EventBus> {
    self.client.bus()
  }
}

impl Drop for Ripple {
  fn drop(&mut self) {
    if let Some(sweeper) = self.sweeper.take() {
      sweeper.abort();
    }
  }
}
