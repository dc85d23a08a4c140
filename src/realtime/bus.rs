use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::event::RealTimeEvent;

/// Listener type that receives every event
pub const WILDCARD: &str = "*";

pub type Listener = Arc<dyn Fn(&RealTimeEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Typed publish/subscribe over inbound events.
///
/// Listeners run synchronously on the publishing task, outside any lock,
/// so a listener may subscribe or unsubscribe from within its callback.
#[derive(Default)]
pub struct EventBus {
  listeners: RwLock<HashMap<String, Vec<(ListenerId, Listener)>>>,
  next_id: AtomicU64,
}

/// Handle returned by [`EventBus::on`].
///
/// Dropping the handle leaves the listener registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
pub struct Subscription {
  bus: Weak<EventBus>,
  event_type: String,
  id: ListenerId,
}

impl Subscription {
  pub fn id(&self) -> ListenerId {
    self.id
  }

  pub fn event_type(&self) -> &str {
    &self.event_type
  }

  pub fn unsubscribe(self) {
    if let Some(bus) = self.bus.upgrade() {
      bus.off(&self.event_type, Some(self.id));
    }
  }
}

impl EventBus {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn on<F>(self: &Arc<Self>, event_type: &str, callback: F) -> Subscription
  where
    F: Fn(&RealTimeEvent) + Send + Sync + 'static,
  {
    let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
    self
      .listeners
      .write()
      .entry(event_type.to_string())
      .or_default()
      .push((id, Arc::new(callback)));

    Subscription {
      bus: Arc::downgrade(self),
      event_type: event_type.to_string(),
      id,
    }
  }

  /// Listen to every event regardless of type
  pub fn on_any<F>(self: &Arc<Self>, callback: F) -> Subscription
  where
    F: Fn(&RealTimeEvent) + Send + Sync + 'static,
  {
    self.on(WILDCARD, callback)
  }

  /// Remove one listener (`Some(id)`) or every listener for `event_type`.
  /// Returns how many were removed.
  pub fn off(&self, event_type: &str, id: Option<ListenerId>) -> usize {
    let mut listeners = self.listeners.write();
    let Some(list) = listeners.get_mut(event_type) else {
      return 0;
    };

    let before = list.len();
    match id {
      Some(id) => list.retain(|(lid, _)| *lid != id),
      None => list.clear(),
    }
    let removed = before - list.len();

    if list.is_empty() {
      listeners.remove(event_type);
    }
    removed
  }

  pub fn emit(&self, event_type: &str, data: serde_json::Value) -> usize {
    self.publish(&RealTimeEvent::new(event_type, data))
  }

  /// Invoke the listeners for `event.event_type` and then the wildcard
  /// listeners. A panicking listener is logged and skipped.
  pub fn publish(&self, event: &RealTimeEvent) -> usize {
    let snapshot: Vec<Listener> = {
      let listeners = self.listeners.read();
      let typed = listeners.get(&event.event_type).into_iter().flatten();
      let any = if event.event_type == WILDCARD {
        None
      } else {
        listeners.get(WILDCARD)
      };
      typed
        .chain(any.into_iter().flatten())
        .map(|(_, l)| l.clone())
        .collect()
    };

    for listener in &snapshot {
      if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
        tracing::error!("Listener for '{}' panicked", event.event_type);
      }
    }
    snapshot.len()
  }

  pub fn listener_count(&self, event_type: &str) -> usize {
    self
      .listeners
      .read()
      .get(event_type)
      .map(Vec::len)
      .unwrap_or(0)
  }

  pub fn clear(&self) {
    self.listeners.write().clear();
  }
}
