use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::bus::{EventBus, Subscription};
use super::event::{event_types, RealTimeEvent};

/// Last-known presence payload of a user
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresenceInfo {
  pub payload: Value,
  /// Timestamp of the event that carried the payload (epoch ms)
  pub updated_at: i64,
}

impl PresenceInfo {
  /// A user is online unless their payload says `"status": "offline"`
  pub fn is_online(&self) -> bool {
    self.payload.get("status").and_then(Value::as_str) != Some("offline")
  }
}

#[derive(Debug, Default)]
struct PresenceState {
  presence: HashMap<String, PresenceInfo>,
  members: HashMap<String, BTreeSet<String>>,
  typing: HashMap<String, BTreeSet<String>>,
}

impl PresenceState {
  fn apply(&mut self, event: &RealTimeEvent) {
    let Some(user) = event.user() else {
      return;
    };

    match event.event_type.as_str() {
      event_types::PRESENCE_UPDATE => {
        self.presence.insert(
          user.to_string(),
          PresenceInfo {
            payload: event.data.clone(),
            updated_at: event.timestamp,
          },
        );
      }
      event_types::ROOM_JOIN => {
        if let Some(room) = event.room() {
          insert(&mut self.members, room, user);
        }
      }
      event_types::ROOM_LEAVE => {
        if let Some(room) = event.room() {
          remove(&mut self.members, room, user);
          remove(&mut self.typing, room, user);
        }
      }
      event_types::TYPING_START => {
        if let Some(room) = event.room() {
          insert(&mut self.typing, room, user);
        }
      }
      event_types::TYPING_STOP => {
        if let Some(room) = event.room() {
          remove(&mut self.typing, room, user);
        }
      }
      _ => {}
    }
  }
}

fn insert(map: &mut HashMap<String, BTreeSet<String>>, room: &str, user: &str) {
  map
    .entry(room.to_string())
    .or_default()
    .insert(user.to_string());
}

fn remove(map: &mut HashMap<String, BTreeSet<String>>, room: &str, user: &str) {
  if let Some(users) = map.get_mut(room) {
    users.remove(user);
    if users.is_empty() {
      map.remove(room);
    }
  }
}

/// Room membership, presence payloads and typing indicators, replicated
/// from bus events. There is no authoritative source on the client.
pub struct PresenceTracker {
  state: Arc<RwLock<PresenceState>>,
  subscriptions: Mutex<Vec<Subscription>>,
}

const TRACKED: [&str; 5] = [
  event_types::PRESENCE_UPDATE,
  event_types::ROOM_JOIN,
  event_types::ROOM_LEAVE,
  event_types::TYPING_START,
  event_types::TYPING_STOP,
];

impl PresenceTracker {
  pub fn attach(bus: &Arc<EventBus>) -> Self {
    let state = Arc::new(RwLock::new(PresenceState::default()));
    let subscriptions = TRACKED
      .iter()
      .map(|event_type| {
        let state = state.clone();
        bus.on(event_type, move |event| state.write().apply(event))
      })
      .collect();

    Self {
      state,
      subscriptions: Mutex::new(subscriptions),
    }
  }

  pub fn presence(&self, user_id: &str) -> Option<PresenceInfo> {
    self.state.read().presence.get(user_id).cloned()
  }

  pub fn members(&self, room_id: &str) -> Vec<String> {
    self
      .state
      .read()
      .members
      .get(room_id)
      .map(|users| users.iter().cloned().collect())
      .unwrap_or_default()
  }

  pub fn typing(&self, room_id: &str) -> Vec<String> {
    self
      .state
      .read()
      .typing
      .get(room_id)
      .map(|users| users.iter().cloned().collect())
      .unwrap_or_default()
  }

  /// Users whose last presence payload is not offline, sorted
  pub fn online_users(&self) -> Vec<String> {
    let mut users: Vec<String> = self
      .state
      .read()
      .presence
      .iter()
      .filter(|(_, info)| info.is_online())
      .map(|(user, _)| user.clone())
      .collect();
    users.sort();
    users
  }

  /// Stop tracking. State gathered so far stays readable.
  pub fn detach(&self) {
    for sub in self.subscriptions.lock().drain(..) {
      sub.unsubscribe();
    }
  }
}

impl Drop for PresenceTracker {
  fn drop(&mut self) {
    self.detach();
  }
}
