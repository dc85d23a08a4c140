use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cache::now_ms;

/// Reserved event types
pub mod event_types {
  pub const PING: &str = "ping";
  pub const PONG: &str = "pong";
  pub const ROOM_JOIN: &str = "room:join";
  pub const ROOM_LEAVE: &str = "room:leave";
  pub const PRESENCE_UPDATE: &str = "presence:update";
  pub const TYPING_START: &str = "typing:start";
  pub const TYPING_STOP: &str = "typing:stop";

  // Local lifecycle events, never sent over the wire
  pub const CONNECTION_OPEN: &str = "connection:open";
  pub const CONNECTION_CLOSE: &str = "connection:close";
  pub const CONNECTION_ERROR: &str = "connection:error";
  pub const CONNECTION_FAILED: &str = "connection:failed";
}

/// Metadata key carrying the sender's clock on `ping`/`pong`
pub const PING_TIME: &str = "pingTime";

/// Wire unit of inbound and outbound traffic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealTimeEvent {
  #[serde(rename = "type")]
  pub event_type: String,
  #[serde(default)]
  pub data: Value,
  #[serde(default)]
  pub timestamp: i64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub user_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub room_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub metadata: Option<Map<String, Value>>,
}

impl RealTimeEvent {
  pub fn new(event_type: impl Into<String>, data: Value) -> Self {
    Self {
      event_type: event_type.into(),
      data,
      timestamp: now_ms(),
      user_id: None,
      room_id: None,
      metadata: None,
    }
  }

  pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
    self.user_id = Some(user_id.into());
    self
  }

  pub fn with_room(mut self, room_id: impl Into<String>) -> Self {
    self.room_id = Some(room_id.into());
    self
  }

  pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
    self
      .metadata
      .get_or_insert_with(Map::new)
      .insert(key.into(), value);
    self
  }

  /// `metadata.pingTime` as epoch ms, if present and numeric
  pub fn ping_time(&self) -> Option<i64> {
    self.metadata.as_ref()?.get(PING_TIME)?.as_i64()
  }

  /// Room id from the envelope, falling back to `data.roomId`
  pub fn room(&self) -> Option<&str> {
    self
      .room_id
      .as_deref()
      .or_else(|| self.data.get("roomId").and_then(Value::as_str))
  }

  /// User id from the envelope, falling back to `data.userId`
  pub fn user(&self) -> Option<&str> {
    self
      .user_id
      .as_deref()
      .or_else(|| self.data.get("userId").and_then(Value::as_str))
  }
}

/// Delivery priority of an outbound message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
  Low,
  #[default]
  Normal,
  High,
}

impl std::str::FromStr for Priority {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "low" => Ok(Priority::Low),
      "normal" => Ok(Priority::Normal),
      "high" => Ok(Priority::High),
      _ => Err(format!("Unknown priority: {}", s)),
    }
  }
}

impl std::fmt::Display for Priority {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Priority::Low => write!(f, "low"),
      Priority::Normal => write!(f, "normal"),
      Priority::High => write!(f, "high"),
    }
  }
}
