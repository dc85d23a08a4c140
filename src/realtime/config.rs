use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What to discard when the outbound queue is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
  /// Discard the message that has waited longest
  #[default]
  DropOldest,
  /// Discard the oldest message of the lowest priority present
  DropLowestPriority,
}

impl std::str::FromStr for OverflowPolicy {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().replace('-', "_").as_str() {
      "drop_oldest" | "oldest" => Ok(OverflowPolicy::DropOldest),
      "drop_lowest_priority" | "lowest_priority" => Ok(OverflowPolicy::DropLowestPriority),
      _ => Err(format!("Unknown overflow policy: {}", s)),
    }
  }
}

impl std::fmt::Display for OverflowPolicy {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      OverflowPolicy::DropOldest => write!(f, "drop_oldest"),
      OverflowPolicy::DropLowestPriority => write!(f, "drop_lowest_priority"),
    }
  }
}

/// Real-time client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
  /// WebSocket endpoint
  #[serde(default = "default_url")]
  pub url: String,

  /// Automatic reconnection attempts after an abnormal close
  #[serde(default = "default_reconnect_attempts")]
  pub reconnect_attempts: u32,

  /// Backoff base in milliseconds
  #[serde(default = "default_reconnect_delay_ms")]
  pub reconnect_delay_ms: u64,

  #[serde(default = "default_heartbeat_interval_ms")]
  pub heartbeat_interval_ms: u64,

  /// Gzip binary frames (only with `enable_binary_mode`)
  #[serde(default)]
  pub enable_compression: bool,

  /// Send binary frames instead of text
  #[serde(default)]
  pub enable_binary_mode: bool,

  /// Serialized payloads above this size are dropped (bytes)
  #[serde(default = "default_max_message_size")]
  pub max_message_size: usize,

  #[serde(default = "default_max_queue_size")]
  pub max_queue_size: usize,

  #[serde(default)]
  pub overflow_policy: OverflowPolicy,

  #[serde(default = "default_connect_timeout_ms")]
  pub connect_timeout_ms: u64,
}

fn default_url() -> String {
  "ws://localhost:3001/ws".to_string()
}

fn default_reconnect_attempts() -> u32 {
  5
}

fn default_reconnect_delay_ms() -> u64 {
  1000
}

fn default_heartbeat_interval_ms() -> u64 {
  30_000
}

fn default_max_message_size() -> usize {
  1024 * 1024 // 1MB
}

fn default_max_queue_size() -> usize {
  1000
}

fn default_connect_timeout_ms() -> u64 {
  10_000
}

impl Default for RealtimeConfig {
  fn default() -> Self {
    Self {
      url: default_url(),
      reconnect_attempts: default_reconnect_attempts(),
      reconnect_delay_ms: default_reconnect_delay_ms(),
      heartbeat_interval_ms: default_heartbeat_interval_ms(),
      enable_compression: false,
      enable_binary_mode: false,
      max_message_size: default_max_message_size(),
      max_queue_size: default_max_queue_size(),
      overflow_policy: OverflowPolicy::default(),
      connect_timeout_ms: default_connect_timeout_ms(),
    }
  }
}

impl RealtimeConfig {
  pub fn heartbeat_interval(&self) -> Duration {
    Duration::from_millis(self.heartbeat_interval_ms)
  }

  pub fn connect_timeout(&self) -> Duration {
    Duration::from_millis(self.connect_timeout_ms)
  }

  /// Delay before reconnection attempt `attempt` (1-based): `base * 2^(attempt-1)`
  pub fn backoff_delay(&self, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(20);
    Duration::from_millis(self.reconnect_delay_ms.saturating_mul(1u64 << exp))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_backoff_doubles() {
    let config = RealtimeConfig {
      reconnect_delay_ms: 100,
      ..Default::default()
    };
    assert_eq!(config.backoff_delay(1), Duration::from_millis(100));
    assert_eq!(config.backoff_delay(2), Duration::from_millis(200));
    assert_eq!(config.backoff_delay(3), Duration::from_millis(400));
    assert_eq!(config.backoff_delay(4), Duration::from_millis(800));
  }

  #[test]
  fn test_backoff_is_capped() {
    let config = RealtimeConfig::default();
    // Large attempt numbers must not overflow
    assert_eq!(config.backoff_delay(64), config.backoff_delay(21));
  }

  #[test]
  fn test_overflow_policy_parse() {
    assert_eq!(
      "drop-lowest-priority".parse::<OverflowPolicy>().unwrap(),
      OverflowPolicy::DropLowestPriority
    );
    assert_eq!(
      "drop_oldest".parse::<OverflowPolicy>().unwrap(),
      OverflowPolicy::DropOldest
    );
    assert!("random".parse::<OverflowPolicy>().is_err());
  }
}
