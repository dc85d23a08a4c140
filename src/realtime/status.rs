use serde::{Deserialize, Serialize};

/// Lifecycle of a `ConnectionManager`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
  #[default]
  Disconnected,
  Connecting,
  Connected,
  Reconnecting,
  /// Reconnection budget exhausted; only `connect()` leaves this state
  Failed,
}

impl std::fmt::Display for ConnectionState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ConnectionState::Disconnected => write!(f, "disconnected"),
      ConnectionState::Connecting => write!(f, "connecting"),
      ConnectionState::Connected => write!(f, "connected"),
      ConnectionState::Reconnecting => write!(f, "reconnecting"),
      ConnectionState::Failed => write!(f, "failed"),
    }
  }
}

/// Snapshot of the connection as seen by the UI
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
  pub connected: bool,
  pub reconnecting: bool,
  /// Epoch ms of the most recent successful open
  pub last_connected: Option<i64>,
  /// Successful opens over the manager's lifetime
  pub connection_count: u64,
  /// Round trip of the last heartbeat (ms)
  pub latency: Option<i64>,
  pub state: ConnectionState,
}

impl ConnectionStatus {
  pub(crate) fn set_state(&mut self, state: ConnectionState) {
    self.state = state;
    self.connected = state == ConnectionState::Connected;
    self.reconnecting = state == ConnectionState::Reconnecting;
  }
}
