use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::bus::EventBus;
use super::config::RealtimeConfig;
use super::event::{event_types, Priority, RealTimeEvent, PING_TIME};
use super::queue::{MessageQueue, QueuedMessage};
use super::status::{ConnectionState, ConnectionStatus};
use super::transport::{
  Frame, FrameSink, FrameStream, Transport, TransportError, WebSocketTransport, CLOSE_NORMAL,
};
use crate::bridge::CacheInvalidationBridge;
use crate::cache::codec::{is_gzip, Codec, CodecError, GzipCodec};
use crate::cache::now_ms;

#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
  #[error("transport error: {0}")]
  Transport(#[from] TransportError),
  /// The attempt was overtaken by `disconnect`, drop or another `connect`
  #[error("connection attempt cancelled")]
  Cancelled,
}

/// Per-message delivery options
#[derive(Debug, Clone)]
pub struct SendOptions {
  pub room_id: Option<String>,
  pub target_user_id: Option<String>,
  pub priority: Priority,
  /// Queue the message when it cannot be delivered right away
  pub reliable: bool,
}

impl Default for SendOptions {
  fn default() -> Self {
    Self {
      room_id: None,
      target_user_id: None,
      priority: Priority::Normal,
      reliable: true,
    }
  }
}

impl SendOptions {
  pub fn new() -> Self {
    Self::default()
  }

  /// Best-effort delivery: dropped when the socket is not writable
  pub fn unreliable() -> Self {
    Self {
      reliable: false,
      ..Self::default()
    }
  }

  pub fn room(mut self, room_id: impl Into<String>) -> Self {
    self.room_id = Some(room_id.into());
    self
  }

  pub fn to_user(mut self, user_id: impl Into<String>) -> Self {
    self.target_user_id = Some(user_id.into());
    self
  }

  pub fn priority(mut self, priority: Priority) -> Self {
    self.priority = priority;
    self
  }

  pub fn reliable(mut self, reliable: bool) -> Self {
    self.reliable = reliable;
    self
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
  /// Written to the transport
  Sent,
  /// Held in the outbound queue until the next open
  Queued,
  /// Discarded (oversized, unreliable and undeliverable, or queue overflow)
  Dropped,
}

#[derive(Default)]
struct Tasks {
  reader: Option<JoinHandle<()>>,
  heartbeat: Option<JoinHandle<()>>,
  reconnect: Option<JoinHandle<()>>,
}

impl Tasks {
  fn abort_all(&mut self) {
    for handle in [
      self.reader.take(),
      self.heartbeat.take(),
      self.reconnect.take(),
    ]
    .into_iter()
    .flatten()
    {
      handle.abort();
    }
  }
}

struct Inner {
  config: RealtimeConfig,
  transport: Arc<dyn Transport>,
  bus: Arc<EventBus>,
  bridge: RwLock<Option<Arc<CacheInvalidationBridge>>>,
  status: RwLock<ConnectionStatus>,
  queue: Mutex<MessageQueue>,
  /// Writable half of the live connection. Fair, so writers go out in
  /// lock order.
  sink: tokio::sync::Mutex<Option<Box<dyn FrameSink>>>,
  tasks: Mutex<Tasks>,
  attempts: AtomicU32,
  user_id: RwLock<Option<String>>,
  rooms: RwLock<BTreeSet<String>>,
  /// Bumped on every open and teardown; tasks of older connections exit
  generation: AtomicU64,
  shutdown: AtomicBool,
}

/// Single real-time connection with reconnection, heartbeat and an
/// outbound queue.
///
/// Background tasks are owned by the manager and aborted on
/// [`disconnect`](Self::disconnect) and on drop.
pub struct ConnectionManager {
  inner: Arc<Inner>,
}

impl ConnectionManager {
  pub fn new(config: RealtimeConfig, transport: Arc<dyn Transport>) -> Self {
    Self::with_bus(config, transport, EventBus::new())
  }

  /// Manager over tokio-tungstenite
  pub fn websocket(config: RealtimeConfig) -> Self {
    Self::new(config, Arc::new(WebSocketTransport))
  }

  pub fn with_bus(config: RealtimeConfig, transport: Arc<dyn Transport>, bus: Arc<EventBus>) -> Self {
    let queue = MessageQueue::new(config.max_queue_size, config.overflow_policy);
    Self {
      inner: Arc::new(Inner {
        config,
        transport,
        bus,
        bridge: RwLock::new(None),
        status: RwLock::new(ConnectionStatus::default()),
        queue: Mutex::new(queue),
        sink: tokio::sync::Mutex::new(None),
        tasks: Mutex::new(Tasks::default()),
        attempts: AtomicU32::new(0),
        user_id: RwLock::new(None),
        rooms: RwLock::new(BTreeSet::new()),
        generation: AtomicU64::new(0),
        shutdown: AtomicBool::new(false),
      }),
    }
  }

  pub fn with_bridge(self, bridge: Arc<CacheInvalidationBridge>) -> Self {
    self.set_bridge(Some(bridge));
    self
  }

  pub fn set_bridge(&self, bridge: Option<Arc<CacheInvalidationBridge>>) {
    *self.inner.bridge.write() = bridge;
  }

  pub fn config(&self) -> &RealtimeConfig {
    &self.inner.config
  }

  pub fn bus(&self) -> &Arc<EventBus> {
    &self.inner.bus
  }

  pub fn status(&self) -> ConnectionStatus {
    self.inner.status.read().clone()
  }

  pub fn is_connected(&self) -> bool {
    self.inner.status.read().connected
  }

  pub fn queue_len(&self) -> usize {
    self.inner.queue.lock().len()
  }

  /// Rooms joined through this manager
  pub fn rooms(&self) -> Vec<String> {
    self.inner.rooms.read().iter().cloned().collect()
  }

  pub fn user_id(&self) -> Option<String> {
    self.inner.user_id.read().clone()
  }

  /// Open the connection.
  ///
  /// On failure `connection:error` is emitted, the automatic reconnection
  /// sequence is scheduled and the error is returned. Connecting while
  /// already connected is a no-op. An attempt overtaken by `disconnect`
  /// returns [`RealtimeError::Cancelled`] and leaves nothing running.
  pub async fn connect(&self, user_id: Option<&str>) -> Result<(), RealtimeError> {
    if self.inner.status.read().connected {
      return Ok(());
    }

    *self.inner.user_id.write() = user_id.map(String::from);
    self.inner.attempts.store(0, Ordering::SeqCst);
    if let Some(pending) = self.inner.tasks.lock().reconnect.take() {
      pending.abort();
    }
    self.inner.status.write().set_state(ConnectionState::Connecting);

    match self.inner.open().await {
      Ok(()) => Ok(()),
      Err(RealtimeError::Cancelled) if self.is_connected() => Ok(()),
      Err(RealtimeError::Cancelled) => Err(RealtimeError::Cancelled),
      Err(e) => {
        tracing::warn!("Connection to {} failed: {}", self.inner.config.url, e);
        self
          .inner
          .bus
          .emit(event_types::CONNECTION_ERROR, json!({ "error": e.to_string() }));
        self.inner.schedule_reconnect();
        Err(e)
      }
    }
  }

  /// Close the connection normally and cancel every background task.
  pub async fn disconnect(&self) {
    self.inner.generation.fetch_add(1, Ordering::SeqCst);
    self.inner.tasks.lock().abort_all();
    self.inner.attempts.store(0, Ordering::SeqCst);

    let sink = self.inner.sink.lock().await.take();
    // An open that held the sink lock may have installed tasks meanwhile
    self.inner.tasks.lock().abort_all();
    if let Some(mut sink) = sink {
      if let Err(e) = sink.close(CLOSE_NORMAL).await {
        tracing::debug!("Close frame not delivered: {}", e);
      }
    }

    let previous = {
      let mut status = self.inner.status.write();
      let previous = status.state;
      status.set_state(ConnectionState::Disconnected);
      previous
    };

    if previous != ConnectionState::Disconnected {
      tracing::info!("Disconnected from {}", self.inner.config.url);
      self
        .inner
        .bus
        .emit(event_types::CONNECTION_CLOSE, json!({ "code": CLOSE_NORMAL }));
    }
  }

  /// Send an event, queueing it when reliable and not deliverable now.
  pub async fn send(&self, event_type: &str, data: Value, options: SendOptions) -> SendOutcome {
    let mut event = RealTimeEvent::new(event_type, data);
    event.user_id = self.inner.user_id.read().clone();
    event.room_id = options.room_id.clone();
    if let Some(target) = &options.target_user_id {
      event = event.with_metadata("targetUserId", json!(target));
    }
    self.inner.deliver(event, &options).await
  }

  pub async fn join_room(&self, room_id: &str) -> SendOutcome {
    self.inner.rooms.write().insert(room_id.to_string());
    self
      .send(
        event_types::ROOM_JOIN,
        json!({ "roomId": room_id }),
        SendOptions::new().room(room_id),
      )
      .await
  }

  pub async fn leave_room(&self, room_id: &str) -> SendOutcome {
    self.inner.rooms.write().remove(room_id);
    self
      .send(
        event_types::ROOM_LEAVE,
        json!({ "roomId": room_id }),
        SendOptions::new().room(room_id),
      )
      .await
  }

  pub async fn update_presence(&self, presence: Value) -> SendOutcome {
    self
      .send(event_types::PRESENCE_UPDATE, presence, SendOptions::new())
      .await
  }

  pub async fn start_typing(&self, room_id: &str) -> SendOutcome {
    self
      .send(
        event_types::TYPING_START,
        json!({ "roomId": room_id }),
        SendOptions::unreliable().room(room_id),
      )
      .await
  }

  pub async fn stop_typing(&self, room_id: &str) -> SendOutcome {
    self
      .send(
        event_types::TYPING_STOP,
        json!({ "roomId": room_id }),
        SendOptions::unreliable().room(room_id),
      )
      .await
  }
}

impl Drop for ConnectionManager {
  fn drop(&mut self) {
    self.inner.shutdown.store(true, Ordering::SeqCst);
    self.inner.generation.fetch_add(1, Ordering::SeqCst);
    self.inner.tasks.lock().abort_all();
  }
}

impl Inner {
  fn target_url(&self) -> String {
    let url = &self.config.url;
    match self.user_id.read().as_deref() {
      Some(id) => {
        let sep = if url.contains('?') { '&' } else { '?' };
        format!("{}{}userId={}", url, sep, urlencoding::encode(id))
      }
      None => url.clone(),
    }
  }

  /// Open the transport, install the connection and flush the queue.
  async fn open(self: &Arc<Self>) -> Result<(), RealtimeError> {
    let expected = self.generation.load(Ordering::SeqCst);
    let url = self.target_url();
    let timeout = self.config.connect_timeout();
    let (mut sink, stream) = match tokio::time::timeout(timeout, self.transport.open(&url)).await
    {
      Ok(Ok(conn)) => conn,
      Ok(Err(e)) => return Err(e.into()),
      Err(_) => return Err(TransportError::Timeout(timeout).into()),
    };

    // Held until the queue is flushed so new sends wait behind it
    let mut guard = self.sink.lock().await;
    let generation = expected + 1;
    let claimed = !self.shutdown.load(Ordering::SeqCst)
      && self
        .generation
        .compare_exchange(expected, generation, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok();
    if !claimed {
      drop(guard);
      tracing::debug!("Discarding connection to {} opened after teardown", self.config.url);
      if let Err(e) = sink.close(CLOSE_NORMAL).await {
        tracing::debug!("Close frame not delivered: {}", e);
      }
      return Err(RealtimeError::Cancelled);
    }
    *guard = Some(sink);

    {
      let mut status = self.status.write();
      status.set_state(ConnectionState::Connected);
      status.last_connected = Some(now_ms());
      status.connection_count += 1;
    }
    self.attempts.store(0, Ordering::SeqCst);

    {
      let reader = tokio::spawn(self.clone().read_loop(generation, stream));
      let heartbeat = self.spawn_heartbeat(generation);
      let mut tasks = self.tasks.lock();
      if let Some(old) = tasks.heartbeat.take() {
        old.abort();
      }
      tasks.reader = Some(reader);
      tasks.heartbeat = heartbeat;
    }

    let pending = self.queue.lock().drain();
    let total = pending.len();
    let mut undelivered = Vec::new();
    let mut pending = pending.into_iter();
    while let Some(message) = pending.next() {
      let frame = self.encode_frame(&message.payload);
      let Some(sink) = guard.as_mut() else {
        undelivered.push(message);
        break;
      };
      if let Err(e) = sink.send(frame).await {
        tracing::warn!("Queue flush interrupted: {}", e);
        undelivered.push(message);
        break;
      }
    }
    undelivered.extend(pending);

    if !undelivered.is_empty() {
      let overflow = self.queue.lock().requeue_front(undelivered);
      for message in overflow {
        tracing::warn!(
          "Outbound queue full, dropped '{}' message",
          message.event.event_type
        );
      }
    } else if total > 0 {
      tracing::debug!("Flushed {} queued messages", total);
    }
    drop(guard);

    tracing::info!("Connected to {}", self.config.url);
    self
      .bus
      .emit(event_types::CONNECTION_OPEN, json!({ "url": self.config.url }));
    Ok(())
  }

  fn spawn_heartbeat(self: &Arc<Self>, generation: u64) -> Option<JoinHandle<()>> {
    if self.config.heartbeat_interval_ms == 0 {
      return None;
    }
    let period = self.config.heartbeat_interval();
    let inner = Arc::downgrade(self);

    Some(tokio::spawn(async move {
      let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
      loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
          break;
        };
        if inner.generation.load(Ordering::SeqCst) != generation {
          break;
        }
        let ping = RealTimeEvent::new(event_types::PING, Value::Null)
          .with_metadata(PING_TIME, json!(now_ms()));
        inner.deliver(ping, &SendOptions::unreliable()).await;
      }
    }))
  }

  async fn read_loop(self: Arc<Self>, generation: u64, mut stream: Box<dyn FrameStream>) {
    let code = loop {
      match stream.next().await {
        Some(Ok(Frame::Text(text))) => self.handle_text(&text).await,
        Some(Ok(Frame::Binary(bytes))) => match decode_binary(bytes) {
          Ok(text) => self.handle_text(&text).await,
          Err(e) => tracing::warn!("Dropping undecodable binary frame: {}", e),
        },
        Some(Ok(Frame::Close(code))) => break code,
        Some(Err(e)) => {
          tracing::warn!("Connection error: {}", e);
          self
            .bus
            .emit(event_types::CONNECTION_ERROR, json!({ "error": e.to_string() }));
          break None;
        }
        None => break None,
      }
    };
    self.handle_close(generation, code).await;
  }

  async fn handle_text(&self, text: &str) {
    let event: RealTimeEvent = match serde_json::from_str(text) {
      Ok(event) => event,
      Err(e) => {
        tracing::warn!("Dropping malformed message: {}", e);
        return;
      }
    };

    if event.event_type == event_types::PONG {
      if let Some(ping_time) = event.ping_time() {
        let latency = (now_ms() - ping_time).max(0);
        self.status.write().latency = Some(latency);
        tracing::debug!("Heartbeat latency {}ms", latency);
        return;
      }
    }

    tracing::debug!("Received '{}'", event.event_type);
    self.bus.publish(&event);

    let bridge = self.bridge.read().clone();
    if let Some(bridge) = bridge {
      bridge.route(&event).await;
    }
  }

  async fn handle_close(self: &Arc<Self>, generation: u64, code: Option<u16>) {
    // Only the first close of the current connection counts
    if self
      .generation
      .compare_exchange(generation, generation + 1, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      return;
    }

    {
      let mut tasks = self.tasks.lock();
      if let Some(heartbeat) = tasks.heartbeat.take() {
        heartbeat.abort();
      }
      // The reader is the current task
      tasks.reader.take();
    }
    *self.sink.lock().await = None;

    if code == Some(CLOSE_NORMAL) {
      self.status.write().set_state(ConnectionState::Disconnected);
      tracing::info!("Connection closed normally");
      self
        .bus
        .emit(event_types::CONNECTION_CLOSE, json!({ "code": CLOSE_NORMAL }));
      return;
    }

    tracing::warn!("Connection closed abnormally (code {:?})", code);
    self
      .bus
      .emit(event_types::CONNECTION_CLOSE, json!({ "code": code }));
    self.schedule_reconnect();
  }

  /// Schedule the next reconnection attempt, or give up once the budget
  /// is spent.
  fn schedule_reconnect(self: &Arc<Self>) {
    if self.shutdown.load(Ordering::SeqCst) {
      return;
    }

    let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
    if attempt > self.config.reconnect_attempts {
      self.status.write().set_state(ConnectionState::Failed);
      tracing::error!(
        "Giving up on {} after {} reconnection attempts",
        self.config.url,
        self.config.reconnect_attempts
      );
      self.bus.emit(
        event_types::CONNECTION_FAILED,
        json!({ "attempts": self.config.reconnect_attempts }),
      );
      return;
    }

    self.status.write().set_state(ConnectionState::Reconnecting);
    let delay = self.config.backoff_delay(attempt);
    tracing::info!(
      "Reconnecting in {:?} (attempt {}/{})",
      delay,
      attempt,
      self.config.reconnect_attempts
    );

    let inner = Arc::downgrade(self);
    let handle = tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      let Some(inner) = inner.upgrade() else {
        return;
      };
      match inner.open().await {
        Ok(()) => {}
        Err(RealtimeError::Cancelled) => {
          tracing::debug!("Reconnection attempt {} cancelled", attempt);
        }
        Err(e) => {
          tracing::warn!("Reconnection attempt {} failed: {}", attempt, e);
          inner.bus.emit(
            event_types::CONNECTION_ERROR,
            json!({ "error": e.to_string(), "attempt": attempt }),
          );
          inner.schedule_reconnect();
        }
      }
    });

    // Not aborted: the previous handle may belong to the running task
    self.tasks.lock().reconnect = Some(handle);
  }

  fn encode_frame(&self, payload: &str) -> Frame {
    if !self.config.enable_binary_mode {
      return Frame::Text(payload.to_string());
    }
    if self.config.enable_compression {
      match GzipCodec::default().encode(payload.as_bytes()) {
        Ok(bytes) => return Frame::Binary(bytes),
        Err(e) => tracing::warn!("Compression failed, sending uncompressed: {}", e),
      }
    }
    Frame::Binary(payload.as_bytes().to_vec())
  }

  /// Write now if connected; otherwise queue (reliable) or drop.
  async fn deliver(&self, event: RealTimeEvent, options: &SendOptions) -> SendOutcome {
    let payload = match serde_json::to_string(&event) {
      Ok(payload) => payload,
      Err(e) => {
        tracing::warn!("Dropping '{}' message: {}", event.event_type, e);
        return SendOutcome::Dropped;
      }
    };
    if payload.len() > self.config.max_message_size {
      tracing::warn!(
        "Dropping '{}' message: {} bytes exceeds limit of {}",
        event.event_type,
        payload.len(),
        self.config.max_message_size
      );
      return SendOutcome::Dropped;
    }

    // Kept until the message is queued so an open cannot flush in between
    let mut sink = self.sink.lock().await;
    if let Some(writer) = sink.as_mut() {
      match writer.send(self.encode_frame(&payload)).await {
        Ok(()) => {
          tracing::debug!("Sent '{}'", event.event_type);
          return SendOutcome::Sent;
        }
        Err(e) => tracing::warn!("Send of '{}' failed: {}", event.event_type, e),
      }
    }

    if !options.reliable {
      tracing::debug!("Dropping unreliable '{}' message", event.event_type);
      return SendOutcome::Dropped;
    }

    let message = QueuedMessage::new(event, payload, options.priority);
    let id = message.id;
    let dropped = self.queue.lock().push(message);
    drop(sink);

    match dropped {
      Some(victim) if victim.id == id => {
        tracing::warn!(
          "Outbound queue full, dropped '{}' message",
          victim.event.event_type
        );
        SendOutcome::Dropped
      }
      Some(victim) => {
        tracing::warn!(
          "Outbound queue full, dropped '{}' message",
          victim.event.event_type
        );
        SendOutcome::Queued
      }
      None => SendOutcome::Queued,
    }
  }
}

fn decode_binary(bytes: Vec<u8>) -> Result<String, CodecError> {
  let bytes = if is_gzip(&bytes) {
    GzipCodec::default().decode(&bytes)?
  } else {
    bytes
  };
  Ok(String::from_utf8(bytes)?)
}
