//! Socket seam between `ConnectionManager` and the network

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Close code for a normal, intentional shutdown
pub const CLOSE_NORMAL: u16 = 1000;

/// A data or close frame as seen by the manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
  Text(String),
  Binary(Vec<u8>),
  Close(Option<u16>),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
  #[error("connect failed: {0}")]
  Connect(String),
  #[error("send failed: {0}")]
  Send(String),
  #[error("receive failed: {0}")]
  Receive(String),
  #[error("connection closed")]
  Closed,
  #[error("connect timed out after {0:?}")]
  Timeout(Duration),
}

#[async_trait]
pub trait FrameSink: Send {
  async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;
  async fn close(&mut self, code: u16) -> Result<(), TransportError>;
}

#[async_trait]
pub trait FrameStream: Send {
  /// Next inbound frame; `None` once the peer is gone
  async fn next(&mut self) -> Option<Result<Frame, TransportError>>;
}

pub type Connection = (Box<dyn FrameSink>, Box<dyn FrameStream>);

#[async_trait]
pub trait Transport: Send + Sync {
  async fn open(&self, url: &str) -> Result<Connection, TransportError>;
}

// ============================================================================
// WebSocket
// ============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Production transport over tokio-tungstenite
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

struct WsSink(SplitSink<WsStream, Message>);
struct WsSource(SplitStream<WsStream>);

#[async_trait]
impl Transport for WebSocketTransport {
  async fn open(&self, url: &str) -> Result<Connection, TransportError> {
    let (ws, _) = tokio_tungstenite::connect_async(url)
      .await
      .map_err(|e| TransportError::Connect(e.to_string()))?;
    let (sink, stream) = ws.split();
    Ok((Box::new(WsSink(sink)), Box::new(WsSource(stream))))
  }
}

#[async_trait]
impl FrameSink for WsSink {
  async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
    let msg = match frame {
      Frame::Text(text) => Message::Text(text.into()),
      Frame::Binary(bytes) => Message::Binary(bytes.into()),
      Frame::Close(code) => Message::Close(code.map(|c| CloseFrame {
        code: CloseCode::from(c),
        reason: Utf8Bytes::from_static(""),
      })),
    };
    self
      .0
      .send(msg)
      .await
      .map_err(|e| TransportError::Send(e.to_string()))
  }

  async fn close(&mut self, code: u16) -> Result<(), TransportError> {
    self.send(Frame::Close(Some(code))).await?;
    self
      .0
      .close()
      .await
      .map_err(|e| TransportError::Send(e.to_string()))
  }
}

#[async_trait]
impl FrameStream for WsSource {
  async fn next(&mut self) -> Option<Result<Frame, TransportError>> {
    loop {
      let msg = match self.0.next().await? {
        Ok(msg) => msg,
        Err(e) => return Some(Err(TransportError::Receive(e.to_string()))),
      };
      match msg {
        Message::Text(text) => return Some(Ok(Frame::Text(text.as_str().to_string()))),
        Message::Binary(bytes) => return Some(Ok(Frame::Binary(bytes.to_vec()))),
        Message::Close(frame) => return Some(Ok(Frame::Close(frame.map(|f| u16::from(f.code))))),
        // Control frames are answered by tungstenite itself
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
      }
    }
  }
}

// ============================================================================
// In-process loopback
// ============================================================================

#[derive(Default)]
struct ChannelState {
  refuse: bool,
  fail_opens: u32,
  fail_sends: u32,
  open_attempts: Vec<(Instant, String)>,
  sent: Vec<Frame>,
  inbound: Option<mpsc::UnboundedSender<Frame>>,
  live: Option<Arc<AtomicBool>>,
}

/// In-process transport that records outbound frames and lets the owner
/// inject inbound frames, refuse opens and break the connection.
///
/// Clones share state, so a handle kept by the caller observes the
/// connection owned by a `ConnectionManager`.
#[derive(Clone, Default)]
pub struct ChannelTransport {
  state: Arc<Mutex<ChannelState>>,
}

struct ChannelSink {
  state: Arc<Mutex<ChannelState>>,
  live: Arc<AtomicBool>,
}

struct ChannelSource {
  rx: mpsc::UnboundedReceiver<Frame>,
}

impl ChannelTransport {
  pub fn new() -> Self {
    Self::default()
  }

  /// Refuse every open while `refuse` is set
  pub fn refuse(&self, refuse: bool) {
    self.state.lock().refuse = refuse;
  }

  /// Fail the next `n` opens
  pub fn fail_opens(&self, n: u32) {
    self.state.lock().fail_opens = n;
  }

  /// Fail the next `n` sends
  pub fn fail_sends(&self, n: u32) {
    self.state.lock().fail_sends = n;
  }

  /// Time and URL of every open attempt, successful or not
  pub fn open_attempts(&self) -> Vec<(Instant, String)> {
    self.state.lock().open_attempts.clone()
  }

  /// Every frame written by the client across all connections
  pub fn sent(&self) -> Vec<Frame> {
    self.state.lock().sent.clone()
  }

  /// Text frames written by the client, parsed as JSON
  pub fn sent_json(&self) -> Vec<serde_json::Value> {
    self
      .sent()
      .into_iter()
      .filter_map(|frame| match frame {
        Frame::Text(text) => serde_json::from_str(&text).ok(),
        _ => None,
      })
      .collect()
  }

  pub fn is_connected(&self) -> bool {
    self
      .state
      .lock()
      .live
      .as_ref()
      .map(|live| live.load(Ordering::SeqCst))
      .unwrap_or(false)
  }

  /// Deliver a frame to the client. Returns false when nothing is connected.
  pub fn push_inbound(&self, frame: Frame) -> bool {
    match &self.state.lock().inbound {
      Some(tx) => tx.send(frame).is_ok(),
      None => false,
    }
  }

  pub fn push_text(&self, text: impl Into<String>) -> bool {
    self.push_inbound(Frame::Text(text.into()))
  }

  /// Server-initiated close with `code`
  pub fn close_remote(&self, code: u16) {
    let mut state = self.state.lock();
    if let Some(tx) = state.inbound.take() {
      let _ = tx.send(Frame::Close(Some(code)));
    }
    if let Some(live) = state.live.take() {
      live.store(false, Ordering::SeqCst);
    }
  }

  /// Drop the connection without a close frame
  pub fn drop_connection(&self) {
    let mut state = self.state.lock();
    state.inbound = None;
    if let Some(live) = state.live.take() {
      live.store(false, Ordering::SeqCst);
    }
  }
}

#[async_trait]
impl Transport for ChannelTransport {
  async fn open(&self, url: &str) -> Result<Connection, TransportError> {
    let mut state = self.state.lock();
    state.open_attempts.push((Instant::now(), url.to_string()));

    if state.refuse {
      return Err(TransportError::Connect("connection refused".into()));
    }
    if state.fail_opens > 0 {
      state.fail_opens -= 1;
      return Err(TransportError::Connect("connection refused".into()));
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let live = Arc::new(AtomicBool::new(true));
    state.inbound = Some(tx);
    state.live = Some(live.clone());

    let sink = ChannelSink {
      state: self.state.clone(),
      live,
    };
    Ok((Box::new(sink), Box::new(ChannelSource { rx })))
  }
}

#[async_trait]
impl FrameSink for ChannelSink {
  async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
    if !self.live.load(Ordering::SeqCst) {
      return Err(TransportError::Closed);
    }
    let mut state = self.state.lock();
    if state.fail_sends > 0 {
      state.fail_sends -= 1;
      return Err(TransportError::Send("injected failure".into()));
    }
    state.sent.push(frame);
    Ok(())
  }

  async fn close(&mut self, code: u16) -> Result<(), TransportError> {
    if !self.live.swap(false, Ordering::SeqCst) {
      return Err(TransportError::Closed);
    }
    let mut state = self.state.lock();
    state.sent.push(Frame::Close(Some(code)));
    let current = state
      .live
      .as_ref()
      .map(|live| Arc::ptr_eq(live, &self.live))
      .unwrap_or(false);
    if current {
      state.inbound = None;
      state.live = None;
    }
    Ok(())
  }
}

#[async_trait]
impl FrameStream for ChannelSource {
  async fn next(&mut self) -> Option<Result<Frame, TransportError>> {
    self.rx.recv().await.map(Ok)
  }
}
