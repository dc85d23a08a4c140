use std::collections::VecDeque;
use tokio::time::Instant;
use uuid::Uuid;

use super::config::OverflowPolicy;
use super::event::{Priority, RealTimeEvent};

/// A serialized event awaiting delivery
#[derive(Debug, Clone)]
pub struct QueuedMessage {
  pub id: Uuid,
  pub event: RealTimeEvent,
  /// Wire payload, serialized once at enqueue time
  pub payload: String,
  pub priority: Priority,
  pub enqueued_at: Instant,
}

impl QueuedMessage {
  pub fn new(event: RealTimeEvent, payload: String, priority: Priority) -> Self {
    Self {
      id: Uuid::new_v4(),
      event,
      payload,
      priority,
      enqueued_at: Instant::now(),
    }
  }
}

/// Bounded FIFO of outbound messages
#[derive(Debug)]
pub struct MessageQueue {
  items: VecDeque<QueuedMessage>,
  capacity: usize,
  policy: OverflowPolicy,
}

impl MessageQueue {
  pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
    Self {
      items: VecDeque::new(),
      capacity: capacity.max(1),
      policy,
    }
  }

  /// Append a message. When full, the overflow policy picks a victim,
  /// which is returned. The victim may be `message` itself.
  pub fn push(&mut self, message: QueuedMessage) -> Option<QueuedMessage> {
    if self.items.len() < self.capacity {
      self.items.push_back(message);
      return None;
    }

    match self.policy {
      OverflowPolicy::DropOldest => {
        let dropped = self.items.pop_front();
        self.items.push_back(message);
        dropped
      }
      OverflowPolicy::DropLowestPriority => {
        let lowest = self.items.iter().map(|m| m.priority).min();
        match lowest {
          Some(lowest) if lowest <= message.priority => {
            let idx = self.items.iter().position(|m| m.priority == lowest);
            let dropped = idx.and_then(|i| self.items.remove(i));
            self.items.push_back(message);
            dropped
          }
          // Everything queued outranks the newcomer
          _ => Some(message),
        }
      }
    }
  }

  /// Take every queued message in FIFO order
  pub fn drain(&mut self) -> Vec<QueuedMessage> {
    self.items.drain(..).collect()
  }

  /// Put undelivered messages back ahead of anything queued meanwhile.
  /// Returns the messages that no longer fit.
  pub fn requeue_front(&mut self, messages: Vec<QueuedMessage>) -> Vec<QueuedMessage> {
    let mut merged: VecDeque<QueuedMessage> = messages.into();
    merged.append(&mut self.items);
    let mut overflow = Vec::new();
    while merged.len() > self.capacity {
      if let Some(m) = merged.pop_back() {
        overflow.push(m);
      }
    }
    self.items = merged;
    overflow
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn clear(&mut self) {
    self.items.clear();
  }

  pub fn iter(&self) -> impl Iterator<Item = &QueuedMessage> {
    self.items.iter()
  }
}
