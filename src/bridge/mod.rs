//! Inbound event → cache tag invalidation

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::cache::TieredCache;
use crate::realtime::RealTimeEvent;

/// Built-in routes. Adding a variant forces `tags` to cover it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationRoute {
  /// Any `post:<action>` event
  Post(String),
  CommentNew,
  UserUpdate,
  NotificationNew,
}

impl InvalidationRoute {
  pub fn parse(event_type: &str) -> Option<Self> {
    if let Some(action) = event_type.strip_prefix("post:") {
      if !action.is_empty() {
        return Some(InvalidationRoute::Post(action.to_string()));
      }
    }
    match event_type {
      "comment:new" => Some(InvalidationRoute::CommentNew),
      "user:update" => Some(InvalidationRoute::UserUpdate),
      "notification:new" => Some(InvalidationRoute::NotificationNew),
      _ => None,
    }
  }

  pub fn tags(&self) -> &'static [&'static str] {
    match self {
      InvalidationRoute::Post(_) => &["posts"],
      InvalidationRoute::CommentNew => &["comments"],
      InvalidationRoute::UserUpdate => &["users"],
      InvalidationRoute::NotificationNew => &["notifications"],
    }
  }
}

/// Extra route loaded from configuration.
///
/// `event` is either an exact type (`forum:reply`) or a namespace
/// wildcard (`forum:*`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
  pub event: String,
  #[serde(default)]
  pub tags: Vec<String>,
}

impl RouteConfig {
  pub fn new<I, S>(event: impl Into<String>, tags: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      event: event.into(),
      tags: tags.into_iter().map(Into::into).collect(),
    }
  }

  pub fn matches(&self, event_type: &str) -> bool {
    match self.event.strip_suffix('*') {
      Some(prefix) => event_type.starts_with(prefix) && event_type.len() > prefix.len(),
      None => self.event == event_type,
    }
  }
}

/// Invalidates cache tags when matching events arrive
pub struct CacheInvalidationBridge {
  cache: Arc<TieredCache>,
  routes: Vec<RouteConfig>,
}

impl CacheInvalidationBridge {
  pub fn new(cache: Arc<TieredCache>) -> Self {
    Self {
      cache,
      routes: Vec::new(),
    }
  }

  pub fn with_routes(mut self, routes: impl IntoIterator<Item = RouteConfig>) -> Self {
    self.routes.extend(routes);
    self
  }

  pub fn cache(&self) -> &Arc<TieredCache> {
    &self.cache
  }

  /// Tags invalidated by `event_type`, deduplicated and sorted
  pub fn tags_for(&self, event_type: &str) -> Vec<String> {
    let mut tags: BTreeSet<String> = InvalidationRoute::parse(event_type)
      .map(|route| route.tags().iter().map(|t| t.to_string()).collect())
      .unwrap_or_default();

    for route in self.routes.iter().filter(|r| r.matches(event_type)) {
      tags.extend(route.tags.iter().cloned());
    }
    tags.into_iter().collect()
  }

  /// Apply the routing table to one event. Returns the number of keys removed.
  pub async fn route(&self, event: &RealTimeEvent) -> usize {
    let tags = self.tags_for(&event.event_type);
    if tags.is_empty() {
      return 0;
    }

    let mut removed = 0;
    for tag in &tags {
      removed += self.cache.invalidate_by_tag(tag).await;
    }
    tracing::debug!(
      "'{}' invalidated tags {:?} ({} keys)",
      event.event_type,
      tags,
      removed
    );
    removed
  }
}
