//! Tag → keys index used for bulk invalidation

use std::collections::{HashMap, HashSet};

/// Many-to-many index between tags and cache keys.
///
/// A key is listed under a tag iff that tag was supplied at the most recent
/// `register` for the key. Tags whose key set becomes empty are pruned.
#[derive(Debug, Default)]
pub struct TagIndex {
  by_tag: HashMap<String, HashSet<String>>,
  by_key: HashMap<String, HashSet<String>>,
}

impl TagIndex {
  pub fn new() -> Self {
    Self::default()
  }

  /// Replace the tag set of `key`.
  pub fn register(&mut self, key: &str, tags: &[String]) {
    self.remove_key(key);
    if tags.is_empty() {
      return;
    }

    let key_tags = self.by_key.entry(key.to_string()).or_default();
    for tag in tags {
      key_tags.insert(tag.clone());
      self
        .by_tag
        .entry(tag.clone())
        .or_default()
        .insert(key.to_string());
    }
  }

  /// Remove `key` from every tag it is listed under.
  pub fn remove_key(&mut self, key: &str) {
    let Some(tags) = self.by_key.remove(key) else {
      return;
    };
    for tag in tags {
      if let Some(keys) = self.by_tag.get_mut(&tag) {
        keys.remove(key);
        if keys.is_empty() {
          self.by_tag.remove(&tag);
        }
      }
    }
  }

  pub fn keys_for(&self, tag: &str) -> Vec<String> {
    self
      .by_tag
      .get(tag)
      .map(|keys| keys.iter().cloned().collect())
      .unwrap_or_default()
  }

  pub fn tags_for(&self, key: &str) -> Vec<String> {
    self
      .by_key
      .get(key)
      .map(|tags| tags.iter().cloned().collect())
      .unwrap_or_default()
  }

  pub fn contains_key(&self, key: &str) -> bool {
    self.by_key.contains_key(key)
  }

  pub fn tag_count(&self) -> usize {
    self.by_tag.len()
  }

  pub fn clear(&mut self) {
    self.by_tag.clear();
    self.by_key.clear();
  }
}
