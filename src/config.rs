//! YAML configuration for cache, real-time client and invalidation routes

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::bridge::RouteConfig;
use crate::cache::CacheConfig;
use crate::realtime::RealtimeConfig;

/// Config file names searched by [`RippleConfig::find_and_load`]
pub const CONFIG_FILES: [&str; 2] = ["ripple.yaml", "ripple.yml"];

/// Expand `${VAR}` and `$VAR` references from the environment.
/// Unset variables expand to the empty string.
pub fn expand_env_vars(input: &str) -> String {
  let mut result = String::with_capacity(input.len());
  let mut rest = input;

  while let Some(pos) = rest.find('$') {
    result.push_str(&rest[..pos]);
    let after = &rest[pos + 1..];

    if let Some(braced) = after.strip_prefix('{') {
      match braced.find('}') {
        Some(end) => {
          result.push_str(&std::env::var(&braced[..end]).unwrap_or_default());
          rest = &braced[end + 1..];
        }
        None => {
          // Unterminated, keep verbatim
          result.push_str(&rest[pos..]);
          rest = "";
        }
      }
      continue;
    }

    let len = after
      .chars()
      .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
      .count();
    if len == 0 {
      result.push('$');
    } else {
      result.push_str(&std::env::var(&after[..len]).unwrap_or_default());
    }
    rest = &after[len..];
  }

  result.push_str(rest);
  result
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RippleConfig {
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub realtime: RealtimeConfig,
  #[serde(default)]
  pub invalidation: InvalidationSection,
  #[serde(default)]
  pub logging: LoggingSection,
}

/// Routes added on top of the built-in `post:*`, `comment:new`,
/// `user:update` and `notification:new` routes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvalidationSection {
  #[serde(default)]
  pub routes: Vec<RouteConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
  #[serde(default = "default_log_level")]
  pub level: LogLevel,
}

impl Default for LoggingSection {
  fn default() -> Self {
    Self {
      level: default_log_level(),
    }
  }
}

fn default_log_level() -> LogLevel {
  LogLevel::Info
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
  Error,
  Warn,
  #[default]
  Info,
  Debug,
  Trace,
}

impl LogLevel {
  pub fn as_str(&self) -> &'static str {
    match self {
      LogLevel::Error => "error",
      LogLevel::Warn => "warn",
      LogLevel::Info => "info",
      LogLevel::Debug => "debug",
      LogLevel::Trace => "trace",
    }
  }
}

impl std::str::FromStr for LogLevel {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "error" => Ok(LogLevel::Error),
      "warn" | "warning" => Ok(LogLevel::Warn),
      "info" => Ok(LogLevel::Info),
      "debug" => Ok(LogLevel::Debug),
      "trace" => Ok(LogLevel::Trace),
      _ => Err(format!("Unknown log level: {}", s)),
    }
  }
}

impl std::fmt::Display for LogLevel {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

impl RippleConfig {
  pub fn from_yaml(content: &str) -> Result<Self, anyhow::Error> {
    let expanded = expand_env_vars(content);
    Ok(serde_yaml::from_str(&expanded)?)
  }

  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
    let content = std::fs::read_to_string(&path)?;
    Self::from_yaml(&content)
  }

  pub fn find_and_load() -> Result<Option<Self>, anyhow::Error> {
    for p in CONFIG_FILES {
      if Path::new(p).exists() {
        tracing::info!("Loading config from {}", p);
        return Ok(Some(Self::from_file(p)?));
      }
    }
    Ok(None)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_expand_plain_text_untouched() {
    assert_eq!(expand_env_vars("no vars here"), "no vars here");
    assert_eq!(expand_env_vars("cost: 5$"), "cost: 5$");
    assert_eq!(expand_env_vars("${UNTERMINATED"), "${UNTERMINATED");
  }

  #[test]
  fn test_log_level_parse() {
    assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
    assert_eq!(LogLevel::Debug.to_string(), "debug");
    assert!("loud".parse::<LogLevel>().is_err());
  }
}
