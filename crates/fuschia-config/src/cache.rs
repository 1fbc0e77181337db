//! Runtime settings for the artifact cache.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Debounce applied to preview revocation when none is configured.
pub const DEFAULT_REVOKE_DELAY_MS: u64 = 400;

/// Tracing filter used when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "fuschia=info";

/// Settings for the run-scoped artifact cache.
///
/// Every field has a default, so `{}` is a valid config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
  /// How long a scheduled preview revocation waits before releasing handles.
  /// A fresher preview for the same node within this window cancels it.
  #[serde(default = "default_revoke_delay_ms")]
  pub revoke_delay_ms: u64,

  /// Tracing filter directive for the CLI.
  #[serde(default = "default_log_filter")]
  pub log_filter: String,
}

fn default_revoke_delay_ms() -> u64 {
  DEFAULT_REVOKE_DELAY_MS
}

fn default_log_filter() -> String {
  DEFAULT_LOG_FILTER.to_string()
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      revoke_delay_ms: DEFAULT_REVOKE_DELAY_MS,
      log_filter: DEFAULT_LOG_FILTER.to_string(),
    }
  }
}

impl CacheConfig {
  /// Parse a config from a JSON string.
  pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
    Ok(serde_json::from_str(json)?)
  }

  /// Load a config from a JSON file.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_json_str(&content)
  }

  /// The revocation debounce as a `Duration`.
  pub fn revoke_delay(&self) -> Duration {
    Duration::from_millis(self.revoke_delay_ms)
  }
}
