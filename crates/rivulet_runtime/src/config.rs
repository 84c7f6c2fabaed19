//! Runtime configuration file handling

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Engine configuration (rivulet.toml)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Reject outgoing messages larger than this many bytes. `None`
    /// disables enforcement.
    #[serde(default)]
    pub max_message_size: Option<usize>,

    /// Minimum serialized size for an outgoing payload to be deduplicated
    /// through the message cache.
    #[serde(default = "default_min_cached_message_size")]
    pub min_cached_message_size: usize,

    /// How many script runs a cached payload reference stays valid for.
    #[serde(default = "default_max_cached_message_age")]
    pub max_cached_message_age: u64,

    /// Rerun automatically when the change notifier reports the script
    /// changed on disk. Off by default; the session surfaces a
    /// "script changed" notification instead.
    #[serde(default)]
    pub run_on_save: bool,

    /// Honor pending stop/full-rerun requests at element-call granularity.
    /// When off, an in-flight run is only superseded at natural completion.
    #[serde(default = "default_true")]
    pub interrupt_on_yield: bool,

    /// Evict sessions that have been disconnected longer than this.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    /// Timeout for the standalone "does the script run" health check.
    #[serde(default = "default_health_check_timeout_secs")]
    pub health_check_timeout_secs: u64,
}

fn default_min_cached_message_size() -> usize {
    10 * 1024
}

fn default_max_cached_message_age() -> u64 {
    2
}

fn default_true() -> bool {
    true
}

fn default_session_ttl_secs() -> u64 {
    3600
}

fn default_health_check_timeout_secs() -> u64 {
    30
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_message_size: None,
            min_cached_message_size: default_min_cached_message_size(),
            max_cached_message_age: default_max_cached_message_age(),
            run_on_save: false,
            interrupt_on_yield: true,
            session_ttl_secs: default_session_ttl_secs(),
            health_check_timeout_secs: default_health_check_timeout_secs(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: RuntimeConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Serialize to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}
