//! Stream delivery configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::StreamError;

/// Configuration for the per-block delivery driver.
///
/// Can be loaded from a TOML file via [`StreamConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Configured sinks as comma-separated `kind|url` items, e.g.
    /// `"relational|mysql://db:3306,websocket|0.0.0.0:6810"`.
    #[serde(default)]
    pub engine: String,

    /// Shared lock/state service URL for multi-process clusters. When unset,
    /// delivery state lives in `state_dir` and locking is a no-op
    /// (single-process mode).
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Directory for local delivery state (single-process mode).
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Identity used to claim the delivery lease. Defaults to `host:pid` so
    /// two processes on one machine contend correctly.
    #[serde(default = "default_locker_id")]
    pub locker_id: String,

    /// Name of the delivery lock key in the shared store.
    #[serde(default = "default_lock_key")]
    pub lock_key: String,

    /// Name of the delivery state key in the shared store.
    #[serde(default = "default_state_key")]
    pub state_key: String,

    /// Lease duration for the delivery lock, in milliseconds.
    #[serde(default = "default_lock_lease_ms")]
    pub lock_lease_ms: u64,

    /// Deadline for one block's sink fan-out, in milliseconds.
    #[serde(default = "default_atom_task_timeout_ms")]
    pub atom_task_timeout_ms: u64,

    /// Backoff after a failed prepare phase (lock contention, store errors).
    #[serde(default = "default_prepare_backoff_ms")]
    pub prepare_backoff_ms: u64,

    /// Backoff after a failed or incomplete commit.
    #[serde(default = "default_commit_backoff_ms")]
    pub commit_backoff_ms: u64,

    /// Per-roundtrip timeout for the network store, in milliseconds.
    #[serde(default = "default_store_op_timeout_ms")]
    pub store_op_timeout_ms: u64,

    /// Capacity of the block-end buffer decoupling block commit from sink
    /// latency. 0 disables the queue (block-end drives delivery directly).
    #[serde(default)]
    pub cache_queue_capacity: usize,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_state_dir() -> PathBuf {
    PathBuf::from("./blockcast_state")
}

fn default_locker_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "node".to_string());
    format!("{host}:{}", std::process::id())
}

fn default_lock_key() -> String {
    "blockcast.lock".to_string()
}

fn default_state_key() -> String {
    "blockcast.state".to_string()
}

fn default_lock_lease_ms() -> u64 {
    60_000
}

fn default_atom_task_timeout_ms() -> u64 {
    5_000
}

fn default_prepare_backoff_ms() -> u64 {
    1_500
}

fn default_commit_backoff_ms() -> u64 {
    5_000
}

fn default_store_op_timeout_ms() -> u64 {
    2_000
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl StreamConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &str) -> Result<Self, StreamError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| StreamError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, StreamError> {
        toml::from_str(s).map_err(|e| StreamError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> String {
        toml::to_string_pretty(self).expect("StreamConfig is always serializable to TOML")
    }

    pub fn lock_lease(&self) -> Duration {
        Duration::from_millis(self.lock_lease_ms)
    }

    pub fn atom_task_timeout(&self) -> Duration {
        Duration::from_millis(self.atom_task_timeout_ms)
    }

    pub fn prepare_backoff(&self) -> Duration {
        Duration::from_millis(self.prepare_backoff_ms)
    }

    pub fn commit_backoff(&self) -> Duration {
        Duration::from_millis(self.commit_backoff_ms)
    }

    pub fn store_op_timeout(&self) -> Duration {
        Duration::from_millis(self.store_op_timeout_ms)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            engine: String::new(),
            redis_url: None,
            state_dir: default_state_dir(),
            locker_id: default_locker_id(),
            lock_key: default_lock_key(),
            state_key: default_state_key(),
            lock_lease_ms: default_lock_lease_ms(),
            atom_task_timeout_ms: default_atom_task_timeout_ms(),
            prepare_backoff_ms: default_prepare_backoff_ms(),
            commit_backoff_ms: default_commit_backoff_ms(),
            store_op_timeout_ms: default_store_op_timeout_ms(),
            cache_queue_capacity: 0,
            log_format: default_log_format(),
            log_level: default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = StreamConfig::default();
        let toml_str = config.to_toml_string();
        let parsed = StreamConfig::from_toml_str(&toml_str).expect("should parse");
        assert_eq!(parsed.lock_key, config.lock_key);
        assert_eq!(parsed.atom_task_timeout_ms, config.atom_task_timeout_ms);
        assert_eq!(parsed.cache_queue_capacity, config.cache_queue_capacity);
    }

    #[test]
    fn minimal_toml_uses_defaults() {
        let config = StreamConfig::from_toml_str("").expect("empty toml should use defaults");
        assert_eq!(config.lock_key, "blockcast.lock");
        assert_eq!(config.state_key, "blockcast.state");
        assert_eq!(config.atom_task_timeout_ms, 5_000);
        assert_eq!(config.prepare_backoff_ms, 1_500);
        assert_eq!(config.commit_backoff_ms, 5_000);
        assert_eq!(config.cache_queue_capacity, 0);
        assert_eq!(config.redis_url, None);
    }

    #[test]
    fn partial_toml_overrides() {
        let toml = r#"
            engine = "relational|mysql://db:3306"
            redis_url = "redis://cache:6379"
            atom_task_timeout_ms = 750
            cache_queue_capacity = 64
        "#;
        let config = StreamConfig::from_toml_str(toml).expect("should parse");
        assert_eq!(config.engine, "relational|mysql://db:3306");
        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.atom_task_timeout_ms, 750);
        assert_eq!(config.cache_queue_capacity, 64);
        assert_eq!(config.lock_key, "blockcast.lock"); // default
    }

    #[test]
    fn missing_file_returns_config_error() {
        let result = StreamConfig::from_toml_file("/nonexistent/blockcast.toml");
        assert!(matches!(result, Err(StreamError::Config(_))));
    }

    #[test]
    fn duration_accessors_convert_milliseconds() {
        let config = StreamConfig {
            atom_task_timeout_ms: 250,
            ..StreamConfig::default()
        };
        assert_eq!(config.atom_task_timeout(), Duration::from_millis(250));
    }
}
