//! Engine configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FenceResult, ValidationError};

/// Upper bound on worker shards.
pub const MAX_SHARDS: usize = 256;

/// What `submit` does when a shard queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Wait for queue space.
    #[default]
    Block,
    /// Fail with `QueueFull` and count the tick as dropped.
    Reject,
}

/// Runtime configuration for [`GeofenceEngine`](crate::engine::GeofenceEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Number of worker shards; devices are hashed onto them.
    pub shards: usize,
    /// Max queued messages per shard.
    pub queue_capacity: usize,
    /// Behaviour when a shard queue is full.
    pub backpressure: BackpressurePolicy,
    /// Per-subscriber alert buffer.
    pub stream_capacity: usize,
    /// Evict devices that have not reported within this window of the
    /// newest timestamp in a tick. `None` keeps devices until disconnected.
    pub stale_after_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            shards: 4,
            queue_capacity: 1024,
            backpressure: BackpressurePolicy::Block,
            stream_capacity: 1024,
            stale_after_ms: None,
        }
    }
}

impl EngineConfig {
    /// Parses and validates a JSON config. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for malformed JSON or out-of-range values.
    pub fn from_json_str(raw: &str) -> FenceResult<Self> {
        let cfg: Self = serde_json::from_str(raw).map_err(|e| ValidationError::InvalidConfig {
            reason: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads, parses and validates a JSON config file.
    ///
    /// # Errors
    ///
    /// `Io` if the file cannot be read, otherwise as [`from_json_str`](Self::from_json_str).
    pub fn from_path(path: impl AsRef<Path>) -> FenceResult<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |reason: &str| {
            Err(ValidationError::InvalidConfig {
                reason: reason.to_string(),
            })
        };

        if self.shards == 0 || self.shards > MAX_SHARDS {
            return invalid("shards must be between 1 and 256");
        }
        if self.queue_capacity == 0 {
            return invalid("queue_capacity must be at least 1");
        }
        if self.stream_capacity == 0 {
            return invalid("stream_capacity must be at least 1");
        }
        if self.stale_after_ms == Some(0) {
            return invalid("stale_after_ms must be positive when set");
        }
        Ok(())
    }
}
