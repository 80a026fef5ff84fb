//! Configuration for the channel subsystem.
//!
//! All knobs have working defaults; a TOML file can override individual
//! fields.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AxonResult;

fn default_error_poll_ms() -> u64 {
    100
}

fn default_latch_spin_limit() -> u32 {
    1_000_000
}

fn default_object_capacity() -> usize {
    1024 * 1024
}

fn default_true() -> bool {
    true
}

/// Tunables for channel synchronization and the default allocator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// How often a blocked semaphore wait re-checks the channel error flag,
    /// in milliseconds. Bounds the unblock latency after `set_error`.
    #[serde(default = "default_error_poll_ms")]
    pub error_poll_ms: u64,

    /// Maximum spin-yield iterations while waiting for another process to
    /// finish creating the semaphore pair.
    #[serde(default = "default_latch_spin_limit")]
    pub latch_spin_limit: u32,

    /// Buffer capacity used when the allocator creates an object that was
    /// not pre-sized.
    #[serde(default = "default_object_capacity")]
    pub default_object_capacity: usize,

    /// Whether the region owner removes the backing shared-memory name on
    /// drop.
    #[serde(default = "default_true")]
    pub unlink_on_drop: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            error_poll_ms: default_error_poll_ms(),
            latch_spin_limit: default_latch_spin_limit(),
            default_object_capacity: default_object_capacity(),
            unlink_on_drop: default_true(),
        }
    }
}

impl ChannelConfig {
    /// Load a config from a TOML file. Missing fields fall back to defaults.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> AxonResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// The error-poll interval as a `Duration`.
    pub fn error_poll(&self) -> Duration {
        Duration::from_millis(self.error_poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = ChannelConfig::default();
        assert!(cfg.error_poll_ms > 0);
        assert!(cfg.default_object_capacity >= 4096);
        assert!(cfg.unlink_on_drop);
    }

    #[test]
    fn partial_toml_overrides() {
        let cfg: ChannelConfig = toml::from_str("error_poll_ms = 5").unwrap();
        assert_eq!(cfg.error_poll_ms, 5);
        assert_eq!(
            cfg.default_object_capacity,
            ChannelConfig::default().default_object_capacity
        );
    }
}
