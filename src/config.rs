//! Loop configuration.
//!
//! Every tunable of the loop lives in [`LoopConfig`]. All fields have
//! defaults, so a partial TOML document (with the `config-file` feature) only
//! needs the values it changes:
//!
//! ```toml
//! microtask_cap = 5000
//! graceful_shutdown_timeout = 0.5   # seconds
//! sleep_ceiling = 0.002
//! ```
//!
//! Durations are written as floating point seconds.

use crate::error::{Error, Result};
use crate::runtime::idle::{DEFAULT_SLEEP_CEILING, DEFAULT_SLEEP_FLOOR, DEFAULT_TIMER_SLEEP_RATIO};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default microtask iteration cap per drain.
pub const DEFAULT_MICROTASK_CAP: usize = 10_000;

/// Tunables of an event loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoopConfig {
    /// Most microtasks run by one urgent drain before it stops and warns.
    pub microtask_cap: usize,
    /// Longest graceful shutdown before the loop force-stops. Values below
    /// 100 ms are raised to 100 ms.
    #[serde(with = "duration_secs")]
    pub graceful_shutdown_timeout: Duration,
    /// Extra cycles run after the main loop exits with work left.
    pub graceful_max_iterations: u32,
    /// Sleep between graceful shutdown cycles.
    #[serde(with = "duration_secs")]
    pub graceful_sleep: Duration,
    /// Upper bound on one idle sleep.
    #[serde(with = "duration_secs")]
    pub sleep_ceiling: Duration,
    /// Lower bound on one idle sleep.
    #[serde(with = "duration_secs")]
    pub sleep_floor: Duration,
    /// Share of the next timer delay to sleep for when idle.
    pub timer_sleep_ratio: f64,
    /// Inactivity after which the loop reports idle, until the adaptive
    /// threshold takes over.
    #[serde(with = "duration_secs")]
    pub idle_threshold: Duration,
    /// Tombstones needed before the timer heap may be rebuilt.
    pub tombstone_rebuild_min: usize,
    /// Longest wait of one stream readiness poll.
    #[serde(with = "duration_secs")]
    pub stream_poll_timeout: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            microtask_cap: DEFAULT_MICROTASK_CAP,
            graceful_shutdown_timeout: Duration::from_secs(2),
            graceful_max_iterations: 10,
            graceful_sleep: Duration::from_millis(1),
            sleep_ceiling: DEFAULT_SLEEP_CEILING,
            sleep_floor: DEFAULT_SLEEP_FLOOR,
            timer_sleep_ratio: DEFAULT_TIMER_SLEEP_RATIO,
            idle_threshold: Duration::from_secs(5),
            tombstone_rebuild_min: 64,
            stream_poll_timeout: Duration::from_millis(1),
        }
    }
}

impl LoopConfig {
    /// Rejects values the loop cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.microtask_cap == 0 {
            return Err(Error::Config("microtask_cap must be at least 1".into()));
        }
        if self.sleep_floor > self.sleep_ceiling {
            return Err(Error::Config(format!(
                "sleep_floor ({:?}) exceeds sleep_ceiling ({:?})",
                self.sleep_floor, self.sleep_ceiling
            )));
        }
        if !(self.timer_sleep_ratio > 0.0 && self.timer_sleep_ratio <= 1.0) {
            return Err(Error::Config(format!(
                "timer_sleep_ratio must be in (0, 1], got {}",
                self.timer_sleep_ratio
            )));
        }
        if self.idle_threshold.is_zero() {
            return Err(Error::Config("idle_threshold must be positive".into()));
        }
        Ok(())
    }

    /// Parses and validates a TOML document.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    #[cfg(feature = "config-file")]
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
