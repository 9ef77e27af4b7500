use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::time::Duration;

use crate::error::{MonitorError, Result};

/// Allowed probe timeout, in milliseconds
pub const TIMEOUT_RANGE_MS: RangeInclusive<u64> = 100..=12_000;
/// Allowed probe interval, in seconds
pub const INTERVAL_RANGE_SECS: RangeInclusive<u64> = 1..=60;
/// Allowed round-trip threshold, in milliseconds
pub const THRESHOLD_RANGE_MS: RangeInclusive<u32> = 1..=5_000;

pub const DEFAULT_TARGET: &str = "www.google.com";
pub const DEFAULT_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_INTERVAL_SECS: u64 = 2;
pub const DEFAULT_THRESHOLD_MS: u32 = 30;

/// Runtime configuration for one monitoring session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Host name or IP address to probe
    pub target: String,
    /// Per-probe request timeout
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
    /// Sleep between probes
    #[serde(with = "duration_serde")]
    pub interval: Duration,
    /// Round trip above which a successful probe counts as slow (ms)
    pub threshold_ms: u32,
    /// Stop after this time (None = run until stopped)
    pub end_time: Option<DateTime<Local>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target: DEFAULT_TARGET.to_string(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            threshold_ms: DEFAULT_THRESHOLD_MS,
            end_time: None,
        }
    }
}

impl Config {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Default::default()
        }
    }

    /// Set the end time to `minutes` from now
    pub fn run_for_minutes(mut self, minutes: u32) -> Self {
        self.end_time = Some(Local::now() + chrono::Duration::minutes(i64::from(minutes)));
        self
    }

    /// Check every input before a loop is allowed to start
    pub fn validate(&self) -> Result<()> {
        let target = self.target.trim();
        if target.is_empty() {
            return Err(MonitorError::InvalidConfiguration(
                "Ping needs a host or IP address".into(),
            ));
        }
        if target.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(MonitorError::InvalidConfiguration(format!(
                "Invalid target address: {:?}",
                self.target
            )));
        }

        let timeout_ms = self.timeout.as_millis() as u64;
        if !TIMEOUT_RANGE_MS.contains(&timeout_ms) {
            return Err(MonitorError::InvalidConfiguration(format!(
                "Timeout must be between {} and {} ms (got {})",
                TIMEOUT_RANGE_MS.start(),
                TIMEOUT_RANGE_MS.end(),
                timeout_ms
            )));
        }

        let interval = self.interval.as_secs();
        if self.interval.subsec_nanos() != 0 || !INTERVAL_RANGE_SECS.contains(&interval) {
            return Err(MonitorError::InvalidConfiguration(format!(
                "Interval must be a whole number of seconds between {} and {} (got {:?})",
                INTERVAL_RANGE_SECS.start(),
                INTERVAL_RANGE_SECS.end(),
                self.interval
            )));
        }

        if !THRESHOLD_RANGE_MS.contains(&self.threshold_ms) {
            return Err(MonitorError::InvalidConfiguration(format!(
                "Threshold must be between {} and {} ms (got {})",
                THRESHOLD_RANGE_MS.start(),
                THRESHOLD_RANGE_MS.end(),
                self.threshold_ms
            )));
        }

        Ok(())
    }
}

/// Serde helper for Duration
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
