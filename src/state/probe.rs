use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classified outcome of a single probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProbeStatus {
    Success,
    Timeout,
    Unreachable,
    Error,
    Unknown,
}

impl ProbeStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::Timeout => "TimedOut",
            Self::Unreachable => "Unreachable",
            Self::Error => "Error",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of one probe attempt. Created once, never mutated.
///
/// `round_trip_ms == 0` means "no measurement" and is counted as a failure
/// by the statistics, even when the status says `Success`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub timestamp: DateTime<Local>,
    pub status: ProbeStatus,
    pub round_trip_ms: u32,
    /// TTL of the reply packet (0 if unavailable)
    pub ttl: u8,
}

impl ProbeResult {
    /// A reply arrived in `round_trip_ms` with the given reply TTL
    pub fn success(round_trip_ms: u32, ttl: u8) -> Self {
        Self::success_at(Local::now(), round_trip_ms, ttl)
    }

    pub fn success_at(timestamp: DateTime<Local>, round_trip_ms: u32, ttl: u8) -> Self {
        Self {
            timestamp,
            status: ProbeStatus::Success,
            round_trip_ms,
            ttl,
        }
    }

    /// A probe that produced no measurement
    pub fn failed(status: ProbeStatus) -> Self {
        Self::failed_at(Local::now(), status)
    }

    pub fn failed_at(timestamp: DateTime<Local>, status: ProbeStatus) -> Self {
        Self {
            timestamp,
            status,
            round_trip_ms: 0,
            ttl: 0,
        }
    }

    /// Whether this result counts as a successful latency sample
    pub fn is_success(&self) -> bool {
        self.status == ProbeStatus::Success && self.round_trip_ms > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_result() {
        let result = ProbeResult::success(23, 57);
        assert_eq!(result.status, ProbeStatus::Success);
        assert_eq!(result.round_trip_ms, 23);
        assert_eq!(result.ttl, 57);
        assert!(result.is_success());
    }

    #[test]
    fn test_failed_result_has_no_measurement() {
        let result = ProbeResult::failed(ProbeStatus::Timeout);
        assert_eq!(result.round_trip_ms, 0);
        assert_eq!(result.ttl, 0);
        assert!(!result.is_success());
    }

    #[test]
    fn test_zero_round_trip_success_is_not_a_sample() {
        // Sub-millisecond replies on a LAN round down to 0
        let result = ProbeResult::success(0, 64);
        assert_eq!(result.status, ProbeStatus::Success);
        assert!(!result.is_success());
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(ProbeStatus::Success.to_string(), "Success");
        assert_eq!(ProbeStatus::Timeout.to_string(), "TimedOut");
        assert_eq!(ProbeStatus::Unreachable.label(), "Unreachable");
    }
}
