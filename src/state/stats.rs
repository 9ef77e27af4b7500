use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use super::probe::ProbeResult;

/// Starting value for the minimum round trip, replaced by the first sample
pub const MIN_SENTINEL: u32 = u32::MAX;

/// A round-trip value and when it was observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundTripMark {
    pub value: u32,
    pub time: DateTime<Local>,
}

impl RoundTripMark {
    pub fn new(value: u32, time: DateTime<Local>) -> Self {
        Self { value, time }
    }
}

/// Aggregates returned from every `record` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aggregates {
    pub average: u32,
    pub min: RoundTripMark,
    pub max: RoundTripMark,
}

/// Point-in-time copy of the accumulator, in snapshot field layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub average: u32,
    pub min: RoundTripMark,
    pub max: RoundTripMark,
    pub round_trip_threshold: u32,
    pub over_threshold: u64,
    pub failed_requests: u64,
    pub total_requests: u64,
}

impl Statistics {
    /// Number of probes that produced a latency sample
    pub fn successful(&self) -> u64 {
        self.total_requests.saturating_sub(self.failed_requests)
    }

    /// Whether at least one successful sample was seen
    pub fn has_samples(&self) -> bool {
        self.min.value != MIN_SENTINEL
    }

    /// Failed percentage
    pub fn loss_pct(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.failed_requests as f64 / self.total_requests as f64 * 100.0
        }
    }
}

/// Running statistics over a stream of probe results.
///
/// Does not synchronize itself; callers serialize access (see `Session`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatisticsAccumulator {
    total_requests: u64,
    failed_requests: u64,
    successful: u64,
    // Exact sum so the truncated mean never drifts
    sum: u64,
    min: RoundTripMark,
    max: RoundTripMark,
    threshold: u32,
    over_threshold: u64,
}

impl StatisticsAccumulator {
    pub fn new(threshold: u32) -> Self {
        let now = Local::now();
        Self {
            total_requests: 0,
            failed_requests: 0,
            successful: 0,
            sum: 0,
            min: RoundTripMark::new(MIN_SENTINEL, now),
            max: RoundTripMark::new(0, now),
            threshold,
            over_threshold: 0,
        }
    }

    /// Clear all counters and start over with `threshold`
    pub fn reset(&mut self, threshold: u32) {
        *self = Self::new(threshold);
    }

    /// Change the threshold. Only samples recorded afterwards are affected.
    pub fn set_threshold(&mut self, threshold: u32) {
        self.threshold = threshold;
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Fold one probe result into the aggregates
    pub fn record(&mut self, result: &ProbeResult) -> Aggregates {
        self.total_requests += 1;

        if result.is_success() {
            let value = result.round_trip_ms;
            self.successful += 1;
            self.sum += u64::from(value);

            if value < self.min.value {
                self.min = RoundTripMark::new(value, result.timestamp);
            }
            if value > self.max.value {
                self.max = RoundTripMark::new(value, result.timestamp);
            }
            if value > self.threshold {
                self.over_threshold += 1;
            }
        } else {
            self.failed_requests += 1;
        }

        self.aggregates()
    }

    /// Integer-truncated mean over successful samples
    pub fn average(&self) -> u32 {
        if self.successful == 0 {
            0
        } else {
            (self.sum / self.successful) as u32
        }
    }

    pub fn aggregates(&self) -> Aggregates {
        Aggregates {
            average: self.average(),
            min: self.min,
            max: self.max,
        }
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests
    }

    pub fn failed_requests(&self) -> u64 {
        self.failed_requests
    }

    pub fn successful(&self) -> u64 {
        self.successful
    }

    pub fn over_threshold(&self) -> u64 {
        self.over_threshold
    }

    pub fn min(&self) -> RoundTripMark {
        self.min
    }

    pub fn max(&self) -> RoundTripMark {
        self.max
    }

    /// Copy of the current state
    pub fn statistics(&self) -> Statistics {
        Statistics {
            average: self.average(),
            min: self.min,
            max: self.max,
            round_trip_threshold: self.threshold,
            over_threshold: self.over_threshold,
            failed_requests: self.failed_requests,
            total_requests: self.total_requests,
        }
    }

    /// Rebuild from a stored copy.
    ///
    /// The over-threshold count is taken as stored, even if the live
    /// threshold differs. The sample sum is reconstructed from the stored
    /// average, so further recording continues from a truncated mean.
    pub fn from_statistics(stats: &Statistics) -> Self {
        let successful = stats.successful();
        Self {
            total_requests: stats.total_requests,
            failed_requests: stats.failed_requests,
            successful,
            sum: u64::from(stats.average) * successful,
            min: stats.min,
            max: stats.max,
            threshold: stats.round_trip_threshold,
            over_threshold: stats.over_threshold,
        }
    }
}
