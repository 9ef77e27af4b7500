use chrono::{DateTime, Local, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

/// One observed (time, round trip) pair.
///
/// Time is wall-clock time of day at whole-second resolution, which is
/// the resolution the snapshot format stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    #[serde(with = "time_of_day")]
    pub time: NaiveTime,
    pub round_trip: u32,
}

impl Sample {
    pub fn new(timestamp: DateTime<Local>, round_trip: u32) -> Self {
        let time = timestamp.time();
        Self {
            time: time.with_nanosecond(0).unwrap_or(time),
            round_trip,
        }
    }
}

/// Append-only, chronologically ordered sample log for one session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryRecorder {
    samples: Vec<Sample>,
}

impl HistoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from loaded samples
    pub fn from_samples(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    pub fn append(&mut self, timestamp: DateTime<Local>, round_trip_ms: u32) {
        self.samples.push(Sample::new(timestamp, round_trip_ms));
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Independent copy of every sample in insertion order
    pub fn snapshot_copy(&self) -> Vec<Sample> {
        self.samples.clone()
    }

    /// Copy of the newest `n` samples (chart scroll window)
    pub fn latest(&self, n: usize) -> Vec<Sample> {
        let start = self.samples.len().saturating_sub(n);
        self.samples[start..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Serde helper for "HH:MM:SS" time strings
mod time_of_day {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M:%S";

    pub fn serialize<S>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&s, FORMAT).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 3, 1, h, m, s)
            .single()
            .expect("unambiguous local time")
    }

    #[test]
    fn test_append_preserves_order() {
        let mut history = HistoryRecorder::new();
        history.append(at(10, 0, 0), 20);
        history.append(at(10, 0, 2), 0);
        history.append(at(10, 0, 4), 35);

        let samples = history.snapshot_copy();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].round_trip, 20);
        assert_eq!(samples[1].round_trip, 0);
        assert_eq!(samples[2].time, NaiveTime::from_hms_opt(10, 0, 4).unwrap());
    }

    #[test]
    fn test_sample_truncates_sub_second() {
        let ts = at(8, 15, 30) + chrono::Duration::milliseconds(750);
        let sample = Sample::new(ts, 12);
        assert_eq!(sample.time, NaiveTime::from_hms_opt(8, 15, 30).unwrap());
    }

    #[test]
    fn test_snapshot_copy_is_independent() {
        let mut history = HistoryRecorder::new();
        history.append(at(9, 0, 0), 10);
        let copy = history.snapshot_copy();
        history.append(at(9, 0, 1), 11);
        assert_eq!(copy.len(), 1);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_latest_window() {
        let mut history = HistoryRecorder::new();
        for i in 0..15 {
            history.append(at(9, 0, i), i + 1);
        }
        let window = history.latest(10);
        assert_eq!(window.len(), 10);
        assert_eq!(window[0].round_trip, 6);
        assert_eq!(window[9].round_trip, 15);

        assert_eq!(history.latest(100).len(), 15);
    }

    #[test]
    fn test_clear() {
        let mut history = HistoryRecorder::new();
        history.append(at(9, 0, 0), 10);
        history.clear();
        assert!(history.is_empty());
    }

    #[test]
    fn test_sample_serialization_format() {
        let sample = Sample::new(at(23, 5, 9), 42);
        let json = serde_json::to_string(&sample).unwrap();
        assert_eq!(json, r#"{"time":"23:05:09","roundTrip":42}"#);

        let parsed: Sample = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, sample);
    }

    #[test]
    fn test_sample_rejects_bad_time() {
        let result: Result<Sample, _> = serde_json::from_str(r#"{"time":"25:99","roundTrip":1}"#);
        assert!(result.is_err());
    }
}
