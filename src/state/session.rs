use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use super::history::{HistoryRecorder, Sample};
use super::probe::ProbeResult;
use super::stats::{Aggregates, Statistics, StatisticsAccumulator};

/// How long presentation-side reads wait for the session lock
pub const READ_LOCK_WAIT: Duration = Duration::from_millis(50);

/// Session state guarded by a single lock (history + statistics)
pub type SharedSession = Arc<Mutex<Session>>;

/// Create a new shared session with the given threshold
pub fn new_shared_session(threshold: u32) -> SharedSession {
    Arc::new(Mutex::new(Session::new(threshold)))
}

/// History and statistics for one monitoring session.
///
/// Only the probe loop mutates a running session; readers take copies.
#[derive(Debug, Clone)]
pub struct Session {
    pub history: HistoryRecorder,
    pub stats: StatisticsAccumulator,
    /// Creation time of the snapshot this session was loaded from
    pub loaded_from: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(threshold: u32) -> Self {
        Self {
            history: HistoryRecorder::new(),
            stats: StatisticsAccumulator::new(threshold),
            loaded_from: None,
        }
    }

    /// Clear history and statistics for a fresh session
    pub fn restart(&mut self, threshold: u32) {
        self.history.clear();
        self.stats.reset(threshold);
        self.loaded_from = None;
    }

    /// Fold a completed probe into both history and statistics
    pub fn record(&mut self, result: &ProbeResult) -> Aggregates {
        self.history.append(result.timestamp, result.round_trip_ms);
        self.stats.record(result)
    }

    /// Replace contents with loaded snapshot data
    pub fn replace(&mut self, history: Vec<Sample>, stats: &Statistics, created_at: DateTime<Utc>) {
        self.history = HistoryRecorder::from_samples(history);
        self.stats = StatisticsAccumulator::from_statistics(stats);
        self.loaded_from = Some(created_at);
    }
}

/// Read statistics without blocking longer than [`READ_LOCK_WAIT`].
///
/// Returns `None` when the lock is contended; the caller skips this refresh.
pub fn try_read_statistics(session: &SharedSession) -> Option<Statistics> {
    session
        .try_lock_for(READ_LOCK_WAIT)
        .map(|s| s.stats.statistics())
}

/// Read a copy of the history without blocking longer than [`READ_LOCK_WAIT`]
pub fn try_read_history(session: &SharedSession) -> Option<Vec<Sample>> {
    session
        .try_lock_for(READ_LOCK_WAIT)
        .map(|s| s.history.snapshot_copy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::probe::ProbeStatus;
    use crate::state::stats::MIN_SENTINEL;

    #[test]
    fn test_record_updates_history_and_stats() {
        let mut session = Session::new(30);
        session.record(&ProbeResult::success(20, 57));
        session.record(&ProbeResult::failed(ProbeStatus::Timeout));

        assert_eq!(session.history.len(), 2);
        assert_eq!(session.stats.total_requests(), 2);
        assert_eq!(session.stats.failed_requests(), 1);

        let samples = session.history.snapshot_copy();
        assert_eq!(samples[1].round_trip, 0);
    }

    #[test]
    fn test_restart_clears() {
        let mut session = Session::new(30);
        session.record(&ProbeResult::success(20, 57));
        session.loaded_from = Some(Utc::now());
        session.restart(45);

        assert!(session.history.is_empty());
        assert_eq!(session.stats.total_requests(), 0);
        assert_eq!(session.stats.threshold(), 45);
        assert_eq!(session.stats.min().value, MIN_SENTINEL);
        assert!(session.loaded_from.is_none());
    }

    #[test]
    fn test_try_read_when_free() {
        let shared = new_shared_session(30);
        shared.lock().record(&ProbeResult::success(15, 57));

        let stats = try_read_statistics(&shared).expect("lock is free");
        assert_eq!(stats.total_requests, 1);
        let history = try_read_history(&shared).expect("lock is free");
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_try_read_skips_under_contention() {
        let shared = new_shared_session(30);
        let holder = shared.clone();

        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let handle = std::thread::spawn(move || {
            let _guard = holder.lock();
            locked_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        });

        locked_rx.recv().unwrap();
        assert!(try_read_statistics(&shared).is_none());
        assert!(try_read_history(&shared).is_none());

        release_tx.send(()).unwrap();
        handle.join().unwrap();
        assert!(try_read_statistics(&shared).is_some());
    }
}
