use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, THRESHOLD_RANGE_MS};
use crate::error::{MonitorError, Result};
use crate::export::{load_snapshot, save_snapshot};
use crate::monitor::engine::{ProbeEngine, ProbeEvent};
use crate::probe::{IcmpProber, Prober};
use crate::state::{
    READ_LOCK_WAIT, Sample, SharedSession, Statistics, new_shared_session, try_read_history,
    try_read_statistics,
};

/// Capacity of the probe event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Extra time `stop` waits beyond the probe timeout
const STOP_GRACE: Duration = Duration::from_secs(1);

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    stop_wait: Duration,
}

/// Control surface for one monitoring session: start, stop, save, load
/// and bounded-wait reads for display.
pub struct Monitor<P: Prober = IcmpProber> {
    prober: Arc<P>,
    session: SharedSession,
    running: Option<RunningLoop>,
}

impl Monitor<IcmpProber> {
    pub fn new(threshold: u32) -> Self {
        Self::with_prober(IcmpProber::new(), threshold)
    }
}

impl<P: Prober> Monitor<P> {
    pub fn with_prober(prober: P, threshold: u32) -> Self {
        Self {
            prober: Arc::new(prober),
            session: new_shared_session(threshold),
            running: None,
        }
    }

    /// Shared session, for callers that render it themselves
    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    /// Validate `config`, reset the session and spawn the probe loop.
    ///
    /// Must be called from within a tokio runtime. Returns the receiving end
    /// of the event channel; the channel closes when the loop exits.
    pub fn start(&mut self, config: Config) -> Result<mpsc::Receiver<ProbeEvent>> {
        config.validate()?;
        if self.is_running() {
            return Err(MonitorError::AlreadyRunning);
        }

        self.session.lock().restart(config.threshold_ms);

        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let stop_wait = config.timeout + STOP_GRACE;
        let engine = ProbeEngine::new(
            config,
            self.prober.clone(),
            self.session.clone(),
            tx,
            cancel.clone(),
        );

        self.running = Some(RunningLoop {
            cancel,
            handle: tokio::spawn(engine.run()),
            stop_wait,
        });
        Ok(rx)
    }

    /// Signal the loop to stop and wait for it, bounded by the probe timeout.
    ///
    /// Idempotent. Returns once the loop has exited or the wait elapsed.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.cancel.cancel();

        match tokio::time::timeout(running.stop_wait, running.handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "probe loop panicked"),
            Err(_) => tracing::warn!(wait = ?running.stop_wait, "probe loop did not stop in time"),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    /// Statistics copy, or `None` if the session is busy
    pub fn try_statistics(&self) -> Option<Statistics> {
        try_read_statistics(&self.session)
    }

    /// History copy, or `None` if the session is busy
    pub fn try_history(&self) -> Option<Vec<Sample>> {
        try_read_history(&self.session)
    }

    /// The newest `n` samples (the scrolling chart window), or `None` if busy
    pub fn try_recent(&self, n: usize) -> Option<Vec<Sample>> {
        self.session
            .try_lock_for(READ_LOCK_WAIT)
            .map(|s| s.history.latest(n))
    }

    /// Change the threshold for samples recorded from now on
    pub fn set_threshold(&self, threshold: u32) -> Result<()> {
        if !THRESHOLD_RANGE_MS.contains(&threshold) {
            return Err(MonitorError::InvalidConfiguration(format!(
                "Threshold must be between {} and {} ms (got {})",
                THRESHOLD_RANGE_MS.start(),
                THRESHOLD_RANGE_MS.end(),
                threshold
            )));
        }
        self.session
            .try_lock_for(READ_LOCK_WAIT)
            .ok_or(MonitorError::Contention)?
            .stats
            .set_threshold(threshold);
        Ok(())
    }

    /// Save the current history and statistics as a snapshot file
    pub fn save(&self, path: &Path) -> Result<()> {
        let (history, stats) = self
            .session
            .try_lock_for(READ_LOCK_WAIT)
            .map(|s| (s.history.snapshot_copy(), s.stats.statistics()))
            .ok_or(MonitorError::Contention)?;

        save_snapshot(path, &history, &stats, Utc::now())
    }

    /// Replace the session with a snapshot file's contents.
    ///
    /// The file is fully decoded before anything is replaced, so a failed
    /// load leaves the current session untouched.
    pub fn load(&mut self, path: &Path) -> Result<DateTime<Utc>> {
        if self.is_running() {
            return Err(MonitorError::SessionActive);
        }

        let snapshot = load_snapshot(path)?;
        let mut session = self
            .session
            .try_lock_for(READ_LOCK_WAIT)
            .ok_or(MonitorError::Contention)?;
        session.replace(snapshot.history, &snapshot.stats, snapshot.created_at);
        Ok(snapshot.created_at)
    }
}

impl<P: Prober> Drop for Monitor<P> {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }
}
