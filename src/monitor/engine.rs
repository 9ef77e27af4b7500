use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::probe::Prober;
use crate::state::{Aggregates, ProbeResult, ProbeStatus, SharedSession};

/// Published once per recorded probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeEvent {
    /// 1-based position of this probe in the session
    pub sequence: u64,
    pub result: ProbeResult,
    /// Aggregates right after `result` was folded in
    pub aggregates: Aggregates,
}

/// The probe engine sends one probe per interval until cancelled
pub struct ProbeEngine<P: Prober> {
    config: Config,
    prober: Arc<P>,
    session: SharedSession,
    events: mpsc::Sender<ProbeEvent>,
    cancel: CancellationToken,
}

impl<P: Prober> ProbeEngine<P> {
    pub fn new(
        config: Config,
        prober: Arc<P>,
        session: SharedSession,
        events: mpsc::Sender<ProbeEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            prober,
            session,
            events,
            cancel,
        }
    }

    /// Run the probe loop.
    ///
    /// Exits when cancelled or once the end time has passed. A probe already
    /// in flight when cancellation arrives is still recorded.
    pub async fn run(self) {
        tracing::info!(
            host = %self.config.target,
            interval = ?self.config.interval,
            timeout = ?self.config.timeout,
            "monitoring started"
        );

        let deadline = self.deadline();
        let mut sequence: u64 = 0;
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            // The first probe always goes out, even when the end time has passed
            if sequence > 0 && past(deadline) {
                tracing::info!(probes = sequence, "end time reached");
                break;
            }

            let result = self.probe_once().await;
            sequence += 1;

            // Writer path: never skipped, readers only hold the lock briefly
            let aggregates = self.session.lock().record(&result);

            if result.is_success() {
                tracing::debug!(
                    sequence,
                    rtt_ms = result.round_trip_ms,
                    ttl = result.ttl,
                    avg_ms = aggregates.average,
                    "probe recorded"
                );
            } else {
                tracing::warn!(sequence, status = %result.status, "probe failed");
            }

            self.publish(ProbeEvent {
                sequence,
                result,
                aggregates,
            });

            if past(deadline) {
                tracing::info!(probes = sequence, "end time reached");
                break;
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }

        tracing::info!(probes = sequence, "monitoring stopped");
    }

    /// End time as a monotonic deadline, fixed when the loop starts
    fn deadline(&self) -> Option<Instant> {
        self.config.end_time.map(|end| {
            let remaining = (end - Local::now()).to_std().unwrap_or(Duration::ZERO);
            Instant::now() + remaining
        })
    }

    /// One probe, bounded by the configured timeout
    async fn probe_once(&self) -> ProbeResult {
        let probe = self.prober.probe(&self.config.target, self.config.timeout);
        match tokio::time::timeout(self.config.timeout, probe).await {
            Ok(result) => result,
            Err(_) => ProbeResult::failed(ProbeStatus::Timeout),
        }
    }

    fn publish(&self, event: ProbeEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::trace!(sequence = event.sequence, "event channel full, dropping event");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

fn past(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::state::new_shared_session;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays scripted (delay, result) steps, then answers 10 ms forever
    #[derive(Default)]
    pub(crate) struct ScriptedProber {
        script: Mutex<VecDeque<(Duration, ProbeResult)>>,
        calls: AtomicUsize,
    }

    impl ScriptedProber {
        pub(crate) fn new(steps: Vec<(Duration, ProbeResult)>) -> Self {
            Self {
                script: Mutex::new(steps.into()),
                calls: AtomicUsize::new(0),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Prober for ScriptedProber {
        async fn probe(&self, _target: &str, _timeout: Duration) -> ProbeResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.script.lock().pop_front();
            match step {
                Some((delay, result)) => {
                    tokio::time::sleep(delay).await;
                    result
                }
                None => ProbeResult::success(10, 64),
            }
        }
    }

    fn instant(result: ProbeResult) -> (Duration, ProbeResult) {
        (Duration::ZERO, result)
    }

    fn test_config() -> Config {
        Config {
            target: "192.0.2.1".into(),
            timeout: Duration::from_millis(1000),
            interval: Duration::from_secs(1),
            threshold_ms: 30,
            end_time: None,
        }
    }

    struct Harness {
        prober: Arc<ScriptedProber>,
        session: SharedSession,
        cancel: CancellationToken,
        events: mpsc::Receiver<ProbeEvent>,
        handle: tokio::task::JoinHandle<()>,
    }

    fn spawn_engine(config: Config, prober: ScriptedProber, capacity: usize) -> Harness {
        let prober = Arc::new(prober);
        let session = new_shared_session(config.threshold_ms);
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(capacity);
        let engine = ProbeEngine::new(config, prober.clone(), session.clone(), tx, cancel.clone());
        Harness {
            prober,
            session,
            cancel,
            events: rx,
            handle: tokio::spawn(engine.run()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_in_order_and_publishes() {
        let prober = ScriptedProber::new(vec![
            instant(ProbeResult::success(20, 57)),
            instant(ProbeResult::failed(ProbeStatus::Unreachable)),
            instant(ProbeResult::success(40, 57)),
            instant(ProbeResult::success(35, 57)),
        ]);
        let mut h = spawn_engine(test_config(), prober, 16);

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(h.events.recv().await.unwrap());
        }
        h.cancel.cancel();
        h.handle.await.unwrap();

        let sequences: Vec<u64> = seen.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4]);
        assert_eq!(seen[1].result.status, ProbeStatus::Unreachable);
        assert_eq!(seen[3].aggregates.average, 31);
        assert_eq!(seen[3].aggregates.min.value, 20);
        assert_eq!(seen[3].aggregates.max.value, 40);

        let session = h.session.lock();
        let stats = session.stats.statistics();
        assert_eq!(stats.total_requests, 4);
        assert_eq!(stats.failed_requests, 1);
        assert_eq!(stats.over_threshold, 2);
        assert_eq!(session.history.len(), 4);
        assert_eq!(h.prober.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_probe_is_recorded_as_timeout() {
        let prober = ScriptedProber::new(vec![(
            Duration::from_secs(5),
            ProbeResult::success(5000, 57),
        )]);
        let mut config = test_config();
        config.end_time = Some(Local::now() - chrono::Duration::seconds(1));
        let h = spawn_engine(config, prober, 16);

        h.handle.await.unwrap();

        let session = h.session.lock();
        assert_eq!(session.stats.total_requests(), 1);
        assert_eq!(session.stats.failed_requests(), 1);
        assert_eq!(session.history.snapshot_copy()[0].round_trip, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_time_in_past_probes_once() {
        let mut config = test_config();
        config.end_time = Some(Local::now() - chrono::Duration::minutes(5));
        let mut h = spawn_engine(config, ScriptedProber::default(), 16);

        h.handle.await.unwrap();

        assert_eq!(h.prober.calls(), 1);
        assert_eq!(h.session.lock().stats.total_requests(), 1);
        assert!(h.events.recv().await.is_some());
        // Engine dropped its sender on exit
        assert!(h.events.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_time_passing_during_sleep() {
        let mut config = test_config();
        config.end_time = Some(Local::now() + chrono::Duration::milliseconds(300));
        let h = spawn_engine(config, ScriptedProber::default(), 16);

        h.handle.await.unwrap();

        assert_eq!(h.prober.calls(), 1);
        assert_eq!(h.session.lock().stats.total_requests(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_until_end_time() {
        let mut config = test_config();
        config.end_time = Some(Local::now() + chrono::Duration::milliseconds(2500));
        let h = spawn_engine(config, ScriptedProber::default(), 16);

        h.handle.await.unwrap();

        // Probes at t=0, 1, 2; the wake-up at t=3 is past the end
        assert_eq!(h.prober.calls(), 3);
        assert_eq!(h.session.lock().history.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_in_flight_probe() {
        let prober = ScriptedProber::new(vec![(
            Duration::from_millis(500),
            ProbeResult::success(25, 57),
        )]);
        let h = spawn_engine(test_config(), prober, 16);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.prober.calls(), 1);
        h.cancel.cancel();
        h.handle.await.unwrap();

        assert_eq!(h.prober.calls(), 1);
        let stats = h.session.lock().stats.statistics();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.failed_requests, 0);
        assert_eq!(stats.average, 25);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_sleep() {
        let mut config = test_config();
        config.interval = Duration::from_secs(60);
        let h = spawn_engine(config, ScriptedProber::default(), 16);

        tokio::time::sleep(Duration::from_secs(1)).await;
        let stopped_at = tokio::time::Instant::now();
        h.cancel.cancel();
        h.handle.await.unwrap();

        assert!(stopped_at.elapsed() < Duration::from_secs(1));
        assert_eq!(h.prober.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start_never_probes() {
        let prober = Arc::new(ScriptedProber::default());
        let session = new_shared_session(30);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (tx, _rx) = mpsc::channel(1);

        ProbeEngine::new(test_config(), prober.clone(), session.clone(), tx, cancel)
            .run()
            .await;

        assert_eq!(prober.calls(), 0);
        assert_eq!(session.lock().stats.total_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_channel_does_not_drop_records() {
        let h = spawn_engine(test_config(), ScriptedProber::default(), 1);

        // Probes at t=0, 1, 2 while nobody drains the channel
        tokio::time::sleep(Duration::from_millis(2500)).await;
        h.cancel.cancel();
        h.handle.await.unwrap();

        assert_eq!(h.prober.calls(), 3);
        assert_eq!(h.session.lock().history.len(), 3);
    }
}
