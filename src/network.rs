//! Reachability probing and link-quality classification.
//!
//! The detector never propagates errors: every probe outcome, including a
//! transport failure, folds into a [`NetworkSample`]. Quality is derived from
//! a rolling window of recent samples rather than the single latest one, so a
//! momentary blip doesn't flap the badge a UI shows the user.

use rand::Rng;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Default rolling window size over which quality is derived.
pub const DEFAULT_WINDOW: usize = 16;
/// Default probe timeout.
pub const PROBE_TIMEOUT_MS: u64 = 1500;
/// EMA smoothing factor applied to observed RTT.
const RTT_ALPHA: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quality {
    Good,
    Degraded,
    Offline,
}

impl Default for Quality {
    fn default() -> Self {
        Quality::Good
    }
}

/// One probe result, folded from either a successful or failed health check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkSample {
    pub at: Instant,
    pub rtt: Option<Duration>,
    pub ok: bool,
}

/// Outcome of a health-check callback the host supplies.
#[derive(Debug, Clone, Copy)]
pub struct ProbeOutcome {
    pub rtt: Duration,
}

/// A probe failure as classified by the host's health-check callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeFailure {
    Network,
    ServerError,
    Timeout,
}

#[derive(Debug, Clone, Copy)]
pub struct NetworkDetectorConfig {
    pub window: usize,
    pub thresh_fail: f64,
    pub thresh_offline: f64,
    pub probe_timeout: Duration,
    pub poll_good: Duration,
    pub poll_degraded: Duration,
    pub poll_offline: Duration,
}

impl Default for NetworkDetectorConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            thresh_fail: 0.25,
            thresh_offline: 0.75,
            probe_timeout: Duration::from_millis(PROBE_TIMEOUT_MS),
            poll_good: Duration::from_secs(10),
            poll_degraded: Duration::from_secs(3),
            poll_offline: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NetworkEvent {
    Sample(NetworkSample),
    QualityChanged { from: Quality, to: Quality },
}

struct DetectorState {
    samples: Mutex<VecDeque<NetworkSample>>,
    rtt_ema_bits: AtomicU64,
    quality: Mutex<Quality>,
    poll_interval_ms: AtomicU64,
}

/// Classifies link quality from a rolling window of reachability probes.
#[derive(Clone)]
pub struct NetworkDetector {
    state: Arc<DetectorState>,
    config: NetworkDetectorConfig,
    events: broadcast::Sender<NetworkEvent>,
}

impl NetworkDetector {
    pub fn new(config: NetworkDetectorConfig) -> Self {
        let (tx, _rx) = broadcast::channel(64);
        Self {
            state: Arc::new(DetectorState {
                samples: Mutex::new(VecDeque::with_capacity(config.window)),
                rtt_ema_bits: AtomicU64::new(0f64.to_bits()),
                quality: Mutex::new(Quality::Good),
                poll_interval_ms: AtomicU64::new(config.poll_good.as_millis() as u64),
            }),
            config,
            events: tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.events.subscribe()
    }

    pub fn current_quality(&self) -> Quality {
        *self.state.quality.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Smoothed round-trip time, if any sample has ever succeeded.
    pub fn smoothed_rtt(&self) -> Option<Duration> {
        let bits = self.state.rtt_ema_bits.load(Ordering::Relaxed);
        let millis = f64::from_bits(bits);
        if millis <= 0.0 {
            None
        } else {
            Some(Duration::from_secs_f64(millis / 1000.0))
        }
    }

    /// Current adaptive poll interval, jittered by up to ±20% so concurrent
    /// tabs/instances don't probe in lockstep.
    pub fn next_poll_interval(&self) -> Duration {
        let base_ms = self.state.poll_interval_ms.load(Ordering::Relaxed);
        let spread = (base_ms as f64 * 0.2) as i64;
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        let jittered = (base_ms as i64 + offset).max(0) as u64;
        Duration::from_millis(jittered)
    }

    /// Run a single probe against the supplied health check, folding any
    /// failure into the returned sample rather than propagating it.
    pub async fn probe<F, Fut>(&self, health_check: F) -> NetworkSample
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ProbeOutcome, ProbeFailure>> + Send,
    {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.config.probe_timeout, health_check()).await;

        let sample = match outcome {
            Ok(Ok(ProbeOutcome { rtt })) => {
                self.update_rtt(rtt);
                NetworkSample { at: started, rtt: Some(rtt), ok: true }
            }
            Ok(Err(_failure)) => NetworkSample { at: started, rtt: None, ok: false },
            Err(_elapsed) => NetworkSample { at: started, rtt: None, ok: false },
        };

        self.record(sample);
        sample
    }

    fn update_rtt(&self, rtt: Duration) {
        let millis = rtt.as_secs_f64() * 1000.0;
        loop {
            let prev_bits = self.state.rtt_ema_bits.load(Ordering::Relaxed);
            let prev = f64::from_bits(prev_bits);
            let next = if prev <= 0.0 { millis } else { RTT_ALPHA * millis + (1.0 - RTT_ALPHA) * prev };
            if self
                .state
                .rtt_ema_bits
                .compare_exchange(prev_bits, next.to_bits(), Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    fn record(&self, sample: NetworkSample) {
        let mut samples = self.state.samples.lock().unwrap_or_else(|p| p.into_inner());
        samples.push_back(sample);
        while samples.len() > self.config.window {
            samples.pop_front();
        }

        let total = samples.len();
        let failures = samples.iter().filter(|s| !s.ok).count();
        let fail_ratio = if total == 0 { 0.0 } else { failures as f64 / total as f64 };

        let new_quality = if fail_ratio >= self.config.thresh_offline {
            Quality::Offline
        } else if fail_ratio >= self.config.thresh_fail {
            Quality::Degraded
        } else {
            Quality::Good
        };
        drop(samples);

        let poll = match new_quality {
            Quality::Good => self.config.poll_good,
            Quality::Degraded => self.config.poll_degraded,
            Quality::Offline => self.config.poll_offline,
        };
        self.state.poll_interval_ms.store(poll.as_millis() as u64, Ordering::Relaxed);

        let _ = self.events.send(NetworkEvent::Sample(sample));

        let mut quality = self.state.quality.lock().unwrap_or_else(|p| p.into_inner());
        if *quality != new_quality {
            let from = *quality;
            *quality = new_quality;
            drop(quality);
            tracing::info!(?from, to = ?new_quality, "network quality transition");
            let _ = self.events.send(NetworkEvent::QualityChanged { from, to: new_quality });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ok(rtt_ms: u64) -> Result<ProbeOutcome, ProbeFailure> {
        Ok(ProbeOutcome { rtt: Duration::from_millis(rtt_ms) })
    }

    async fn fail() -> Result<ProbeOutcome, ProbeFailure> {
        Err(ProbeFailure::Network)
    }

    #[tokio::test]
    async fn starts_good_with_no_samples() {
        let detector = NetworkDetector::new(NetworkDetectorConfig::default());
        assert_eq!(detector.current_quality(), Quality::Good);
    }

    #[tokio::test]
    async fn successful_probes_keep_quality_good() {
        let detector = NetworkDetector::new(NetworkDetectorConfig::default());
        for _ in 0..5 {
            detector.probe(|| ok(10)).await;
        }
        assert_eq!(detector.current_quality(), Quality::Good);
        assert!(detector.smoothed_rtt().is_some());
    }

    #[tokio::test]
    async fn mostly_failing_window_degrades() {
        let mut config = NetworkDetectorConfig::default();
        config.window = 4;
        let detector = NetworkDetector::new(config);

        detector.probe(|| ok(10)).await;
        detector.probe(|| fail()).await;
        detector.probe(|| fail()).await;
        detector.probe(|| ok(10)).await;

        assert_eq!(detector.current_quality(), Quality::Degraded);
    }

    #[tokio::test]
    async fn all_failing_window_goes_offline() {
        let mut config = NetworkDetectorConfig::default();
        config.window = 4;
        let detector = NetworkDetector::new(config);

        for _ in 0..4 {
            detector.probe(|| fail()).await;
        }

        assert_eq!(detector.current_quality(), Quality::Offline);
    }

    #[tokio::test]
    async fn failures_never_propagate_as_errors() {
        let detector = NetworkDetector::new(NetworkDetectorConfig::default());
        let sample = detector.probe(|| fail()).await;
        assert!(!sample.ok);
        assert!(sample.rtt.is_none());
    }

    #[tokio::test]
    async fn subscribers_observe_quality_transitions() {
        let mut config = NetworkDetectorConfig::default();
        config.window = 2;
        let detector = NetworkDetector::new(config);
        let mut rx = detector.subscribe();

        detector.probe(|| fail()).await;
        detector.probe(|| fail()).await;

        let mut saw_transition = false;
        while let Ok(event) = rx.try_recv() {
            if let NetworkEvent::QualityChanged { to, .. } = event {
                if to == Quality::Offline {
                    saw_transition = true;
                }
            }
        }
        assert!(saw_transition);
    }

    #[tokio::test]
    async fn poll_interval_shortens_as_quality_degrades() {
        let mut config = NetworkDetectorConfig::default();
        config.window = 2;
        config.poll_good = Duration::from_secs(10);
        config.poll_offline = Duration::from_secs(2);
        let detector = NetworkDetector::new(config);

        for _ in 0..2 {
            detector.probe(|| fail()).await;
        }
        assert_eq!(detector.current_quality(), Quality::Offline);
        assert!(detector.next_poll_interval() <= Duration::from_secs(3));
    }
}
