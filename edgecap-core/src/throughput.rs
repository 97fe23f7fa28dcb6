//! Upload throughput and latency estimate.
//!
//! Every finished attempt is observed once: its body size (when the
//! server actually received it) goes into a rolling byte window, and its
//! round-trip time into a smoothed RTT. Both surface in the pipeline stats.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Rates over spans shorter than this are reported per this span.
const MIN_SPAN: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    bytes: u64,
}

/// Rolling-window throughput estimator.
#[derive(Debug)]
pub struct ThroughputEstimator {
    window: Duration,
    samples: VecDeque<Sample>,
    bytes_in_window: u64,
    srtt: Option<Duration>,
}

impl ThroughputEstimator {
    /// Estimator over the last 60 seconds.
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(60))
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
            bytes_in_window: 0,
            srtt: None,
        }
    }

    /// Observe one attempt finishing now. `bytes` is `None` when nothing
    /// reached the server (transport failure).
    pub fn observe(&mut self, bytes: Option<u64>, rtt: Duration) {
        self.observe_at(Instant::now(), bytes, rtt);
    }

    pub fn observe_at(&mut self, at: Instant, bytes: Option<u64>, rtt: Duration) {
        if let Some(bytes) = bytes {
            self.samples.push_back(Sample { at, bytes });
            self.bytes_in_window += bytes;
        }
        self.prune(at);

        // EWMA with α = 1/8.
        self.srtt = Some(match self.srtt {
            None => rtt,
            Some(srtt) => srtt - srtt / 8 + rtt / 8,
        });
    }

    /// Bytes per second over the span covered by the window.
    pub fn upload_bps(&self) -> u64 {
        let (Some(first), Some(last)) = (self.samples.front(), self.samples.back()) else {
            return 0;
        };
        let span = last.at.duration_since(first.at).max(MIN_SPAN);
        (self.bytes_in_window as f64 / span.as_secs_f64()) as u64
    }

    /// Smoothed round-trip time; zero until the first observation.
    pub fn srtt(&self) -> Duration {
        self.srtt.unwrap_or(Duration::ZERO)
    }

    pub fn samples(&self) -> usize {
        self.samples.len()
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.samples.front().copied() {
            if now.duration_since(oldest.at) <= self.window {
                break;
            }
            self.samples.pop_front();
            self.bytes_in_window = self.bytes_in_window.saturating_sub(oldest.bytes);
        }
    }
}

impl Default for ThroughputEstimator {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const RTT: Duration = Duration::from_millis(20);

    #[test]
    fn empty_estimator_returns_zero() {
        let est = ThroughputEstimator::new();
        assert_eq!(est.upload_bps(), 0);
        assert_eq!(est.srtt(), Duration::ZERO);
    }

    #[test]
    fn short_bursts_are_reported_per_second() {
        let mut est = ThroughputEstimator::new();
        let t0 = Instant::now();
        est.observe_at(t0, Some(700), RTT);
        est.observe_at(t0 + Duration::from_millis(10), Some(300), RTT);
        assert_eq!(est.upload_bps(), 1_000);
    }

    #[test]
    fn rate_over_window_span() {
        let mut est = ThroughputEstimator::with_window(Duration::from_secs(5));
        let t0 = Instant::now();
        est.observe_at(t0, Some(500_000), RTT);
        est.observe_at(t0 + Duration::from_secs(2), Some(500_000), RTT);
        assert_eq!(est.upload_bps(), 500_000);
    }

    #[test]
    fn transport_failures_only_move_rtt() {
        let mut est = ThroughputEstimator::new();
        est.observe(None, Duration::from_millis(40));
        assert_eq!(est.samples(), 0);
        assert_eq!(est.upload_bps(), 0);
        assert_eq!(est.srtt(), Duration::from_millis(40));
    }

    #[test]
    fn old_samples_leave_the_window() {
        let mut est = ThroughputEstimator::with_window(Duration::from_millis(500));
        let t0 = Instant::now();
        est.observe_at(t0, Some(1_000), RTT);
        est.observe_at(t0 + Duration::from_secs(1), Some(500), RTT);
        assert_eq!(est.samples(), 1);
        assert_eq!(est.upload_bps(), 500);
    }

    #[test]
    fn smoothed_rtt() {
        let mut est = ThroughputEstimator::new();
        est.observe(None, Duration::from_millis(80));
        est.observe(None, Duration::from_millis(16));
        // 80 - 80/8 + 16/8
        assert_eq!(est.srtt(), Duration::from_millis(72));
    }
}
