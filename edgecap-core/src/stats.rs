//! Pipeline counters.
//!
//! Failures on the delivery path never surface as errors; these counters
//! plus the logs are how an operator sees them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::outcome::DeliveryOutcome;
use crate::throughput::ThroughputEstimator;

/// Shared, lock-free counters updated by all three pipeline tasks.
#[derive(Default)]
pub struct PipelineStats {
    captured: AtomicU64,
    capture_failures: AtomicU64,
    attempts: AtomicU64,
    delivered: AtomicU64,
    rejected_terminal: AtomicU64,
    rejected_transient: AtomicU64,
    transport_failures: AtomicU64,
    escalated: AtomicU64,
    requeued: AtomicU64,
    abandoned: AtomicU64,
    throughput: Mutex<ThroughputEstimator>,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_capture(&self) {
        self.captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_capture_failure(&self) {
        self.capture_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one finished delivery attempt.
    pub fn record_attempt(&self, outcome: DeliveryOutcome, bytes: usize, rtt: Duration) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            DeliveryOutcome::Delivered => &self.delivered,
            DeliveryOutcome::RejectedTerminal => &self.rejected_terminal,
            DeliveryOutcome::RejectedTransient => &self.rejected_transient,
            DeliveryOutcome::TransportFailure => &self.transport_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let sent = (outcome != DeliveryOutcome::TransportFailure).then_some(bytes as u64);
        self.throughput.lock().observe(sent, rtt);
    }

    /// A payload moved from Tier-1 into Tier-2.
    pub fn record_escalation(&self) {
        self.escalated.fetch_add(1, Ordering::Relaxed);
    }

    /// A payload was pushed back into Tier-2 after a failed retry.
    pub fn record_requeue(&self) {
        self.requeued.fetch_add(1, Ordering::Relaxed);
    }

    /// A payload exhausted its retry budget.
    pub fn record_abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn escalated(&self) -> u64 {
        self.escalated.load(Ordering::Relaxed)
    }

    pub fn requeued(&self) -> u64 {
        self.requeued.load(Ordering::Relaxed)
    }

    /// Current upload rate (bytes/s) and smoothed attempt RTT.
    pub fn link_estimate(&self) -> (u64, Duration) {
        let est = self.throughput.lock();
        (est.upload_bps(), est.srtt())
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self, tier1_depth: usize, tier2_depth: usize) -> StatsSnapshot {
        let (upload_bps, latency) = self.link_estimate();
        StatsSnapshot {
            captured: self.captured.load(Ordering::Relaxed),
            capture_failures: self.capture_failures.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            rejected_terminal: self.rejected_terminal.load(Ordering::Relaxed),
            rejected_transient: self.rejected_transient.load(Ordering::Relaxed),
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
            escalated: self.escalated.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            tier1_depth,
            tier2_depth,
            upload_bps,
            latency_ms: latency.as_millis() as u64,
        }
    }
}

/// Serializable view of [`PipelineStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub captured: u64,
    pub capture_failures: u64,
    pub attempts: u64,
    pub delivered: u64,
    pub rejected_terminal: u64,
    pub rejected_transient: u64,
    pub transport_failures: u64,
    pub escalated: u64,
    pub requeued: u64,
    pub abandoned: u64,
    pub tier1_depth: usize,
    pub tier2_depth: usize,
    pub upload_bps: u64,
    pub latency_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempts_are_bucketed_by_outcome() {
        let stats = PipelineStats::new();
        stats.record_attempt(DeliveryOutcome::Delivered, 100, Duration::from_millis(5));
        stats.record_attempt(DeliveryOutcome::TransportFailure, 100, Duration::from_millis(5));
        stats.record_attempt(DeliveryOutcome::RejectedTransient, 100, Duration::from_millis(5));
        stats.record_escalation();

        let snap = stats.snapshot(0, 1);
        assert_eq!(snap.attempts, 3);
        assert_eq!(snap.delivered, 1);
        assert_eq!(snap.transport_failures, 1);
        assert_eq!(snap.rejected_transient, 1);
        assert_eq!(snap.escalated, 1);
        assert_eq!(snap.tier2_depth, 1);
        assert_eq!(snap.latency_ms, 5);
    }
}
