//! Delivery workers.
//!
//! ```text
//!  Tier-1 ──► PrimaryWorker ──► delivered / rejected (dropped)
//!                  │ retryable
//!                  ▼
//!  Tier-2 ◄──► RetryWorker ──► delivered / rejected (dropped)
//! ```
//!
//! The primary worker makes exactly one attempt per payload and escalates
//! every retryable failure to Tier-2 unchanged. The retry worker throttles
//! before each attempt and cools down after each failure, so Tier-2 keeps
//! cycling until the payload reaches a terminal outcome.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::outcome::Attempt;
use crate::payload::Pending;
use crate::queue::DeliveryQueue;
use crate::retry::{Exhausted, RetryPolicy};
use crate::stats::PipelineStats;
use crate::transport::Deliver;

/// Default idle poll for an empty queue.
pub const DEFAULT_IDLE_POLL: Duration = Duration::from_millis(100);

// ── Shared helpers ───────────────────────────────────────────────

/// Make one attempt, bump the attempt counter and record stats.
///
/// Returns `None` if cancelled mid-flight; the payload is then dropped
/// with the process.
async fn attempt_once(
    transport: &dyn Deliver,
    pending: &mut Pending,
    stats: &PipelineStats,
    token: &CancellationToken,
) -> Option<Attempt> {
    let started = Instant::now();
    let attempt = tokio::select! {
        a = transport.deliver(&pending.payload) => a,
        _ = token.cancelled() => return None,
    };
    pending.attempts += 1;
    stats.record_attempt(attempt.outcome, pending.payload.body_len(), started.elapsed());
    Some(attempt)
}

/// Sleep for `d` unless cancelled first. Returns `false` on cancellation.
async fn pause(d: Duration, token: &CancellationToken) -> bool {
    if d.is_zero() {
        return !token.is_cancelled();
    }
    tokio::select! {
        _ = tokio::time::sleep(d) => true,
        _ = token.cancelled() => false,
    }
}

/// Wait for work on `queue`. Returns `false` on cancellation.
async fn idle(queue: &DeliveryQueue, poll: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = queue.wait_non_empty(poll) => true,
        _ = token.cancelled() => false,
    }
}

fn log_terminal(tier: &'static str, pending: &Pending, attempt: &Attempt) {
    info!(
        tier,
        seq = pending.payload.seq(),
        digest = pending.payload.digest(),
        attempts = pending.attempts,
        outcome = %attempt.outcome,
        status = attempt.status,
        detail = attempt.detail.as_deref().unwrap_or(""),
        "payload finished"
    );
}

// ── PrimaryWorker ────────────────────────────────────────────────

/// Drains Tier-1 and escalates retryable failures to Tier-2.
pub struct PrimaryWorker {
    tier1: Arc<DeliveryQueue>,
    tier2: Arc<DeliveryQueue>,
    transport: Arc<dyn Deliver>,
    stats: Arc<PipelineStats>,
    idle_poll: Duration,
}

impl PrimaryWorker {
    pub fn new(
        tier1: Arc<DeliveryQueue>,
        tier2: Arc<DeliveryQueue>,
        transport: Arc<dyn Deliver>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            tier1,
            tier2,
            transport,
            stats,
            idle_poll: DEFAULT_IDLE_POLL,
        }
    }

    pub fn with_idle_poll(mut self, idle_poll: Duration) -> Self {
        self.idle_poll = idle_poll;
        self
    }

    /// Run until `token` is cancelled.
    pub async fn run(self, token: CancellationToken) {
        info!("primary delivery worker started");

        while !token.is_cancelled() {
            let Some(mut pending) = self.tier1.try_pop() else {
                if !idle(&self.tier1, self.idle_poll, &token).await {
                    break;
                }
                continue;
            };

            let Some(attempt) =
                attempt_once(self.transport.as_ref(), &mut pending, &self.stats, &token).await
            else {
                break;
            };

            if attempt.outcome.is_terminal() {
                log_terminal("primary", &pending, &attempt);
                continue;
            }

            warn!(
                seq = pending.payload.seq(),
                digest = pending.payload.digest(),
                outcome = %attempt.outcome,
                status = attempt.status,
                detail = attempt.detail.as_deref().unwrap_or(""),
                "delivery failed; escalating to retry tier"
            );
            self.stats.record_escalation();
            self.tier2.push(pending);
        }

        info!("primary delivery worker stopped");
    }
}

// ── RetryWorker ──────────────────────────────────────────────────

/// Drains Tier-2 on a throttled cadence with non-decreasing backoff.
pub struct RetryWorker {
    tier2: Arc<DeliveryQueue>,
    transport: Arc<dyn Deliver>,
    stats: Arc<PipelineStats>,
    policy: RetryPolicy,
    idle_poll: Duration,
}

impl RetryWorker {
    pub fn new(
        tier2: Arc<DeliveryQueue>,
        transport: Arc<dyn Deliver>,
        stats: Arc<PipelineStats>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            tier2,
            transport,
            stats,
            policy,
            idle_poll: DEFAULT_IDLE_POLL,
        }
    }

    pub fn with_idle_poll(mut self, idle_poll: Duration) -> Self {
        self.idle_poll = idle_poll;
        self
    }

    /// Run until `token` is cancelled.
    pub async fn run(self, token: CancellationToken) {
        info!(
            retry_delay_ms = self.policy.retry_delay.as_millis() as u64,
            cooldown_ms = self.policy.cooldown.as_millis() as u64,
            "retry delivery worker started"
        );
        while !token.is_cancelled() {
            if self.tier2.is_empty() {
                if !idle(&self.tier2, self.idle_poll, &token).await {
                    break;
                }
                continue;
            }

            if !pause(self.policy.retry_delay, &token).await {
                break;
            }
            let Some(mut pending) = self.tier2.try_pop() else {
                continue;
            };

            let Some(attempt) =
                attempt_once(self.transport.as_ref(), &mut pending, &self.stats, &token).await
            else {
                break;
            };

            if attempt.outcome.is_terminal() {
                log_terminal("retry", &pending, &attempt);
                continue;
            }

            pending.retry_failures = pending.retry_failures.saturating_add(1);
            let failures = pending.retry_failures;
            let pending_seq = pending.payload.seq();

            if let Some(why) = self.policy.exhausted(&pending, Instant::now()) {
                self.stats.record_abandoned();
                let reason = match why {
                    Exhausted::Attempts(n) => format!("{n} attempts"),
                    Exhausted::Age(age) => format!("age {}s", age.as_secs()),
                };
                warn!(
                    seq = pending.payload.seq(),
                    digest = pending.payload.digest(),
                    outcome = %attempt.outcome,
                    reason = %reason,
                    "retry budget exhausted; dropping payload"
                );
            } else {
                self.stats.record_requeue();
                self.tier2.push(pending);
            }

            let cooldown = self.policy.cooldown_for(failures);
            let (upload_bps, srtt) = self.stats.link_estimate();
            debug!(
                outcome = %attempt.outcome,
                status = attempt.status,
                seq = pending_seq,
                retry_failures = failures,
                cooldown_ms = cooldown.as_millis() as u64,
                queued = self.tier2.len(),
                upload_bps,
                srtt_ms = srtt.as_millis() as u64,
                "retry failed; cooling down"
            );
            if !pause(cooldown, &token).await {
                break;
            }
        }

        info!("retry delivery worker stopped");
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::DeliveryOutcome;
    use crate::payload::{Artifact, Identity, Payload};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::SystemTime;

    /// Replays scripted outcomes, then keeps returning the fallback.
    struct Scripted {
        script: Mutex<VecDeque<DeliveryOutcome>>,
        fallback: DeliveryOutcome,
        calls: Mutex<Vec<(u64, tokio::time::Instant)>>,
    }

    impl Scripted {
        fn new(script: &[DeliveryOutcome], fallback: DeliveryOutcome) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.iter().copied().collect()),
                fallback,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Deliver for Scripted {
        async fn deliver(&self, payload: &Payload) -> Attempt {
            self.calls
                .lock()
                .push((payload.seq(), tokio::time::Instant::now()));
            let outcome = self.script.lock().pop_front().unwrap_or(self.fallback);
            Attempt::new(outcome)
        }
    }

    fn pending(seq: u64) -> Pending {
        let id = Identity::new("D1", "http://127.0.0.1/x").unwrap();
        let artifact = Artifact::new(seq.to_le_bytes().to_vec(), "(8,)");
        Pending::new(Payload::from_artifact(seq, &artifact, &id, SystemTime::now()).unwrap())
    }

    fn queues() -> (Arc<DeliveryQueue>, Arc<DeliveryQueue>) {
        (
            Arc::new(DeliveryQueue::unbounded("tier1")),
            Arc::new(DeliveryQueue::unbounded("tier2")),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn primary_discards_terminal_outcomes() {
        let (t1, t2) = queues();
        let stats = Arc::new(PipelineStats::new());
        let transport = Scripted::new(
            &[DeliveryOutcome::Delivered, DeliveryOutcome::RejectedTerminal],
            DeliveryOutcome::Delivered,
        );
        t1.push(pending(1));
        t1.push(pending(2));

        let token = CancellationToken::new();
        let worker = PrimaryWorker::new(t1.clone(), t2.clone(), transport.clone(), stats.clone());
        let handle = tokio::spawn(worker.run(token.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
        handle.await.unwrap();

        assert!(t1.is_empty());
        assert!(t2.is_empty());
        assert_eq!(stats.escalated(), 0);
        let seqs: Vec<u64> = transport.calls.lock().iter().map(|c| c.0).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn primary_escalates_each_failure_once() {
        let (t1, t2) = queues();
        let stats = Arc::new(PipelineStats::new());
        let transport = Scripted::new(
            &[
                DeliveryOutcome::TransportFailure,
                DeliveryOutcome::RejectedTransient,
            ],
            DeliveryOutcome::Delivered,
        );
        t1.push(pending(1));
        t1.push(pending(2));

        let token = CancellationToken::new();
        let worker = PrimaryWorker::new(t1.clone(), t2.clone(), transport.clone(), stats.clone());
        let handle = tokio::spawn(worker.run(token.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
        handle.await.unwrap();

        assert_eq!(transport.calls.lock().len(), 2);
        assert_eq!(t2.queued_seqs(), vec![1, 2]);
        assert_eq!(stats.escalated(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_worker_throttles_then_delivers() {
        let (_, t2) = queues();
        let stats = Arc::new(PipelineStats::new());
        let transport = Scripted::new(&[], DeliveryOutcome::Delivered);
        let mut p = pending(1);
        p.attempts = 1;
        t2.push(p);

        let start = tokio::time::Instant::now();
        let token = CancellationToken::new();
        let worker = RetryWorker::new(t2.clone(), transport.clone(), stats.clone(), RetryPolicy::default());
        let handle = tokio::spawn(worker.run(token.clone()));

        tokio::time::sleep(Duration::from_secs(10)).await;
        token.cancel();
        handle.await.unwrap();

        let calls = transport.calls.lock().clone();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].1 - start >= Duration::from_secs(5));
        assert!(t2.is_empty());
        assert_eq!(stats.delivered(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_backoff_is_non_decreasing() {
        let (_, t2) = queues();
        let stats = Arc::new(PipelineStats::new());
        let transport = Scripted::new(&[], DeliveryOutcome::TransportFailure);
        t2.push(pending(1));

        let policy = RetryPolicy {
            retry_delay: Duration::from_secs(1),
            cooldown: Duration::from_secs(2),
            multiplier: 2.0,
            max_cooldown: Duration::from_secs(20),
            ..RetryPolicy::default()
        };
        let token = CancellationToken::new();
        let worker = RetryWorker::new(t2.clone(), transport.clone(), stats.clone(), policy);
        let handle = tokio::spawn(worker.run(token.clone()));

        tokio::time::sleep(Duration::from_secs(120)).await;
        token.cancel();
        handle.await.unwrap();

        let calls = transport.calls.lock().clone();
        assert!(calls.len() >= 5, "only {} attempts", calls.len());
        let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1].1 - w[0].1).collect();
        for pair in gaps.windows(2) {
            assert!(pair[1] >= pair[0], "backoff shrank: {gaps:?}");
        }
        // Never duplicated while cycling.
        assert_eq!(t2.len(), 1);
    }

    /// Fails one sequence number forever and accepts everything else.
    struct FailsSeq {
        failing: u64,
        calls: Mutex<Vec<(u64, tokio::time::Instant)>>,
    }

    #[async_trait]
    impl Deliver for FailsSeq {
        async fn deliver(&self, payload: &Payload) -> Attempt {
            self.calls
                .lock()
                .push((payload.seq(), tokio::time::Instant::now()));
            if payload.seq() == self.failing {
                Attempt::new(DeliveryOutcome::RejectedTransient)
            } else {
                Attempt::new(DeliveryOutcome::Delivered)
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn other_payloads_do_not_reset_backoff() {
        let (_, t2) = queues();
        let stats = Arc::new(PipelineStats::new());
        let transport = Arc::new(FailsSeq {
            failing: 1,
            calls: Mutex::new(Vec::new()),
        });
        t2.push(pending(1));
        t2.push(pending(2));

        let policy = RetryPolicy {
            retry_delay: Duration::from_secs(1),
            cooldown: Duration::from_secs(2),
            multiplier: 2.0,
            max_cooldown: Duration::from_secs(100),
            ..RetryPolicy::default()
        };
        let token = CancellationToken::new();
        let worker = RetryWorker::new(t2.clone(), transport.clone(), stats.clone(), policy);
        let handle = tokio::spawn(worker.run(token.clone()));

        tokio::time::sleep(Duration::from_secs(30)).await;
        token.cancel();
        handle.await.unwrap();

        let calls = transport.calls.lock().clone();
        let seqs: Vec<u64> = calls.iter().map(|c| c.0).collect();
        assert_eq!(&seqs[..3], &[1, 2, 1]);
        assert_eq!(stats.delivered(), 1);

        // Seq 1 attempts at t = 1, 5, 10, 19: the delivery of seq 2 in
        // between does not shrink its cooldown.
        let times: Vec<_> = calls.iter().filter(|c| c.0 == 1).map(|c| c.1).collect();
        assert!(times.len() >= 4, "only {} attempts", times.len());
        let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
        for pair in gaps.windows(2) {
            assert!(pair[1] >= pair[0], "backoff shrank: {gaps:?}");
        }
        assert_eq!(t2.try_pop().unwrap().retry_failures, times.len() as u32);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_budget_drops_payload() {
        let (_, t2) = queues();
        let stats = Arc::new(PipelineStats::new());
        let transport = Scripted::new(&[], DeliveryOutcome::RejectedTransient);
        let mut p = pending(1);
        p.attempts = 1;
        t2.push(p);

        let policy = RetryPolicy {
            retry_delay: Duration::from_millis(10),
            cooldown: Duration::from_millis(10),
            max_attempts: Some(3),
            ..RetryPolicy::default()
        };
        let token = CancellationToken::new();
        let worker = RetryWorker::new(t2.clone(), transport.clone(), stats.clone(), policy);
        let handle = tokio::spawn(worker.run(token.clone()));

        tokio::time::sleep(Duration::from_secs(5)).await;
        token.cancel();
        handle.await.unwrap();

        assert_eq!(transport.calls.lock().len(), 2);
        assert!(t2.is_empty());
        assert_eq!(stats.snapshot(0, 0).abandoned, 1);
    }
}
