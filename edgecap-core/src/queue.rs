//! Thread-safe FIFO used for both delivery tiers.
//!
//! `push` and `try_pop` never block. Workers that find the queue empty
//! call [`DeliveryQueue::wait_non_empty`], which resolves on the next push
//! or after an idle timeout, whichever comes first.
//!
//! By default the queue is unbounded. A capacity can be set together with
//! an [`OverflowPolicy`]; every payload discarded by the policy is logged
//! and counted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::warn;

use crate::payload::Pending;

// ── OverflowPolicy ───────────────────────────────────────────────

/// What to do when a capped queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Evict the oldest queued payload to make room.
    #[default]
    DropOldest,
    /// Refuse the incoming payload.
    RejectNewest,
}

/// Result of a [`DeliveryQueue::push`].
#[derive(Debug)]
pub enum PushResult {
    /// Stored without side effects.
    Queued,
    /// Stored; the returned oldest entry was evicted.
    Evicted(Pending),
    /// Not stored; the queue was full under `RejectNewest`.
    Rejected(Pending),
}

// ── DeliveryQueue ────────────────────────────────────────────────

/// FIFO of pending payloads for one delivery tier.
pub struct DeliveryQueue {
    name: &'static str,
    items: Mutex<VecDeque<Pending>>,
    capacity: Option<usize>,
    policy: OverflowPolicy,
    notify: Notify,
    total_pushed: AtomicU64,
    total_popped: AtomicU64,
    total_dropped: AtomicU64,
}

impl DeliveryQueue {
    /// Create an unbounded queue.
    pub fn unbounded(name: &'static str) -> Self {
        Self::with_capacity(name, None, OverflowPolicy::default())
    }

    /// Create a queue with an optional cap.
    pub fn with_capacity(
        name: &'static str,
        capacity: Option<usize>,
        policy: OverflowPolicy,
    ) -> Self {
        Self {
            name,
            items: Mutex::new(VecDeque::new()),
            capacity: capacity.map(|c| c.max(1)),
            policy,
            notify: Notify::new(),
            total_pushed: AtomicU64::new(0),
            total_popped: AtomicU64::new(0),
            total_dropped: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Append to the back of the queue.
    pub fn push(&self, item: Pending) -> PushResult {
        let result = {
            let mut items = self.items.lock();
            match self.capacity {
                Some(cap) if items.len() >= cap => match self.policy {
                    OverflowPolicy::DropOldest => {
                        let evicted = items.pop_front();
                        items.push_back(item);
                        match evicted {
                            Some(old) => PushResult::Evicted(old),
                            None => PushResult::Queued,
                        }
                    }
                    OverflowPolicy::RejectNewest => PushResult::Rejected(item),
                },
                _ => {
                    items.push_back(item);
                    PushResult::Queued
                }
            }
        };

        match &result {
            PushResult::Queued => {
                self.total_pushed.fetch_add(1, Ordering::Relaxed);
            }
            PushResult::Evicted(old) => {
                self.total_pushed.fetch_add(1, Ordering::Relaxed);
                self.total_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    queue = self.name,
                    seq = old.payload.seq(),
                    digest = old.payload.digest(),
                    "queue full; evicted oldest payload"
                );
            }
            PushResult::Rejected(new) => {
                self.total_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    queue = self.name,
                    seq = new.payload.seq(),
                    digest = new.payload.digest(),
                    "queue full; rejected newest payload"
                );
            }
        }

        if !matches!(result, PushResult::Rejected(_)) {
            self.notify.notify_one();
        }
        result
    }

    /// Pop the front entry without waiting.
    pub fn try_pop(&self) -> Option<Pending> {
        let item = self.items.lock().pop_front();
        if item.is_some() {
            self.total_popped.fetch_add(1, Ordering::Relaxed);
        }
        item
    }

    /// Resolve once the queue is non-empty or `idle` has elapsed.
    ///
    /// Returns `true` if the queue holds at least one entry.
    pub async fn wait_non_empty(&self, idle: Duration) -> bool {
        let notified = self.notify.notified();
        if !self.is_empty() {
            return true;
        }
        let _ = tokio::time::timeout(idle, notified).await;
        !self.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Sequence numbers currently queued, front first.
    pub fn queued_seqs(&self) -> Vec<u64> {
        self.items.lock().iter().map(|p| p.payload.seq()).collect()
    }

    pub fn total_pushed(&self) -> u64 {
        self.total_pushed.load(Ordering::Relaxed)
    }

    pub fn total_popped(&self) -> u64 {
        self.total_popped.load(Ordering::Relaxed)
    }

    /// Payloads discarded by the overflow policy.
    pub fn total_dropped(&self) -> u64 {
        self.total_dropped.load(Ordering::Relaxed)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{Artifact, Identity, Payload};
    use std::sync::Arc;
    use std::time::SystemTime;

    fn pending(seq: u64) -> Pending {
        let id = Identity::new("D1", "http://127.0.0.1/x").unwrap();
        let artifact = Artifact::new(seq.to_le_bytes().to_vec(), "(1,)");
        Pending::new(Payload::from_artifact(seq, &artifact, &id, SystemTime::now()).unwrap())
    }

    #[test]
    fn fifo_order() {
        let q = DeliveryQueue::unbounded("t1");
        for seq in 1..=3 {
            q.push(pending(seq));
        }
        assert_eq!(q.len(), 3);
        assert_eq!(q.try_pop().unwrap().payload.seq(), 1);
        assert_eq!(q.try_pop().unwrap().payload.seq(), 2);
        assert_eq!(q.try_pop().unwrap().payload.seq(), 3);
        assert!(q.try_pop().is_none());
        assert!(q.is_empty());
        assert_eq!(q.total_pushed(), 3);
        assert_eq!(q.total_popped(), 3);
    }

    #[test]
    fn drop_oldest_evicts_front() {
        let q = DeliveryQueue::with_capacity("t2", Some(2), OverflowPolicy::DropOldest);
        q.push(pending(1));
        q.push(pending(2));
        match q.push(pending(3)) {
            PushResult::Evicted(old) => assert_eq!(old.payload.seq(), 1),
            other => panic!("expected eviction, got {other:?}"),
        }
        assert_eq!(q.queued_seqs(), vec![2, 3]);
        assert_eq!(q.total_dropped(), 1);
    }

    #[test]
    fn reject_newest_keeps_contents() {
        let q = DeliveryQueue::with_capacity("t2", Some(1), OverflowPolicy::RejectNewest);
        q.push(pending(1));
        assert!(matches!(q.push(pending(2)), PushResult::Rejected(_)));
        assert_eq!(q.queued_seqs(), vec![1]);
        assert_eq!(q.total_dropped(), 1);
        assert_eq!(q.total_pushed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_when_empty() {
        let q = DeliveryQueue::unbounded("t1");
        assert!(!q.wait_non_empty(Duration::from_millis(100)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_is_pending_until_push() {
        let q = DeliveryQueue::unbounded("t1");
        let mut wait = tokio_test::task::spawn(q.wait_non_empty(Duration::from_secs(60)));
        tokio_test::assert_pending!(wait.poll());

        q.push(pending(7));
        assert!(wait.is_woken());
        tokio_test::assert_ready_eq!(wait.poll(), true);
    }

    #[tokio::test]
    async fn wait_wakes_on_push() {
        let q = Arc::new(DeliveryQueue::unbounded("t1"));
        let waiter = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.wait_non_empty(Duration::from_secs(30)).await })
        };
        tokio::task::yield_now().await;
        q.push(pending(1));
        let ready = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("waiter did not wake")
            .unwrap();
        assert!(ready);
    }
}
