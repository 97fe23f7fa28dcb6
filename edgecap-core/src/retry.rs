//! Retry-tier timing policy.
//!
//! The retry worker waits `retry_delay` before every attempt so a
//! recovering server is not hammered, and after a failed attempt it
//! cools down for `cooldown_for(n)` where `n` counts that payload's failed
//! retries. Other payloads' outcomes do not reset it, so the cooldown for a
//! payload never shrinks while it keeps failing.

use std::time::{Duration, Instant};

use crate::payload::Pending;

/// Timing and budget for the retry tier.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Throttle before each retry attempt.
    pub retry_delay: Duration,
    /// Cooldown after the first consecutive failure.
    pub cooldown: Duration,
    /// Growth factor per further consecutive failure (1.0 = fixed).
    pub multiplier: f64,
    /// Upper bound for the cooldown.
    pub max_cooldown: Duration,
    /// Abandon a payload after this many attempts (primary included).
    pub max_attempts: Option<u32>,
    /// Abandon a payload this long after it was first queued.
    pub max_age: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(5),
            cooldown: Duration::from_secs(25),
            multiplier: 1.0,
            max_cooldown: Duration::from_secs(300),
            max_attempts: None,
            max_age: None,
        }
    }
}

/// Why a payload was given up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exhausted {
    Attempts(u32),
    Age(Duration),
}

impl RetryPolicy {
    /// Cooldown after a payload's `consecutive_failures`-th failed retry.
    ///
    /// Zero failures means no cooldown.
    pub fn cooldown_for(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }
        let base = self.cooldown.min(self.max_cooldown);
        let factor = self.multiplier.max(1.0).powi((consecutive_failures - 1).min(64) as i32);
        let scaled = base.as_secs_f64() * factor;
        if !scaled.is_finite() || scaled >= self.max_cooldown.as_secs_f64() {
            return self.max_cooldown.max(base);
        }
        Duration::from_secs_f64(scaled)
    }

    /// Whether `pending` has used up its budget.
    pub fn exhausted(&self, pending: &Pending, now: Instant) -> Option<Exhausted> {
        if let Some(max) = self.max_attempts {
            if pending.attempts >= max {
                return Some(Exhausted::Attempts(pending.attempts));
            }
        }
        if let Some(max_age) = self.max_age {
            let age = now.saturating_duration_since(pending.first_queued);
            if age >= max_age {
                return Some(Exhausted::Age(age));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{Artifact, Identity, Payload};
    use std::time::SystemTime;

    fn pending() -> Pending {
        let id = Identity::new("D1", "http://127.0.0.1/x").unwrap();
        let artifact = Artifact::new(vec![0u8; 3], "(1, 1, 3)");
        Pending::new(Payload::from_artifact(1, &artifact, &id, SystemTime::now()).unwrap())
    }

    #[test]
    fn fixed_cooldown_by_default() {
        let p = RetryPolicy::default();
        assert_eq!(p.cooldown_for(0), Duration::ZERO);
        assert_eq!(p.cooldown_for(1), Duration::from_secs(25));
        assert_eq!(p.cooldown_for(10), Duration::from_secs(25));
    }

    #[test]
    fn escalating_cooldown_is_capped() {
        let p = RetryPolicy {
            multiplier: 2.0,
            cooldown: Duration::from_secs(10),
            max_cooldown: Duration::from_secs(60),
            ..RetryPolicy::default()
        };
        assert_eq!(p.cooldown_for(1), Duration::from_secs(10));
        assert_eq!(p.cooldown_for(2), Duration::from_secs(20));
        assert_eq!(p.cooldown_for(3), Duration::from_secs(40));
        assert_eq!(p.cooldown_for(4), Duration::from_secs(60));
        assert_eq!(p.cooldown_for(500), Duration::from_secs(60));
    }

    #[test]
    fn cooldown_never_decreases() {
        let p = RetryPolicy {
            multiplier: 1.7,
            ..RetryPolicy::default()
        };
        let mut last = Duration::ZERO;
        for n in 0..100 {
            let d = p.cooldown_for(n);
            assert!(d >= last, "cooldown shrank at {n}: {d:?} < {last:?}");
            last = d;
        }
    }

    #[test]
    fn budget_unbounded_by_default() {
        let mut p = pending();
        p.attempts = 10_000;
        let later = p.first_queued + Duration::from_secs(86_400);
        assert!(RetryPolicy::default().exhausted(&p, later).is_none());
    }

    #[test]
    fn budget_by_attempts_and_age() {
        let policy = RetryPolicy {
            max_attempts: Some(3),
            max_age: Some(Duration::from_secs(60)),
            ..RetryPolicy::default()
        };
        let mut p = pending();
        p.attempts = 2;
        assert!(policy.exhausted(&p, p.first_queued).is_none());
        p.attempts = 3;
        assert_eq!(policy.exhausted(&p, p.first_queued), Some(Exhausted::Attempts(3)));

        p.attempts = 1;
        let later = p.first_queued + Duration::from_secs(61);
        assert!(matches!(policy.exhausted(&p, later), Some(Exhausted::Age(_))));
    }
}
