//! Sense-and-capture loop.
//!
//! Polls the trigger sensor; when it fires, grabs one artifact from the
//! camera, stamps it with the current identity snapshot and pushes it to
//! Tier-1. Delivery problems never reach this loop: pushing is
//! non-blocking and the loop only ever talks to the queue.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::EdgecapError;
use crate::identity::IdentityHandle;
use crate::payload::{Artifact, Payload, Pending};
use crate::queue::{DeliveryQueue, PushResult};
use crate::stats::PipelineStats;

// ── Collaborators ────────────────────────────────────────────────

/// Trigger condition (motion / presence).
#[async_trait]
pub trait Sensor: Send {
    /// `true` while the trigger is active.
    async fn sense(&mut self) -> Result<bool, EdgecapError>;
}

/// Produces one artifact per call.
#[async_trait]
pub trait Camera: Send {
    async fn capture(&mut self) -> Result<Artifact, EdgecapError>;
}

/// Local signalling while a capture is in progress (e.g. an LED).
pub trait Indicator: Send {
    fn set(&mut self, on: bool);
}

/// Indicator that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoIndicator;

impl Indicator for NoIndicator {
    fn set(&mut self, _on: bool) {}
}

// ── CaptureTiming ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CaptureTiming {
    /// Sleep between polls while the trigger is inactive.
    pub idle_interval: Duration,
    /// Sleep after each capture so one event yields one payload.
    pub cooldown: Duration,
}

impl Default for CaptureTiming {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_millis(250),
            cooldown: Duration::from_secs(2),
        }
    }
}

// ── CaptureLoop ──────────────────────────────────────────────────

/// The producer side of the pipeline.
pub struct CaptureLoop {
    sensor: Box<dyn Sensor>,
    camera: Box<dyn Camera>,
    indicator: Box<dyn Indicator>,
    identity: IdentityHandle,
    tier1: Arc<DeliveryQueue>,
    stats: Arc<PipelineStats>,
    timing: CaptureTiming,
    next_seq: u64,
}

impl CaptureLoop {
    pub fn new(
        sensor: Box<dyn Sensor>,
        camera: Box<dyn Camera>,
        identity: IdentityHandle,
        tier1: Arc<DeliveryQueue>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            sensor,
            camera,
            indicator: Box::new(NoIndicator),
            identity,
            tier1,
            stats,
            timing: CaptureTiming::default(),
            next_seq: 1,
        }
    }

    pub fn with_indicator(mut self, indicator: Box<dyn Indicator>) -> Self {
        self.indicator = indicator;
        self
    }

    pub fn with_timing(mut self, timing: CaptureTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Run until `token` is cancelled.
    pub async fn run(mut self, token: CancellationToken) {
        info!(
            idle_ms = self.timing.idle_interval.as_millis() as u64,
            cooldown_ms = self.timing.cooldown.as_millis() as u64,
            "capture loop started"
        );

        while !token.is_cancelled() {
            let active = match self.sensor.sense().await {
                Ok(active) => active,
                Err(e) => {
                    warn!(error = %e, "sensor read failed");
                    false
                }
            };

            let wait = if active {
                match self.capture_one().await {
                    Ok(Enqueued::Queued) => self.timing.cooldown,
                    Ok(Enqueued::Discarded(seq)) => {
                        debug!(seq, "capture discarded by tier-1 overflow policy");
                        self.timing.cooldown
                    }
                    Err(e) => {
                        self.stats.record_capture_failure();
                        warn!(error = %e, "capture failed");
                        self.timing.idle_interval
                    }
                }
            } else {
                self.timing.idle_interval
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = token.cancelled() => break,
            }
        }

        self.indicator.set(false);
        info!("capture loop stopped");
    }

    /// Capture, encode and enqueue one payload.
    async fn capture_one(&mut self) -> Result<Enqueued, EdgecapError> {
        self.indicator.set(true);
        let artifact = self.camera.capture().await;
        self.indicator.set(false);
        let artifact = artifact?;

        let seq = self.next_seq;
        let payload =
            Payload::from_artifact(seq, &artifact, &self.identity.current(), SystemTime::now())?;
        self.next_seq += 1;
        self.stats.record_capture();

        debug!(
            seq,
            digest = payload.digest(),
            bytes = payload.body_len(),
            destination = %payload.destination(),
            "payload captured"
        );

        match self.tier1.push(Pending::new(payload)) {
            PushResult::Rejected(_) => Ok(Enqueued::Discarded(seq)),
            PushResult::Queued | PushResult::Evicted(_) => Ok(Enqueued::Queued),
        }
    }
}

/// What happened to a successful capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Enqueued {
    Queued,
    /// Tier-1 is full and rejects new payloads.
    Discarded(u64),
}

// ── Tests ────────────────────────────────────────────────────────
