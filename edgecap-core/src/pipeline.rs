//! Pipeline wiring.
//!
//! Builds both delivery tiers, the identity handle and the stats, then
//! spawns the three long-lived tasks (capture loop, primary worker and
//! retry worker) into one [`WorkerPool`].

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::capture::{Camera, CaptureLoop, CaptureTiming, Indicator, NoIndicator, Sensor};
use crate::error::{EdgecapError, TaskError};
use crate::identity::IdentityHandle;
use crate::payload::Identity;
use crate::queue::{DeliveryQueue, OverflowPolicy};
use crate::retry::RetryPolicy;
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::task::WorkerPool;
use crate::transport::Deliver;
use crate::worker::{DEFAULT_IDLE_POLL, PrimaryWorker, RetryWorker};

// ── PipelineConfig ───────────────────────────────────────────────

/// Everything tunable about the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub capture: CaptureTiming,
    /// Idle poll for both workers when their queue is empty.
    pub worker_idle_poll: Duration,
    pub retry: RetryPolicy,
    /// Tier-1 cap; `None` = unbounded.
    pub tier1_capacity: Option<usize>,
    /// Tier-2 cap; `None` = unbounded.
    pub tier2_capacity: Option<usize>,
    pub overflow: OverflowPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capture: CaptureTiming::default(),
            worker_idle_poll: DEFAULT_IDLE_POLL,
            retry: RetryPolicy::default(),
            tier1_capacity: None,
            tier2_capacity: None,
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

// ── Collaborators ────────────────────────────────────────────────

/// Hardware-facing pieces handed to the capture loop.
pub struct Collaborators {
    pub sensor: Box<dyn Sensor>,
    pub camera: Box<dyn Camera>,
    pub indicator: Box<dyn Indicator>,
}

impl Collaborators {
    pub fn new(sensor: Box<dyn Sensor>, camera: Box<dyn Camera>) -> Self {
        Self {
            sensor,
            camera,
            indicator: Box::new(NoIndicator),
        }
    }

    pub fn with_indicator(mut self, indicator: Box<dyn Indicator>) -> Self {
        self.indicator = indicator;
        self
    }
}

// ── Pipeline ─────────────────────────────────────────────────────

/// Handle to a running pipeline.
pub struct Pipeline {
    identity: IdentityHandle,
    tier1: Arc<DeliveryQueue>,
    tier2: Arc<DeliveryQueue>,
    stats: Arc<PipelineStats>,
    pool: WorkerPool,
}

impl Pipeline {
    /// Spawn all three tasks on the current Tokio runtime.
    pub fn spawn(
        config: PipelineConfig,
        identity: Identity,
        collaborators: Collaborators,
        transport: Arc<dyn Deliver>,
    ) -> Self {
        Self::spawn_with_token(
            config,
            identity,
            collaborators,
            transport,
            CancellationToken::new(),
        )
    }

    /// Like [`spawn`](Self::spawn) but cancelled together with `token`.
    pub fn spawn_with_token(
        config: PipelineConfig,
        identity: Identity,
        collaborators: Collaborators,
        transport: Arc<dyn Deliver>,
        token: CancellationToken,
    ) -> Self {
        let identity = IdentityHandle::new(identity);
        let tier1 = Arc::new(DeliveryQueue::with_capacity(
            "tier1",
            config.tier1_capacity,
            config.overflow,
        ));
        let tier2 = Arc::new(DeliveryQueue::with_capacity(
            "tier2",
            config.tier2_capacity,
            config.overflow,
        ));
        let stats = Arc::new(PipelineStats::new());
        let mut pool = WorkerPool::with_token(token);

        let capture = CaptureLoop::new(
            collaborators.sensor,
            collaborators.camera,
            identity.clone(),
            Arc::clone(&tier1),
            Arc::clone(&stats),
        )
        .with_indicator(collaborators.indicator)
        .with_timing(config.capture.clone());

        let primary = PrimaryWorker::new(
            Arc::clone(&tier1),
            Arc::clone(&tier2),
            Arc::clone(&transport),
            Arc::clone(&stats),
        )
        .with_idle_poll(config.worker_idle_poll);

        let retry = RetryWorker::new(
            Arc::clone(&tier2),
            transport,
            Arc::clone(&stats),
            config.retry.clone(),
        )
        .with_idle_poll(config.worker_idle_poll);

        pool.spawn("primary", |token| primary.run(token));
        pool.spawn("retry", |token| retry.run(token));
        pool.spawn("capture", |token| capture.run(token));

        let current = identity.current();
        info!(
            node_id = %current.node_id,
            route = %current.route,
            "pipeline started"
        );

        Self {
            identity,
            tier1,
            tier2,
            stats,
            pool,
        }
    }

    /// Route future captures to `route`. Queued payloads are unaffected.
    pub fn update_route(&self, route: &str) -> Result<(), EdgecapError> {
        self.identity.update_route(route)
    }

    /// Stamp future captures with `node_id`.
    pub fn update_node_id(&self, node_id: &str) -> Result<(), EdgecapError> {
        self.identity.update_node_id(node_id)
    }

    pub fn identity(&self) -> Identity {
        self.identity.current()
    }

    pub fn identity_handle(&self) -> IdentityHandle {
        self.identity.clone()
    }

    pub fn tier1(&self) -> &DeliveryQueue {
        &self.tier1
    }

    pub fn tier2(&self) -> &DeliveryQueue {
        &self.tier2
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(self.tier1.len(), self.tier2.len())
    }

    /// Token observed by every pipeline task.
    pub fn stop_handle(&self) -> CancellationToken {
        self.pool.token()
    }

    /// Resolve when a task exits on its own, which only happens on a
    /// fault or after cancellation.
    pub async fn wait_any(&mut self) -> Option<(&'static str, Result<(), TaskError>)> {
        self.pool.wait_any().await
    }

    /// Stop all tasks and wait for them.
    ///
    /// Queued payloads are dropped; the pipeline does not persist.
    pub async fn shutdown(self) -> Result<(), EdgecapError> {
        let stats = self.stats();
        info!(
            tier1 = stats.tier1_depth,
            tier2 = stats.tier2_depth,
            delivered = stats.delivered,
            "pipeline shutting down"
        );
        self.pool.shutdown().await?;
        Ok(())
    }
}
