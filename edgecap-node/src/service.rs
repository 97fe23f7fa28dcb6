//! Node service core logic.
//!
//! Brings up the hardware adapters and the delivery pipeline, then
//! supervises it until stopped: periodic stats lines, `SIGHUP` identity
//! reloads, and a fatal exit if any pipeline task dies on its own.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use edgecap_core::{
    Collaborators, Deliver, EdgecapError, HttpTransport, IdentityHandle, Pipeline, TaskError,
    parse_route,
};

use crate::config::{ConfigError, NodeConfig};
use crate::hardware;

// ── NodeService ──────────────────────────────────────────────────

/// The top-level node service.
///
/// Owns the configuration and a cancellation token; [`run`](Self::run)
/// drives the pipeline until the token fires.
pub struct NodeService {
    config: NodeConfig,
    config_path: PathBuf,
    token: CancellationToken,
}

impl NodeService {
    /// Create a new service. `config_path` is re-read on `SIGHUP`.
    pub fn new(config: NodeConfig, config_path: impl Into<PathBuf>) -> Self {
        Self {
            config,
            config_path: config_path.into(),
            token: CancellationToken::new(),
        }
    }

    /// Token that stops the service when cancelled.
    pub fn stop_handle(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Signal the service to stop.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Prepare the hardware and HTTP client, then run until stopped.
    pub async fn run(&self) -> Result<(), EdgecapError> {
        let sensor = hardware::build_sensor(&self.config)?;
        let indicator = hardware::build_indicator(&self.config)?;
        let camera = hardware::build_camera(&self.config);
        let collaborators = Collaborators::new(sensor, camera).with_indicator(indicator);

        let transport = Arc::new(HttpTransport::new(self.config.request_timeout())?);
        self.run_with(collaborators, transport).await
    }

    /// Run the pipeline with explicit collaborators and transport.
    pub async fn run_with(
        &self,
        collaborators: Collaborators,
        transport: Arc<dyn Deliver>,
    ) -> Result<(), EdgecapError> {
        let identity = self
            .config
            .identity()
            .map_err(|e| EdgecapError::Config(e.to_string()))?;
        let mut pipeline = Pipeline::spawn_with_token(
            self.config.to_pipeline_config(),
            identity,
            collaborators,
            transport,
            self.token.child_token(),
        );

        let mut stats_tick = stats_interval(self.config.logging.stats_interval_secs);
        let mut reload = ReloadSignal::new();

        loop {
            tokio::select! {
                biased;

                _ = self.token.cancelled() => break,

                exited = pipeline.wait_any() => {
                    let err = match exited {
                        Some((name, Err(e))) => {
                            error!(task = name, error = %e, "pipeline task failed");
                            EdgecapError::Task(e)
                        }
                        Some((name, Ok(()))) => {
                            error!(task = name, "pipeline task exited");
                            TaskError::Failed(format!("{name} exited")).into()
                        }
                        None => TaskError::Failed("no pipeline tasks".into()).into(),
                    };
                    if let Err(e) = pipeline.shutdown().await {
                        warn!(error = %e, "shutdown after fault");
                    }
                    return Err(err);
                }

                _ = next_tick(&mut stats_tick) => {
                    let s = pipeline.stats();
                    info!(
                        captured = s.captured,
                        delivered = s.delivered,
                        tier1 = s.tier1_depth,
                        tier2 = s.tier2_depth,
                        requeued = s.requeued,
                        abandoned = s.abandoned,
                        upload_bps = s.upload_bps,
                        "pipeline stats"
                    );
                }

                _ = reload.recv() => {
                    info!(path = %self.config_path.display(), "SIGHUP received, reloading identity");
                    match reload_identity(&self.config_path, &pipeline.identity_handle()) {
                        Ok(true) => {}
                        Ok(false) => info!("identity unchanged"),
                        Err(e) => warn!(error = %e, "reload failed, keeping current identity"),
                    }
                }
            }
        }

        pipeline.shutdown().await?;
        info!("node service stopped");
        Ok(())
    }
}

// ── Reload ───────────────────────────────────────────────────────

/// Re-read `path` and apply a changed `node.id` / `server.route`.
///
/// Returns whether anything changed. Nothing is applied unless the whole
/// file validates.
pub fn reload_identity(path: &Path, identity: &IdentityHandle) -> Result<bool, ConfigError> {
    let fresh = NodeConfig::load(path)?;
    fresh.validate()?;

    let current = identity.current();
    let route = parse_route(&fresh.server.route).map_err(|e| ConfigError::Invalid {
        field: "server.route",
        reason: e.to_string(),
    })?;
    let mut changed = false;
    if route != current.route {
        identity
            .update_route(&fresh.server.route)
            .map_err(|e| ConfigError::Invalid {
                field: "server.route",
                reason: e.to_string(),
            })?;
        info!(route = %fresh.server.route, "route updated");
        changed = true;
    }
    if fresh.node.id != current.node_id {
        identity
            .update_node_id(fresh.node.id.clone())
            .map_err(|e| ConfigError::Invalid {
                field: "node.id",
                reason: e.to_string(),
            })?;
        info!(node_id = %fresh.node.id, "node id updated");
        changed = true;
    }
    Ok(changed)
}

/// Resolves on each `SIGHUP`. Never resolves where hangup is unavailable.
struct ReloadSignal {
    #[cfg(unix)]
    inner: Option<tokio::signal::unix::Signal>,
}

impl ReloadSignal {
    fn new() -> Self {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let inner = match signal(SignalKind::hangup()) {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!(error = %e, "cannot install SIGHUP handler");
                    None
                }
            };
            Self { inner }
        }
        #[cfg(not(unix))]
        {
            Self {}
        }
    }

    async fn recv(&mut self) {
        #[cfg(unix)]
        {
            if let Some(signal) = self.inner.as_mut() {
                if signal.recv().await.is_some() {
                    return;
                }
            }
        }
        std::future::pending::<()>().await
    }
}

// ── Stats ticker ─────────────────────────────────────────────────

fn stats_interval(secs: u64) -> Option<Interval> {
    if secs == 0 {
        return None;
    }
    let period = Duration::from_secs(secs);
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(i) => {
            i.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

// ── Tests ────────────────────────────────────────────────────────
