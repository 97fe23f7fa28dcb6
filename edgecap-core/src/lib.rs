//! # edgecap-core
//!
//! Delivery pipeline for an edge capture node: a sensor-triggered capture
//! loop feeds payloads into a first-attempt queue, a primary worker posts
//! them over HTTP, and a retry worker keeps cycling failures through a
//! second queue with backoff until they reach a terminal outcome.
//!
//! ```text
//! Sensor ─► CaptureLoop ─► Tier-1 ─► PrimaryWorker ─► done
//!                                        │ retryable
//!                                        ▼
//!                                     Tier-2 ◄─► RetryWorker ─► done
//! ```
//!
//! This crate contains:
//! - **Payload model**: `Artifact`, `Payload`, `Identity`, `Pending`
//! - **Queues**: `DeliveryQueue` with optional capacity and overflow policy
//! - **Outcomes**: `DeliveryOutcome` status-code classification
//! - **Transport**: the `Deliver` seam and the `reqwest`-based `HttpTransport`
//! - **Workers**: `PrimaryWorker`, `RetryWorker`, `RetryPolicy`
//! - **Capture**: `CaptureLoop` over the `Sensor` / `Camera` / `Indicator` traits
//! - **Pipeline**: `Pipeline` wiring plus runtime identity updates
//! - **Error**: `EdgecapError`, a typed `thiserror`-based error hierarchy

pub mod capture;
pub mod error;
pub mod identity;
pub mod outcome;
pub mod payload;
pub mod pipeline;
pub mod queue;
pub mod retry;
pub mod stats;
pub mod task;
pub mod throughput;
pub mod transport;
pub mod worker;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use capture::{Camera, CaptureLoop, CaptureTiming, Indicator, NoIndicator, Sensor};
pub use error::{EdgecapError, TaskError};
pub use identity::IdentityHandle;
pub use outcome::{Attempt, DeliveryOutcome};
pub use payload::{Artifact, Identity, Payload, Pending, WireBody, parse_route};
pub use pipeline::{Collaborators, Pipeline, PipelineConfig};
pub use queue::{DeliveryQueue, OverflowPolicy, PushResult};
pub use retry::RetryPolicy;
pub use stats::{PipelineStats, StatsSnapshot};
pub use task::WorkerPool;
pub use throughput::ThroughputEstimator;
pub use transport::{DEFAULT_REQUEST_TIMEOUT, Deliver, HttpTransport};
pub use worker::{PrimaryWorker, RetryWorker};
