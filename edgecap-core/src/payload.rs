//! Payload data model.
//!
//! An [`Artifact`] is what the camera hands back; a [`Payload`] is the
//! immutable, transport-ready unit of work that flows through both
//! delivery tiers. [`Identity`] is the node-id/route snapshot that each
//! payload embeds at enqueue time, so later route changes never touch
//! payloads that are already queued.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::EdgecapError;

// ── Artifact ─────────────────────────────────────────────────────

/// One raw capture produced by the camera collaborator.
#[derive(Debug, Clone)]
pub struct Artifact {
    /// Raw frame bytes, not interpreted by the pipeline.
    pub data: Bytes,
    /// Dimension descriptor, e.g. `"(480, 640, 3)"`.
    pub shape: String,
}

impl Artifact {
    pub fn new(data: impl Into<Bytes>, shape: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            shape: shape.into(),
        }
    }

    /// Short blake3 fingerprint of the raw bytes (first 8 bytes, hex).
    pub fn digest(&self) -> String {
        blake3::hash(&self.data).to_hex()[..16].to_string()
    }
}

// ── Identity ─────────────────────────────────────────────────────

/// Node id + destination route, captured into every payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub node_id: String,
    pub route: Url,
}

impl Identity {
    /// Build an identity, validating that `route` is an absolute http(s) URL.
    pub fn new(node_id: impl Into<String>, route: &str) -> Result<Self, EdgecapError> {
        Ok(Self {
            node_id: node_id.into(),
            route: parse_route(route)?,
        })
    }
}

/// Parse and validate a destination route.
pub fn parse_route(route: &str) -> Result<Url, EdgecapError> {
    let url = Url::parse(route).map_err(|e| EdgecapError::InvalidRoute {
        route: route.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(EdgecapError::InvalidRoute {
            route: route.to_string(),
            reason: format!("unsupported scheme {other:?}"),
        }),
    }
}

// ── WireBody ─────────────────────────────────────────────────────

/// JSON body posted to the destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireBody {
    #[serde(rename = "NodeID")]
    pub node_id: String,
    /// Seconds since the Unix epoch.
    #[serde(rename = "Timestamp")]
    pub timestamp: f64,
    /// Base64-encoded artifact bytes.
    #[serde(rename = "Image")]
    pub image: String,
    #[serde(rename = "Shape")]
    pub shape: String,
}

// ── Payload ──────────────────────────────────────────────────────

/// An immutable capture ready for delivery.
///
/// The JSON body is rendered once at construction; retries reuse the
/// same [`Bytes`] without re-encoding the image.
#[derive(Debug, Clone)]
pub struct Payload {
    seq: u64,
    node_id: String,
    captured_at: SystemTime,
    shape: String,
    destination: Url,
    digest: String,
    body: Bytes,
}

impl Payload {
    /// Encode `artifact` against the given identity snapshot.
    pub fn from_artifact(
        seq: u64,
        artifact: &Artifact,
        identity: &Identity,
        captured_at: SystemTime,
    ) -> Result<Self, EdgecapError> {
        let wire = WireBody {
            node_id: identity.node_id.clone(),
            timestamp: unix_seconds(captured_at),
            image: STANDARD.encode(&artifact.data),
            shape: artifact.shape.clone(),
        };
        let body = serde_json::to_vec(&wire)?;

        Ok(Self {
            seq,
            node_id: identity.node_id.clone(),
            captured_at,
            shape: artifact.shape.clone(),
            destination: identity.route.clone(),
            digest: artifact.digest(),
            body: Bytes::from(body),
        })
    }

    /// Capture sequence number.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn captured_at(&self) -> SystemTime {
        self.captured_at
    }

    /// Capture time as fractional seconds since the Unix epoch.
    pub fn timestamp(&self) -> f64 {
        unix_seconds(self.captured_at)
    }

    pub fn shape(&self) -> &str {
        &self.shape
    }

    /// Route that was current when this payload was enqueued.
    pub fn destination(&self) -> &Url {
        &self.destination
    }

    /// Fingerprint of the raw artifact bytes.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Pre-rendered JSON body.
    pub fn body(&self) -> Bytes {
        self.body.clone()
    }

    /// Body size in bytes.
    pub fn body_len(&self) -> usize {
        self.body.len()
    }
}

fn unix_seconds(t: SystemTime) -> f64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

// ── Pending ──────────────────────────────────────────────────────

/// A queued payload plus delivery bookkeeping.
///
/// The payload itself is never modified while it moves between tiers.
#[derive(Debug, Clone)]
pub struct Pending {
    pub payload: Payload,
    /// Delivery attempts made so far.
    pub attempts: u32,
    /// Retryable failures seen by the retry worker; drives its cooldown.
    pub retry_failures: u32,
    /// When the payload first entered Tier-1.
    pub first_queued: Instant,
}

impl Pending {
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            attempts: 0,
            retry_failures: 0,
            first_queued: Instant::now(),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
