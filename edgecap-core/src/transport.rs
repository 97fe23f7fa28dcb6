//! Delivery transports.
//!
//! [`Deliver`] is the seam between the workers and the network: a
//! transport performs exactly one attempt and reports an [`Attempt`].
//! It never retries and never returns an error; every failure is folded
//! into the outcome classification.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Deserialize;

use crate::error::EdgecapError;
use crate::outcome::{Attempt, DeliveryOutcome};
use crate::payload::Payload;

/// Default bound on a single delivery attempt.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One delivery attempt against a payload's destination.
#[async_trait]
pub trait Deliver: Send + Sync {
    async fn deliver(&self, payload: &Payload) -> Attempt;
}

// ── HttpTransport ────────────────────────────────────────────────

/// Reply body the server sends with a 200; consulted for logging only.
#[derive(Debug, Deserialize)]
struct ServerReply {
    #[serde(rename = "Status")]
    status: Option<serde_json::Value>,
}

/// `POST`s the payload body as JSON with a bounded timeout.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport whose attempts never exceed `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, EdgecapError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| EdgecapError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    fn describe(err: &reqwest::Error) -> String {
        if err.is_timeout() {
            format!("timeout: {err}")
        } else if err.is_connect() {
            format!("connect: {err}")
        } else {
            err.to_string()
        }
    }
}

#[async_trait]
impl Deliver for HttpTransport {
    async fn deliver(&self, payload: &Payload) -> Attempt {
        let sent = self
            .client
            .post(payload.destination().clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "text/plain")
            .body(payload.body())
            .send()
            .await;

        let response = match sent {
            Ok(r) => r,
            Err(e) => {
                return Attempt::new(DeliveryOutcome::TransportFailure)
                    .with_detail(Self::describe(&e));
            }
        };

        let status = response.status();
        let outcome = DeliveryOutcome::from_status(status);
        let attempt = Attempt::new(outcome).with_status(status.as_u16());

        if outcome != DeliveryOutcome::Delivered {
            return attempt;
        }

        // The payload is accepted at this point; a missing or malformed
        // reply body only loses the log detail.
        let reply = response
            .bytes()
            .await
            .ok()
            .and_then(|b| serde_json::from_slice::<ServerReply>(&b).ok())
            .and_then(|r| r.status);
        match reply {
            Some(serde_json::Value::String(s)) => attempt.with_detail(s),
            Some(other) => attempt.with_detail(other.to_string()),
            None => attempt,
        }
    }
}
