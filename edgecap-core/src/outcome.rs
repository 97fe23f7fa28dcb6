//! Delivery outcome classification.
//!
//! Every attempt ends in exactly one [`DeliveryOutcome`]. The mapping from
//! HTTP status codes is a pure function, so the same code always yields the
//! same class.

use std::fmt;

use reqwest::StatusCode;

/// Classification of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryOutcome {
    /// HTTP 200. Terminal.
    Delivered,
    /// The server understood the request and declined it. Terminal.
    RejectedTerminal,
    /// Server overloaded or another non-200 answer. Retryable.
    RejectedTransient,
    /// Connection refused, DNS failure or timeout. Retryable.
    TransportFailure,
}

impl DeliveryOutcome {
    /// Map an HTTP status code to an outcome.
    ///
    /// `200` is success. Client errors are terminal, except `408` and
    /// `429` which signal a server-side condition that may clear. All
    /// other codes are transient.
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            200 => DeliveryOutcome::Delivered,
            408 | 429 => DeliveryOutcome::RejectedTransient,
            400..=499 => DeliveryOutcome::RejectedTerminal,
            _ => DeliveryOutcome::RejectedTransient,
        }
    }

    /// Whether the payload is finished with after this outcome.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeliveryOutcome::Delivered | DeliveryOutcome::RejectedTerminal
        )
    }

    /// Whether the payload should go (back) into the retry tier.
    pub fn is_retryable(self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryOutcome::Delivered => "delivered",
            DeliveryOutcome::RejectedTerminal => "rejected_terminal",
            DeliveryOutcome::RejectedTransient => "rejected_transient",
            DeliveryOutcome::TransportFailure => "transport_failure",
        }
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Attempt ──────────────────────────────────────────────────────

/// What a transport reports back for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub outcome: DeliveryOutcome,
    /// HTTP status, absent on transport failures.
    pub status: Option<u16>,
    /// Server-provided `Status` field or the transport error text.
    pub detail: Option<String>,
}

impl Attempt {
    pub fn new(outcome: DeliveryOutcome) -> Self {
        Self {
            outcome,
            status: None,
            detail: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

// ── Tests ────────────────────────────────────────────────────────
