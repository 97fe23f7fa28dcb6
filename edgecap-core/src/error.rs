//! Domain-specific error types for the edgecap pipeline.
//!
//! Delivery failures are *not* errors here: they are classified into a
//! [`DeliveryOutcome`](crate::outcome::DeliveryOutcome) and handled by the
//! workers. `EdgecapError` covers everything else: collaborator failures,
//! invalid configuration and task lifecycle problems.

use thiserror::Error;

/// The canonical error type for the edgecap core.
#[derive(Debug, Error)]
pub enum EdgecapError {
    // ── Configuration Errors ─────────────────────────────────────
    /// Startup configuration is missing or malformed. Fatal.
    #[error("configuration error: {0}")]
    Config(String),

    /// A destination route could not be parsed as an absolute URL.
    #[error("invalid route {route:?}: {reason}")]
    InvalidRoute { route: String, reason: String },

    // ── Collaborator Errors ──────────────────────────────────────
    /// The camera collaborator failed to produce an artifact.
    #[error("capture failed: {0}")]
    Capture(String),

    /// The trigger sensor could not be read.
    #[error("sense failed: {0}")]
    Sense(String),

    /// The I/O layer reported an error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    // ── Serialization Errors ─────────────────────────────────────
    /// Encoding of a payload body failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    // ── Task Errors ─────────────────────────────────────────────
    /// A pipeline worker failed.
    #[error("task error: {0}")]
    Task(#[from] TaskError),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── TaskError ─────────────────────────────────────────────────────

/// Typed error for the long-lived pipeline workers.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The worker was cancelled via the pipeline's `CancellationToken`.
    #[error("task was cancelled")]
    Cancelled,

    /// The worker panicked.
    #[error("task {0} panicked")]
    Panicked(String),

    /// Generic worker failure with a human-readable message.
    #[error("task failed: {0}")]
    Failed(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for EdgecapError {
    fn from(s: String) -> Self {
        EdgecapError::Other(s)
    }
}

impl From<&str> for EdgecapError {
    fn from(s: &str) -> Self {
        EdgecapError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for EdgecapError {
    fn from(e: serde_json::Error) -> Self {
        EdgecapError::Encoding(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = EdgecapError::InvalidRoute {
            route: "nope".into(),
            reason: "relative URL without a base".into(),
        };
        assert!(e.to_string().contains("nope"));
        assert!(e.to_string().contains("relative"));

        let e = EdgecapError::Task(TaskError::Panicked("retry".into()));
        assert!(e.to_string().contains("retry"));
    }

    #[test]
    fn from_string() {
        let e: EdgecapError = "something broke".into();
        assert!(matches!(e, EdgecapError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no camera");
        let e: EdgecapError = io_err.into();
        assert!(matches!(e, EdgecapError::Io(_)));
    }
}
