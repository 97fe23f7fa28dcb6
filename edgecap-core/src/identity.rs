//! Runtime-updatable node identity.
//!
//! The capture loop reads the current [`Identity`] when it builds a
//! payload and copies it in; updates replace the whole snapshot, so a
//! queued payload can never observe a half-written route.

use std::sync::Arc;

use tokio::sync::watch;

use crate::error::EdgecapError;
use crate::payload::{Identity, parse_route};

/// Cloneable handle to the shared identity snapshot.
#[derive(Clone)]
pub struct IdentityHandle {
    tx: Arc<watch::Sender<Identity>>,
}

impl IdentityHandle {
    pub fn new(identity: Identity) -> Self {
        let (tx, _rx) = watch::channel(identity);
        Self { tx: Arc::new(tx) }
    }

    /// Copy of the current snapshot.
    pub fn current(&self) -> Identity {
        self.tx.borrow().clone()
    }

    /// Point future captures at a new destination.
    ///
    /// Payloads already queued keep the route they were built with.
    pub fn update_route(&self, route: &str) -> Result<(), EdgecapError> {
        let url = parse_route(route)?;
        self.tx.send_if_modified(|id| {
            if id.route == url {
                return false;
            }
            tracing::info!(old = %id.route, new = %url, "route updated");
            id.route = url;
            true
        });
        Ok(())
    }

    /// Change the node id stamped on future captures.
    pub fn update_node_id(&self, node_id: impl Into<String>) -> Result<(), EdgecapError> {
        let node_id = node_id.into();
        if node_id.trim().is_empty() {
            return Err(EdgecapError::Config("node id must not be empty".into()));
        }
        self.tx.send_if_modified(|id| {
            if id.node_id == node_id {
                return false;
            }
            tracing::info!(old = %id.node_id, new = %node_id, "node id updated");
            id.node_id = node_id;
            true
        });
        Ok(())
    }

    /// Receiver that is notified on every change.
    pub fn subscribe(&self) -> watch::Receiver<Identity> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> IdentityHandle {
        IdentityHandle::new(Identity::new("D1", "http://10.0.0.1/a").unwrap())
    }

    #[test]
    fn update_route_replaces_snapshot() {
        let h = handle();
        let before = h.current();
        h.update_route("http://10.0.0.2/b").unwrap();
        assert_eq!(before.route.as_str(), "http://10.0.0.1/a");
        assert_eq!(h.current().route.as_str(), "http://10.0.0.2/b");
        assert_eq!(h.current().node_id, "D1");
    }

    #[test]
    fn invalid_route_is_rejected_and_ignored() {
        let h = handle();
        assert!(h.update_route("::not-a-url").is_err());
        assert_eq!(h.current().route.as_str(), "http://10.0.0.1/a");
    }

    #[test]
    fn update_node_id() {
        let h = handle();
        h.update_node_id("D7").unwrap();
        assert_eq!(h.current().node_id, "D7");
        assert!(h.update_node_id("  ").is_err());
    }

    #[tokio::test]
    async fn subscribers_see_changes() {
        let h = handle();
        let mut rx = h.subscribe();
        h.update_node_id("D2").unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().node_id, "D2");
    }
}
