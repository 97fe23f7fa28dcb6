//! Tracking for the long-lived pipeline workers.
//!
//! Every worker is spawned with a clone of one shared
//! [`CancellationToken`]; [`WorkerPool::shutdown`] cancels it and joins
//! all workers, turning panics into a typed [`TaskError`].

use std::future::Future;

use futures::future::select_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::TaskError;

struct Worker {
    name: &'static str,
    handle: JoinHandle<()>,
}

/// Named set of spawned workers sharing one cancellation token.
pub struct WorkerPool {
    token: CancellationToken,
    workers: Vec<Worker>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// Use an externally owned token (e.g. a child of a service token).
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            workers: Vec::new(),
        }
    }

    /// The token every worker observes.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawn `f` on the runtime, handing it a clone of the pool token.
    pub fn spawn<F, Fut>(&mut self, name: &'static str, f: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(f(self.token.clone()));
        self.workers.push(Worker { name, handle });
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Names of workers still tracked by the pool.
    pub fn names(&self) -> Vec<&'static str> {
        self.workers.iter().map(|w| w.name).collect()
    }

    /// Wait until any worker exits and stop tracking it.
    ///
    /// Returns `None` when the pool is empty. A worker exiting before
    /// cancellation is always a fault: workers run for the process
    /// lifetime.
    pub async fn wait_any(&mut self) -> Option<(&'static str, Result<(), TaskError>)> {
        if self.workers.is_empty() {
            return None;
        }
        let (joined, index, _) =
            select_all(self.workers.iter_mut().map(|w| &mut w.handle)).await;
        let worker = self.workers.remove(index);
        Some((worker.name, Self::map_join(worker.name, joined)))
    }

    /// Cancel every worker and wait for all of them to finish.
    ///
    /// Returns the first failure, if any.
    pub async fn shutdown(self) -> Result<(), TaskError> {
        self.token.cancel();
        let mut first_err = None;
        for worker in self.workers {
            match Self::map_join(worker.name, worker.handle.await) {
                Ok(()) => info!(worker = worker.name, "worker stopped"),
                Err(e) => {
                    error!(worker = worker.name, error = %e, "worker failed");
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn map_join(
        name: &'static str,
        joined: Result<(), tokio::task::JoinError>,
    ) -> Result<(), TaskError> {
        match joined {
            Ok(()) => Ok(()),
            Err(e) if e.is_panic() => Err(TaskError::Panicked(name.to_string())),
            Err(e) if e.is_cancelled() => Err(TaskError::Cancelled),
            Err(e) => Err(TaskError::Failed(e.to_string())),
        }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}
