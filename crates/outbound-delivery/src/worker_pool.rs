//! Worker pool lifecycle with structured concurrency.
//!
//! The pool is constructed by the engine and owns the worker join handles.
//! It has no global state: two engines in one process get two pools.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    error::{DeliveryError, Result},
    worker::{DeliveryContext, DeliveryWorker},
};

/// Supervised set of delivery workers.
pub struct WorkerPool {
    context: DeliveryContext,
    cancellation_token: CancellationToken,
    worker_handles: Vec<JoinHandle<Result<()>>>,
}

impl WorkerPool {
    /// Creates a pool. No workers run until [`Self::spawn_workers`].
    pub fn new(context: DeliveryContext, cancellation_token: CancellationToken) -> Self {
        Self { context, cancellation_token, worker_handles: Vec::new() }
    }

    /// Spawns the configured number of workers.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if the pool is already running or the
    /// worker count is zero.
    pub async fn spawn_workers(&mut self) -> Result<()> {
        let worker_count = self.context.config.worker_count;
        if worker_count == 0 {
            return Err(DeliveryError::configuration("worker_count must be at least 1"));
        }
        if !self.worker_handles.is_empty() {
            return Err(DeliveryError::configuration("worker pool already started"));
        }

        info!(worker_count, "spawning delivery workers");
        self.context.stats.write().await.active_workers = worker_count;

        for worker_id in 0..worker_count {
            let worker =
                DeliveryWorker::new(worker_id, self.context.clone(), self.cancellation_token.clone());

            let handle = tokio::spawn(async move {
                let result = worker.run().await;

                if let Err(ref error) = result {
                    error!(worker_id, error = %error, "delivery worker terminated with error");
                } else {
                    info!(worker_id, "delivery worker stopped gracefully");
                }

                result
            });

            self.worker_handles.push(handle);
        }

        Ok(())
    }

    /// Cancels all workers and waits for them to finish their current batch.
    ///
    /// # Errors
    ///
    /// Returns `WorkerPanic` for the first worker that panicked, or
    /// `ShutdownTimeout` if the workers did not stop within `timeout`.
    pub async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        info!(
            worker_count = self.worker_handles.len(),
            timeout_seconds = timeout.as_secs(),
            "initiating graceful worker shutdown"
        );

        self.cancellation_token.cancel();
        let handles = std::mem::take(&mut self.worker_handles);
        let stats = self.context.stats.clone();

        let shutdown_future = async move {
            let mut first_panic = None;

            for (worker_id, handle) in handles.into_iter().enumerate() {
                match handle.await {
                    Ok(Ok(())) => {},
                    Ok(Err(error)) => {
                        warn!(worker_id, error = %error, "worker completed with error during shutdown");
                    },
                    Err(join_error) => {
                        error!(worker_id, error = %join_error, "worker task panicked during shutdown");
                        first_panic.get_or_insert(DeliveryError::WorkerPanic {
                            worker_id,
                            error: join_error.to_string(),
                        });
                    },
                }
            }

            stats.write().await.active_workers = 0;
            first_panic
        };

        match tokio::time::timeout(timeout, shutdown_future).await {
            Ok(None) => {
                info!("worker pool shutdown completed");
                Ok(())
            },
            Ok(Some(panic)) => Err(panic),
            Err(_elapsed) => {
                error!(
                    timeout_seconds = timeout.as_secs(),
                    "worker shutdown timed out, some workers may still be running"
                );
                Err(DeliveryError::ShutdownTimeout { timeout })
            },
        }
    }

    /// Returns true if any worker task is still running.
    pub fn has_active_workers(&self) -> bool {
        self.worker_handles.iter().any(|h| !h.is_finished())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let active = self.worker_handles.iter().filter(|h| !h.is_finished()).count();
        if active > 0 && !self.cancellation_token.is_cancelled() {
            error!(active_workers = active, "worker pool dropped with active workers, cancelling");
            self.cancellation_token.cancel();
            warn!("call shutdown_graceful() before dropping the worker pool");
        }
    }
}
