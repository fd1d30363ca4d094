//! Worker pool management with structured concurrency.
//!
//! Spawns a fixed set of workers over one shared queue and owns their
//! lifecycle: the pool closes the queue, waits for every accepted job to be
//! processed within a deadline, and accounts for whatever it had to abandon.

use std::{sync::Arc, time::Duration};

use scanhook_core::Clock;
use tokio::{sync::RwLock, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    error::{IngestError, Result},
    queue::JobQueue,
    storage::StorageWriter,
    worker::{IngestConfig, PoolStats, Worker},
};

/// Summary of a completed graceful shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Workers joined.
    pub workers: usize,
    /// Workers that stopped with an error or panicked.
    pub failed_workers: usize,
    /// Counters at the moment the last worker exited.
    pub stats: PoolStats,
}

/// Fixed set of workers draining a shared [`JobQueue`].
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    storage: Arc<dyn StorageWriter>,
    config: Arc<IngestConfig>,
    stats: Arc<RwLock<PoolStats>>,
    clock: Arc<dyn Clock>,
    fatal: CancellationToken,
    worker_handles: Vec<JoinHandle<Result<()>>>,
}

impl WorkerPool {
    /// Creates a pool; no workers run until [`WorkerPool::spawn_workers`].
    pub fn new(
        queue: Arc<JobQueue>,
        storage: Arc<dyn StorageWriter>,
        config: IngestConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue,
            storage,
            config: Arc::new(config),
            stats: Arc::new(RwLock::new(PoolStats::default())),
            clock,
            fatal: CancellationToken::new(),
            worker_handles: Vec::new(),
        }
    }

    /// Spawn all configured workers and begin processing.
    ///
    /// Workers run until the queue is closed and drained. Returns
    /// immediately after spawning.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the worker count is zero or the
    /// workers were already spawned.
    pub async fn spawn_workers(&mut self) -> Result<()> {
        if self.config.worker_count == 0 {
            return Err(IngestError::configuration("worker_count must be greater than 0"));
        }
        if !self.worker_handles.is_empty() {
            return Err(IngestError::configuration("workers already spawned"));
        }

        info!(
            worker_count = self.config.worker_count,
            queue_capacity = self.queue.capacity(),
            storage = %self.storage.describe(),
            failure_policy = ?self.config.failure_policy,
            "spawning ingest workers"
        );

        {
            let mut stats = self.stats.write().await;
            stats.active_workers = self.config.worker_count;
        }

        for worker_id in 0..self.config.worker_count {
            let worker = Worker::new(
                worker_id,
                self.queue.clone(),
                self.storage.clone(),
                self.config.clone(),
                self.stats.clone(),
                self.clock.clone(),
                self.fatal.clone(),
            );
            let stats = self.stats.clone();

            let handle = tokio::spawn(async move {
                info!(worker_id, "ingest worker starting");

                let result = worker.run().await;

                if let Err(ref error) = result {
                    error!(worker_id, error = %error, "ingest worker terminated with error");
                } else {
                    info!(worker_id, "ingest worker stopped gracefully");
                }

                let mut stats = stats.write().await;
                stats.active_workers = stats.active_workers.saturating_sub(1);
                drop(stats);

                result
            });

            self.worker_handles.push(handle);
        }

        Ok(())
    }

    /// Snapshot of the shared counters.
    pub async fn stats(&self) -> PoolStats {
        self.stats.read().await.clone()
    }

    /// Shared counters, for readers that outlive a borrow of the pool.
    pub fn stats_handle(&self) -> Arc<RwLock<PoolStats>> {
        self.stats.clone()
    }

    /// Token cancelled when a worker stops under the abort policy.
    pub fn fatal_error_token(&self) -> CancellationToken {
        self.fatal.clone()
    }

    /// Queue this pool drains.
    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Closes the queue and waits for workers to finish every accepted job.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::ShutdownTimeout`] with the number of jobs
    /// still queued if the workers do not finish within `timeout`. The
    /// remaining workers are aborted in that case.
    pub async fn shutdown_graceful(mut self, timeout: Duration) -> Result<ShutdownReport> {
        info!(
            worker_count = self.worker_handles.len(),
            queue_depth = self.queue.len(),
            timeout_seconds = timeout.as_secs(),
            "initiating graceful worker shutdown"
        );

        self.queue.close();

        let handles = std::mem::take(&mut self.worker_handles);
        let abort_handles: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let workers = handles.len();

        let join_all = async {
            let mut failed = 0;
            for (worker_id, handle) in handles.into_iter().enumerate() {
                match handle.await {
                    Ok(Ok(())) => {},
                    Ok(Err(error)) => {
                        warn!(worker_id, error = %error, "worker completed with error during shutdown");
                        failed += 1;
                    },
                    Err(join_error) => {
                        let error = IngestError::WorkerPanic {
                            worker_id,
                            error: join_error.to_string(),
                        };
                        error!(error = %error, "worker task panicked during shutdown");
                        failed += 1;
                    },
                }
            }
            failed
        };

        match tokio::time::timeout(timeout, join_all).await {
            Ok(failed_workers) => {
                let stats = {
                    let mut stats = self.stats.write().await;
                    stats.active_workers = 0;
                    stats.clone()
                };
                info!(
                    workers,
                    failed_workers,
                    stored = stats.stored,
                    jobs_processed = stats.jobs_processed,
                    "worker pool shutdown completed"
                );
                Ok(ShutdownReport { workers, failed_workers, stats })
            },
            Err(_timeout) => {
                for handle in &abort_handles {
                    handle.abort();
                }
                let abandoned_jobs = self.queue.len();
                error!(
                    timeout_seconds = timeout.as_secs(),
                    abandoned_jobs,
                    "worker shutdown timed out, abandoning queued jobs"
                );
                Err(IngestError::ShutdownTimeout { timeout, abandoned_jobs })
            },
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let active_count = self.worker_handles.iter().filter(|h| !h.is_finished()).count();

        if active_count > 0 && !self.queue.is_closed() {
            error!(
                active_workers = active_count,
                "WorkerPool dropped with active workers, closing queue to prevent orphaned tasks"
            );

            self.queue.close();

            warn!(
                "WorkerPool was not shut down gracefully. Call shutdown_graceful() before dropping to ensure clean shutdown."
            );
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("queue", &self.queue)
            .field("workers", &self.worker_handles.len())
            .finish_non_exhaustive()
    }
}
