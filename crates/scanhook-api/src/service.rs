//! Receiver lifecycle: startup wiring and the bounded shutdown drain.
//!
//! Startup order matters. Storage is probed before anything listens, workers
//! run before the listener binds, and the liveness gate only opens once the
//! socket is accepting. Shutdown reverses it under one deadline: close the
//! gate, refuse new jobs, drain HTTP, then drain the queue with whatever
//! time is left.

use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use scanhook_core::Clock;
use scanhook_ingest::{
    IngestConfig, IngestError, JobQueue, ShutdownReport, StorageWriter, WorkerPool,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{create_router, AppState, Config, Liveness, Server, TlsFiles};

/// HTTP-side settings for a [`Service`].
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Address to bind
    pub addr: SocketAddr,
    /// TLS files, when serving HTTPS
    pub tls: Option<TlsFiles>,
    /// Token returned by `GET /`
    pub validator: String,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Deadline for the whole shutdown drain
    pub drain_timeout: Duration,
    /// Whether `/debug/stats` is routed
    pub profiling: bool,
}

impl ServiceOptions {
    /// Derives the HTTP settings from loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the bind address is invalid.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            addr: config.parse_server_addr()?,
            tls: config.tls_paths().map(|(cert, key)| TlsFiles { cert, key }),
            validator: config.validator.clone(),
            request_timeout: config.request_timeout(),
            drain_timeout: config.drain_timeout(),
            profiling: config.profiling,
        })
    }
}

/// What the shutdown drain managed to finish.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSummary {
    /// Whether in-flight HTTP requests finished before the deadline
    pub http_drained: bool,
    /// Worker report, when every worker exited before the deadline
    pub report: Option<ShutdownReport>,
    /// Jobs still queued when the deadline elapsed
    pub abandoned_jobs: usize,
}

impl ShutdownSummary {
    /// Whether everything accepted was processed in time.
    pub fn is_complete(&self) -> bool {
        self.http_drained && self.report.is_some() && self.abandoned_jobs == 0
    }
}

/// A running receiver: listener, queue, and worker pool.
#[derive(Debug)]
pub struct Service {
    server: Server,
    pool: WorkerPool,
    queue: Arc<JobQueue>,
    liveness: Liveness,
    drain_timeout: Duration,
}

impl Service {
    /// Probes storage, starts the workers, binds the listener, and opens
    /// the liveness gate.
    ///
    /// # Errors
    ///
    /// Returns error if storage is unreachable, the ingest configuration is
    /// invalid, or the listener cannot be bound. Nothing is left running.
    pub async fn start(
        options: ServiceOptions,
        ingest: IngestConfig,
        storage: Arc<dyn StorageWriter>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        ingest.validate()?;

        storage
            .probe()
            .await
            .with_context(|| format!("Storage {} unreachable", storage.describe()))?;
        info!(storage = %storage.describe(), "Storage reachable");

        let queue = Arc::new(JobQueue::new(ingest.queue_capacity)?);
        let mut pool = WorkerPool::new(queue.clone(), storage, ingest, clock);
        pool.spawn_workers().await?;

        let liveness = Liveness::new();
        let mut state = AppState::new(queue.clone(), liveness.clone(), options.validator.as_str());
        if options.profiling {
            state = state.with_stats(pool.stats_handle());
        }
        let app = create_router(state, options.request_timeout);

        let server = match Server::bind(options.addr, options.tls, app, options.drain_timeout).await
        {
            Ok(server) => server,
            Err(e) => {
                if let Err(shutdown_error) = pool.shutdown_graceful(options.drain_timeout).await {
                    warn!(error = %shutdown_error, "Worker shutdown after bind failure was incomplete");
                }
                return Err(e);
            },
        };

        liveness.mark_ready();
        info!(addr = %server.local_addr(), "scanhook is ready to receive payloads");

        Ok(Self { server, pool, queue, liveness, drain_timeout: options.drain_timeout })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// Shared job queue.
    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Liveness gate reported by `/healthz`.
    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    /// Token cancelled when a worker aborts under the abort policy.
    pub fn fatal_error_token(&self) -> CancellationToken {
        self.pool.fatal_error_token()
    }

    /// Runs the shutdown sequence under the configured drain deadline.
    pub async fn shutdown(self) -> ShutdownSummary {
        let deadline = Instant::now() + self.drain_timeout;
        info!(
            drain_timeout_secs = self.drain_timeout.as_secs(),
            queue_depth = self.queue.len(),
            "Starting graceful shutdown"
        );

        self.liveness.mark_unhealthy();
        self.queue.begin_shutdown();
        self.server.begin_shutdown();

        let http_drained = self.server.wait(deadline.saturating_duration_since(Instant::now())).await;

        let remaining = deadline.saturating_duration_since(Instant::now());
        let (report, abandoned_jobs) = match self.pool.shutdown_graceful(remaining).await {
            Ok(report) => {
                info!(
                    stored = report.stats.stored,
                    auth_rejected = report.stats.auth_rejected,
                    failed = report.stats.decode_failed
                        + report.stats.encode_failed
                        + report.stats.store_failed,
                    "All queued payloads processed"
                );
                (Some(report), 0)
            },
            Err(IngestError::ShutdownTimeout { abandoned_jobs, .. }) => {
                error!(abandoned_jobs, "Drain deadline elapsed, queued payloads abandoned");
                (None, abandoned_jobs)
            },
            Err(e) => {
                error!(error = %e, "Worker shutdown failed");
                (None, 0)
            },
        };

        info!("scanhook shutdown complete");
        ShutdownSummary { http_drained, report, abandoned_jobs }
    }
}
