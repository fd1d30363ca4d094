//! HTTP server configuration and request routing.
//!
//! Requests flow through middleware in order:
//! 1. Request ID generation
//! 2. Request/response logging
//! 3. Timeout enforcement
//! 4. Handler execution
//!
//! # Graceful Shutdown
//!
//! [`Server::begin_shutdown`] stops accepting connections and closes idle
//! keep-alive connections. In-flight requests run to completion, and
//! [`Server::wait`] bounds how long that may take.

use std::{io, net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Request},
    middleware::{self, Next},
    response::Response,
    routing::get,
    Router,
};
use axum_server::{tls_rustls::RustlsConfig, Handle};
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{handlers, AppState};

/// Creates the Axum router with all routes and middleware.
///
/// `/debug/stats` is only routed when `state` carries worker stats.
///
/// # Example
///
/// ```no_run
/// use std::{sync::Arc, time::Duration};
///
/// use scanhook_api::{create_router, AppState, Liveness};
/// use scanhook_ingest::JobQueue;
///
/// let queue = Arc::new(JobQueue::new(100).unwrap());
/// let state = AppState::new(queue, Liveness::new(), "validator-token");
/// let app = create_router(state, Duration::from_secs(10));
/// // Serve the app...
/// ```
pub fn create_router(state: AppState, request_timeout: Duration) -> Router {
    // `get` would also answer HEAD; only the listed methods are served.
    let intake = get(handlers::serve_validator)
        .head(handlers::not_found)
        .post(handlers::receive_payload)
        .fallback(handlers::not_found);
    let health = get(handlers::healthz).head(handlers::not_found).fallback(handlers::not_found);

    let mut router = Router::new().route("/", intake).route("/healthz", health);

    if state.stats.is_some() {
        router = router.route(
            "/debug/stats",
            get(handlers::debug_stats).head(handlers::not_found).fallback(handlers::not_found),
        );
    }

    router
        .fallback(handlers::not_found)
        .layer(DefaultBodyLimit::disable())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
        .with_state(state)
}

/// Middleware to inject request ID into all responses.
///
/// Adds X-Request-Id header for tracing requests across services.
async fn inject_request_id(req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();

    let mut req = req;
    req.extensions_mut().insert(request_id.clone());

    let mut response = next.run(req).await;

    if let Ok(header_value) = request_id.parse() {
        response.headers_mut().insert("X-Request-Id", header_value);
    }

    response
}

/// PEM files for serving over TLS.
#[derive(Debug, Clone)]
pub struct TlsFiles {
    /// Certificate chain
    pub cert: PathBuf,
    /// Private key
    pub key: PathBuf,
}

/// A bound, running HTTP server.
#[derive(Debug)]
pub struct Server {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<io::Result<()>>,
}

impl Server {
    /// Binds `addr` and starts serving `app` in the background.
    ///
    /// Serves TLS when `tls` is given. `drain_timeout` bounds how long the
    /// TLS acceptor waits for open connections once shutdown begins.
    ///
    /// # Errors
    ///
    /// Returns error if the address cannot be bound or the TLS files cannot
    /// be loaded.
    pub async fn bind(
        addr: SocketAddr,
        tls: Option<TlsFiles>,
        app: Router,
        drain_timeout: Duration,
    ) -> Result<Self> {
        let shutdown = CancellationToken::new();

        let (local_addr, task) = match tls {
            None => {
                let listener = TcpListener::bind(addr)
                    .await
                    .with_context(|| format!("Failed to bind {addr}"))?;
                let local_addr = listener.local_addr().context("Failed to read bound address")?;
                let signal = shutdown.clone().cancelled_owned();

                let task = tokio::spawn(async move {
                    axum::serve(listener, app).with_graceful_shutdown(signal).await
                });
                (local_addr, task)
            },
            Some(files) => {
                let rustls = RustlsConfig::from_pem_file(&files.cert, &files.key)
                    .await
                    .with_context(|| {
                        format!(
                            "Failed to load TLS certificate {} and key {}",
                            files.cert.display(),
                            files.key.display()
                        )
                    })?;

                let handle = Handle::new();
                let server = axum_server::bind_rustls(addr, rustls).handle(handle.clone());
                let task =
                    tokio::spawn(async move { server.serve(app.into_make_service()).await });

                let Some(local_addr) = handle.listening().await else {
                    let reason = match task.await {
                        Ok(Err(e)) => e.to_string(),
                        Ok(Ok(())) => "listener exited".to_string(),
                        Err(e) => e.to_string(),
                    };
                    anyhow::bail!("Failed to bind {addr} for TLS: {reason}");
                };

                let signal = shutdown.clone();
                tokio::spawn(async move {
                    signal.cancelled().await;
                    handle.graceful_shutdown(Some(drain_timeout));
                });
                (local_addr, task)
            },
        };

        info!(addr = %local_addr, "HTTP server listening");
        Ok(Self { local_addr, shutdown, task })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting connections; in-flight requests keep running.
    pub fn begin_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Waits up to `deadline` for in-flight requests to finish.
    ///
    /// Returns `true` if the server stopped in time. Otherwise the remaining
    /// connections are dropped and `false` is returned.
    pub async fn wait(mut self, deadline: Duration) -> bool {
        self.begin_shutdown();

        match tokio::time::timeout(deadline, &mut self.task).await {
            Ok(Ok(Ok(()))) => {
                info!("HTTP server stopped gracefully");
                true
            },
            Ok(Ok(Err(e))) => {
                error!(error = %e, "HTTP server stopped with error");
                true
            },
            Ok(Err(join_error)) => {
                error!(error = %join_error, "HTTP server task panicked");
                true
            },
            Err(_elapsed) => {
                warn!(
                    timeout_seconds = deadline.as_secs(),
                    "in-flight requests did not finish before the drain deadline"
                );
                self.task.abort();
                false
            },
        }
    }
}

/// Shutdown trigger that completed [`shutdown_signal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT / CTRL+C
    Interrupt,
    /// SIGTERM
    Terminate,
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
pub async fn shutdown_signal() -> ShutdownSignal {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C, starting graceful shutdown");
            ShutdownSignal::Interrupt
        },
        () = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
            ShutdownSignal::Terminate
        },
    }
}
