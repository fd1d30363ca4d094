//! scanhook HTTP API.
//!
//! Serves the validator token, accepts pushed observation payloads into the
//! ingest queue, and reports liveness. Processing happens entirely in the
//! ingest workers; handlers only ever enqueue.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use scanhook_ingest::{JobQueue, PoolStats};
use tokio::sync::RwLock;

pub mod config;
pub mod handlers;
pub mod liveness;
pub mod server;
pub mod service;

pub use config::{Config, StorageBackend};
pub use liveness::Liveness;
pub use server::{create_router, shutdown_signal, Server, ShutdownSignal, TlsFiles};
pub use service::{Service, ServiceOptions, ShutdownSummary};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Queue accepted bodies are pushed into
    pub queue: Arc<JobQueue>,
    /// Gate reported by `/healthz`
    pub liveness: Liveness,
    /// Token returned by `GET /`
    pub validator: Arc<str>,
    /// Worker counters; `Some` exposes `/debug/stats`
    pub stats: Option<Arc<RwLock<PoolStats>>>,
}

impl AppState {
    /// Creates state without the diagnostics endpoint.
    pub fn new(queue: Arc<JobQueue>, liveness: Liveness, validator: impl Into<Arc<str>>) -> Self {
        Self { queue, liveness, validator: validator.into(), stats: None }
    }

    /// Exposes worker counters on `/debug/stats`.
    #[must_use]
    pub fn with_stats(mut self, stats: Arc<RwLock<PoolStats>>) -> Self {
        self.stats = Some(stats);
        self
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("queue", &self.queue)
            .field("liveness", &self.liveness)
            .field("stats", &self.stats.is_some())
            .finish_non_exhaustive()
    }
}
