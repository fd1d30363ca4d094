//! Error types for queueing, storage, and worker lifecycle.
//!
//! Distinguishes enqueue refusals (backpressure and shutdown), per-job
//! failures (codec and storage), and pool lifecycle failures so callers
//! can map each to the right response or exit path.

use std::{fmt, time::Duration};

use scanhook_core::CoreError;
use thiserror::Error;

/// Result type alias for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestError>;

/// Errors raised by the ingestion pipeline.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Queue refuses new jobs because shutdown has begun.
    #[error("queue is shutting down")]
    ShuttingDown,

    /// Queue has no free slot and the caller asked not to wait.
    #[error("queue full at capacity {capacity}")]
    QueueFull {
        /// Configured queue capacity
        capacity: usize,
    },

    /// Payload could not be decoded, keyed, or encoded.
    #[error(transparent)]
    Codec(#[from] CoreError),

    /// Object store rejected the write.
    #[error("storage write failed for {key}: {message}")]
    Storage {
        /// Object key that was being written
        key: String,
        /// Backend error message
        message: String,
    },

    /// Object store did not answer within the configured bound.
    #[error("storage write for {key} timed out after {timeout:?}")]
    StoreTimeout {
        /// Object key that was being written
        key: String,
        /// Bound that elapsed
        timeout: Duration,
    },

    /// Storage backend could not be reached at startup.
    #[error("storage backend unavailable: {message}")]
    StorageUnavailable {
        /// Backend error message
        message: String,
    },

    /// Invalid pipeline configuration.
    #[error("invalid ingest configuration: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },

    /// A worker stopped on a job failure under the abort policy.
    #[error("worker {worker_id} aborted: {reason}")]
    Aborted {
        /// Worker that stopped
        worker_id: usize,
        /// Failure that caused the abort
        reason: String,
    },

    /// A worker task panicked.
    #[error("worker {worker_id} panicked: {error}")]
    WorkerPanic {
        /// Worker that panicked
        worker_id: usize,
        /// Join error text
        error: String,
    },

    /// Workers did not drain the queue before the deadline.
    #[error("worker shutdown timed out after {timeout:?} with {abandoned_jobs} jobs queued")]
    ShutdownTimeout {
        /// Drain deadline that elapsed
        timeout: Duration,
        /// Jobs still queued when the deadline elapsed
        abandoned_jobs: usize,
    },
}

impl IngestError {
    /// Creates a storage write error.
    pub fn storage(key: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Storage { key: key.into(), message: message.to_string() }
    }

    /// Creates a storage timeout error.
    pub fn store_timeout(key: impl Into<String>, timeout: Duration) -> Self {
        Self::StoreTimeout { key: key.into(), timeout }
    }

    /// Creates a startup connectivity error.
    pub fn storage_unavailable(message: impl fmt::Display) -> Self {
        Self::StorageUnavailable { message: message.to_string() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Whether this error ends processing of a single job.
    ///
    /// These are the failures the worker failure policy applies to.
    pub fn is_fatal_to_job(&self) -> bool {
        matches!(self, Self::Codec(_) | Self::Storage { .. } | Self::StoreTimeout { .. })
    }

    /// Whether the queue refused the job without taking ownership of it.
    pub fn is_enqueue_refusal(&self) -> bool {
        matches!(self, Self::ShuttingDown | Self::QueueFull { .. })
    }
}
