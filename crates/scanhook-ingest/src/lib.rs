//! Ingestion pipeline: bounded job queue, worker pool, and storage writer.
//!
//! Accepted webhook bodies enter a fixed-capacity FIFO queue. A fixed pool
//! of workers drains it, and each job runs the same pipeline:
//!
//! 1. **Decode** - Parse the envelope pushed by the scanning service
//! 2. **Authorize** - Compare the embedded secret; mismatches are discarded
//! 3. **Annotate** - Stamp the configured tenant onto the batch
//! 4. **Key** - Derive `{timestamp}-{apMac}.json` from the wall clock
//! 5. **Store** - Write the encoded batch through a [`StorageWriter`]
//!
//! # Backpressure and shutdown
//!
//! When the queue is full, producers wait for a free slot. Once shutdown
//! begins, waiting and new producers fail with
//! [`IngestError::ShuttingDown`] instead of hanging, while workers finish
//! every job already accepted before they exit.
//!
//! # Example
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use bytes::Bytes;
//! use scanhook_core::RealClock;
//! use scanhook_ingest::{IngestConfig, Job, JobQueue, ObjectStoreWriter, WorkerPool};
//!
//! # async fn example() -> scanhook_ingest::Result<()> {
//! let config = IngestConfig::default();
//! let queue = Arc::new(JobQueue::new(config.queue_capacity)?);
//! let storage = Arc::new(ObjectStoreWriter::in_memory());
//! let mut pool = WorkerPool::new(queue.clone(), storage, config, Arc::new(RealClock));
//!
//! pool.spawn_workers().await?;
//! queue.enqueue(Job::new(Bytes::from_static(b"{}"))).await?;
//! pool.shutdown_graceful(Duration::from_secs(30)).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod queue;
pub mod storage;
pub mod worker;
pub mod worker_pool;

pub use error::{IngestError, Result};
pub use queue::{Job, JobQueue};
pub use storage::{ObjectStoreWriter, StorageWriter};
pub use worker::{FailurePolicy, IngestConfig, JobOutcome, PoolStats, Worker};
pub use worker_pool::{ShutdownReport, WorkerPool};

/// Default number of queued jobs before producers wait.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Default number of long-lived workers.
pub const DEFAULT_WORKER_COUNT: usize = 5;

/// Default bound on a single storage write, in seconds.
pub const DEFAULT_STORE_TIMEOUT_SECONDS: u64 = 10;
