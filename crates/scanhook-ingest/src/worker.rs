//! Per-job processing pipeline and the long-lived worker loop.
//!
//! A worker takes one job at a time from the shared queue and carries it
//! through decode, authorization, annotation, key derivation, encoding, and
//! storage. Every job ends in exactly one [`JobOutcome`]; the configured
//! [`FailurePolicy`] decides whether a failed job stops the worker.

use std::{sync::Arc, time::Duration};

use chrono_tz::Tz;
use scanhook_core::{annotate, decode, derive_key, encode, Clock, CoreError, StorageKey};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::{IngestError, Result},
    queue::{Job, JobQueue},
    storage::StorageWriter,
};

/// What a worker does after a decode, encode, or store failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Log and count the failure, then take the next job.
    #[default]
    Continue,
    /// Stop the worker and signal the pool's fatal-error token.
    Abort,
}

/// Configuration for the ingestion workers.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Number of long-lived workers.
    pub worker_count: usize,

    /// Maximum jobs held by the queue.
    pub queue_capacity: usize,

    /// Shared secret every envelope must carry.
    pub secret: String,

    /// Tenant label stamped onto every stored batch.
    pub tenant: String,

    /// Zone used to render the timestamp in storage keys.
    pub time_zone: Tz,

    /// Bound on a single storage write.
    pub store_timeout: Duration,

    /// Reaction to per-job failures.
    pub failure_policy: FailurePolicy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            worker_count: crate::DEFAULT_WORKER_COUNT,
            queue_capacity: crate::DEFAULT_QUEUE_CAPACITY,
            secret: String::new(),
            tenant: scanhook_core::DEFAULT_TENANT.to_string(),
            time_zone: Tz::UTC,
            store_timeout: Duration::from_secs(crate::DEFAULT_STORE_TIMEOUT_SECONDS),
            failure_policy: FailurePolicy::Continue,
        }
    }
}

impl IngestConfig {
    /// Checks the values the pool cannot run without.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Configuration`] for zero workers, zero
    /// capacity, a zero store timeout, or an empty secret or tenant.
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(IngestError::configuration("worker_count must be greater than 0"));
        }
        if self.queue_capacity == 0 {
            return Err(IngestError::configuration("queue_capacity must be greater than 0"));
        }
        if self.store_timeout.is_zero() {
            return Err(IngestError::configuration("store_timeout must be greater than 0"));
        }
        if self.secret.is_empty() {
            return Err(IngestError::configuration("secret must not be empty"));
        }
        if self.tenant.is_empty() {
            return Err(IngestError::configuration("tenant must not be empty"));
        }
        Ok(())
    }
}

/// Counters shared by every worker in a pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Workers currently running.
    pub active_workers: usize,
    /// Jobs taken from the queue, whatever their outcome.
    pub jobs_processed: u64,
    /// Batches written to storage.
    pub stored: u64,
    /// Envelopes discarded for carrying the wrong secret.
    pub auth_rejected: u64,
    /// Bodies that could not be decoded or keyed.
    pub decode_failed: u64,
    /// Batches that could not be re-encoded.
    pub encode_failed: u64,
    /// Storage writes that failed or timed out.
    pub store_failed: u64,
}

/// Terminal state of one job.
#[derive(Debug)]
pub enum JobOutcome {
    /// Batch written under `key`.
    Stored {
        /// Object key written
        key: StorageKey,
        /// Time spent from dequeue to completed write
        elapsed: Duration,
    },
    /// Envelope secret did not match; nothing was written.
    AuthRejected,
    /// Body was malformed, unauthenticatable, or had no access point.
    DecodeFailed(CoreError),
    /// Batch could not be re-encoded.
    EncodeFailed(CoreError),
    /// Storage write failed or timed out.
    StoreFailed(IngestError),
}

impl JobOutcome {
    /// Short label used in logs and abort reasons.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Stored { .. } => "stored",
            Self::AuthRejected => "auth_rejected",
            Self::DecodeFailed(_) => "decode_failed",
            Self::EncodeFailed(_) => "encode_failed",
            Self::StoreFailed(_) => "store_failed",
        }
    }

    /// Converts a failed outcome into the error it carries.
    ///
    /// Stored and auth-rejected jobs carry none.
    pub fn into_error(self) -> Option<IngestError> {
        match self {
            Self::DecodeFailed(e) | Self::EncodeFailed(e) => Some(IngestError::Codec(e)),
            Self::StoreFailed(e) => Some(e),
            Self::Stored { .. } | Self::AuthRejected => None,
        }
    }
}

/// Long-lived consumer of the job queue.
pub struct Worker {
    id: usize,
    queue: Arc<JobQueue>,
    storage: Arc<dyn StorageWriter>,
    config: Arc<IngestConfig>,
    stats: Arc<RwLock<PoolStats>>,
    clock: Arc<dyn Clock>,
    fatal: CancellationToken,
}

impl Worker {
    /// Creates a worker sharing the pool's queue, storage, and counters.
    pub fn new(
        id: usize,
        queue: Arc<JobQueue>,
        storage: Arc<dyn StorageWriter>,
        config: Arc<IngestConfig>,
        stats: Arc<RwLock<PoolStats>>,
        clock: Arc<dyn Clock>,
        fatal: CancellationToken,
    ) -> Self {
        Self { id, queue, storage, config, stats, clock, fatal }
    }

    /// Processes jobs until the queue is closed and drained.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Aborted`] when a job fails under
    /// [`FailurePolicy::Abort`]. The pool's fatal token is cancelled first.
    pub async fn run(&self) -> Result<()> {
        debug!(worker_id = self.id, "worker waiting for jobs");

        while let Some(job) = self.queue.dequeue().await {
            let outcome = self.process(job).await;
            self.record(&outcome).await;

            if self.config.failure_policy != FailurePolicy::Abort {
                continue;
            }
            let label = outcome.label();
            if let Some(failure) = outcome.into_error().filter(IngestError::is_fatal_to_job) {
                error!(worker_id = self.id, outcome = label, "stopping worker under abort policy");
                self.fatal.cancel();
                let reason = failure.to_string();
                return Err(IngestError::Aborted { worker_id: self.id, reason });
            }
        }

        debug!(worker_id = self.id, "queue closed and drained");
        Ok(())
    }

    /// Runs one job through the pipeline.
    pub async fn process(&self, job: Job) -> JobOutcome {
        let started = self.clock.now();
        let queue_wait = job.accepted_at().elapsed();

        let envelope = match decode(job.body()) {
            Ok(envelope) => envelope,
            Err(e) => return JobOutcome::DecodeFailed(e),
        };

        if !envelope.authorize(&self.config.secret) {
            return JobOutcome::AuthRejected;
        }

        let batch = annotate(envelope.into_batch(), &self.config.tenant);

        let key = match derive_key(&batch, self.clock.now_utc(), &self.config.time_zone) {
            Ok(key) => key,
            Err(e) => return JobOutcome::DecodeFailed(e),
        };

        let body = match encode(&batch) {
            Ok(body) => body,
            Err(e) => return JobOutcome::EncodeFailed(e),
        };

        let timeout = self.config.store_timeout;
        match tokio::time::timeout(timeout, self.storage.put(&key, body)).await {
            Ok(Ok(())) => {
                let elapsed = self.clock.now().saturating_duration_since(started);
                info!(
                    worker_id = self.id,
                    key = %key,
                    observations = batch.observations.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    queue_wait_ms = queue_wait.as_millis() as u64,
                    "batch stored"
                );
                JobOutcome::Stored { key, elapsed }
            },
            Ok(Err(e)) => JobOutcome::StoreFailed(e),
            Err(_elapsed) => {
                JobOutcome::StoreFailed(IngestError::store_timeout(key.as_str(), timeout))
            },
        }
    }

    async fn record(&self, outcome: &JobOutcome) {
        {
            let mut stats = self.stats.write().await;
            stats.jobs_processed += 1;
            match outcome {
                JobOutcome::Stored { .. } => stats.stored += 1,
                JobOutcome::AuthRejected => stats.auth_rejected += 1,
                JobOutcome::DecodeFailed(_) => stats.decode_failed += 1,
                JobOutcome::EncodeFailed(_) => stats.encode_failed += 1,
                JobOutcome::StoreFailed(_) => stats.store_failed += 1,
            }
        }

        match outcome {
            JobOutcome::Stored { .. } => {},
            JobOutcome::AuthRejected => {
                warn!(worker_id = self.id, "discarding envelope with mismatched secret");
            },
            JobOutcome::DecodeFailed(e) => {
                error!(worker_id = self.id, error = %e, "failed to decode payload");
            },
            JobOutcome::EncodeFailed(e) => {
                error!(worker_id = self.id, error = %e, "failed to encode batch");
            },
            JobOutcome::StoreFailed(e) => {
                error!(worker_id = self.id, error = %e, "failed to store batch");
            },
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("storage", &self.storage.describe())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};
    use scanhook_core::TestClock;
    use serde_json::json;

    use super::*;
    use crate::storage::mock::RecordingStorage;

    const SECRET: &str = "s3cr3t";

    fn payload(secret: &str, ap_mac: &str) -> Bytes {
        let body = json!({
            "version": "2.0",
            "secret": secret,
            "type": "DevicesSeen",
            "data": {
                "apMac": ap_mac,
                "apTags": ["lobby"],
                "observations": [{
                    "clientMac": "11:22:33:44:55:66",
                    "rssi": -61,
                    "seenEpoch": 1_704_067_200,
                    "location": { "lat": 10.5, "lng": -66.9 }
                }],
                "tenant": "spoofed"
            }
        });
        Bytes::from(serde_json::to_vec(&body).unwrap())
    }

    struct Harness {
        worker: Worker,
        queue: Arc<JobQueue>,
        storage: RecordingStorage,
        stats: Arc<RwLock<PoolStats>>,
        fatal: CancellationToken,
    }

    fn harness(config: IngestConfig) -> Harness {
        let queue = Arc::new(JobQueue::new(config.queue_capacity).unwrap());
        let storage = RecordingStorage::new();
        let stats = Arc::new(RwLock::new(PoolStats::default()));
        let fatal = CancellationToken::new();
        let clock = TestClock::with_start_time(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let worker = Worker::new(
            0,
            queue.clone(),
            Arc::new(storage.clone()),
            Arc::new(config),
            stats.clone(),
            Arc::new(clock),
            fatal.clone(),
        );
        Harness { worker, queue, storage, stats, fatal }
    }

    fn config() -> IngestConfig {
        IngestConfig { secret: SECRET.to_string(), tenant: "acme".to_string(), ..Default::default() }
    }

    #[tokio::test]
    async fn valid_job_is_annotated_keyed_and_stored() {
        let h = harness(config());

        let outcome = h.worker.process(Job::new(payload(SECRET, "aa:bb:cc:dd:ee:ff"))).await;

        let key = match outcome {
            JobOutcome::Stored { key, .. } => key,
            other => panic!("expected stored, got {other:?}"),
        };
        assert_eq!(key.as_str(), "2024-01-01T00:00:00Z-aa:bb:cc:dd:ee:ff.json");

        let puts = h.storage.puts().await;
        assert_eq!(puts.len(), 1);
        let stored: serde_json::Value = serde_json::from_slice(&puts[0].1).unwrap();
        assert_eq!(stored["tenant"], "acme");
        assert_eq!(stored["apMac"], "aa:bb:cc:dd:ee:ff");
        assert!(stored.get("secret").is_none(), "envelope fields must not be stored");
    }

    #[tokio::test]
    async fn key_uses_configured_time_zone() {
        let h = harness(IngestConfig { time_zone: chrono_tz::America::Caracas, ..config() });

        let outcome = h.worker.process(Job::new(payload(SECRET, "aa:bb:cc:dd:ee:ff"))).await;

        let key = match outcome {
            JobOutcome::Stored { key, .. } => key,
            other => panic!("expected stored, got {other:?}"),
        };
        assert_eq!(key.as_str(), "2023-12-31T20:00:00-04:00-aa:bb:cc:dd:ee:ff.json");
    }

    #[tokio::test]
    async fn wrong_secret_never_reaches_storage() {
        let h = harness(config());

        let outcome = h.worker.process(Job::new(payload("wrong", "aa:bb:cc:dd:ee:ff"))).await;

        assert!(matches!(outcome, JobOutcome::AuthRejected));
        assert!(outcome.into_error().is_none());
        assert_eq!(h.storage.attempts(), 0);
    }

    #[tokio::test]
    async fn malformed_body_is_decode_failure() {
        let h = harness(config());

        let outcome = h.worker.process(Job::new(Bytes::from_static(b"{not json"))).await;

        assert!(matches!(outcome, JobOutcome::DecodeFailed(CoreError::Decode(_))));
        assert_eq!(h.storage.attempts(), 0);
        let error = outcome.into_error().expect("decode failure carries an error");
        assert!(matches!(error, IngestError::Codec(CoreError::Decode(_))));
        assert!(error.is_fatal_to_job());
    }

    #[tokio::test]
    async fn missing_ap_mac_is_decode_failure() {
        let h = harness(config());

        let outcome = h.worker.process(Job::new(payload(SECRET, ""))).await;

        assert!(matches!(outcome, JobOutcome::DecodeFailed(CoreError::MissingApMac)));
    }

    #[tokio::test]
    async fn slow_storage_times_out() {
        let h = harness(IngestConfig { store_timeout: Duration::from_millis(20), ..config() });
        h.storage.set_delay(Some(Duration::from_secs(5))).await;

        let outcome = h.worker.process(Job::new(payload(SECRET, "aa:bb:cc:dd:ee:ff"))).await;

        assert!(matches!(outcome, JobOutcome::StoreFailed(IngestError::StoreTimeout { .. })));
    }

    #[tokio::test]
    async fn continue_policy_keeps_draining_after_failures() {
        let h = harness(config());
        h.queue.enqueue(Job::new(Bytes::from_static(b"garbage"))).await.unwrap();
        h.queue.enqueue(Job::new(payload("wrong", "aa:bb:cc:dd:ee:ff"))).await.unwrap();
        h.queue.enqueue(Job::new(payload(SECRET, "aa:bb:cc:dd:ee:ff"))).await.unwrap();
        h.queue.close();

        h.worker.run().await.unwrap();

        let stats = h.stats.read().await.clone();
        assert_eq!(stats.jobs_processed, 3);
        assert_eq!(stats.decode_failed, 1);
        assert_eq!(stats.auth_rejected, 1);
        assert_eq!(stats.stored, 1);
        assert!(!h.fatal.is_cancelled());
    }

    #[tokio::test]
    async fn abort_policy_stops_worker_and_fires_fatal_token() {
        let h = harness(IngestConfig { failure_policy: FailurePolicy::Abort, ..config() });
        h.storage.set_failing(true);
        h.queue.enqueue(Job::new(payload(SECRET, "aa:bb:cc:dd:ee:ff"))).await.unwrap();
        h.queue.enqueue(Job::new(payload(SECRET, "aa:bb:cc:dd:ee:ff"))).await.unwrap();

        let err = h.worker.run().await.unwrap_err();

        match err {
            IngestError::Aborted { worker_id, reason } => {
                assert_eq!(worker_id, 0);
                assert!(reason.contains("injected storage failure"), "reason: {reason}");
            },
            other => panic!("expected abort, got {other:?}"),
        }
        assert!(h.fatal.is_cancelled());
        assert_eq!(h.queue.len(), 1, "remaining job is left for shutdown to account for");
        assert_eq!(h.stats.read().await.store_failed, 1);
    }

    #[tokio::test]
    async fn abort_policy_stops_on_malformed_payload() {
        let h = harness(IngestConfig { failure_policy: FailurePolicy::Abort, ..config() });
        h.queue.enqueue(Job::new(Bytes::from_static(b"{not json"))).await.unwrap();

        let err = h.worker.run().await.unwrap_err();

        assert!(matches!(
            err,
            IngestError::Aborted { ref reason, .. } if reason.starts_with("malformed envelope")
        ));
        assert_eq!(h.stats.read().await.decode_failed, 1);
        assert_eq!(h.storage.attempts(), 0);
    }

    #[tokio::test]
    async fn abort_policy_ignores_auth_rejections() {
        let h = harness(IngestConfig { failure_policy: FailurePolicy::Abort, ..config() });
        h.queue.enqueue(Job::new(payload("wrong", "aa:bb:cc:dd:ee:ff"))).await.unwrap();
        h.queue.close();

        h.worker.run().await.unwrap();

        assert!(!h.fatal.is_cancelled());
    }

    #[test]
    fn config_validation_rejects_empty_secret() {
        assert!(config().validate().is_ok());
        let err = IngestConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("secret"));
        let err = IngestConfig { worker_count: 0, ..config() }.validate().unwrap_err();
        assert!(err.to_string().contains("worker_count"));
    }

    #[test]
    fn failure_policy_parses_lowercase() {
        let policy: FailurePolicy = serde_json::from_str("\"abort\"").unwrap();
        assert_eq!(policy, FailurePolicy::Abort);
        assert_eq!(FailurePolicy::default(), FailurePolicy::Continue);
    }
}
