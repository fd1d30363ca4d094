//! Bounded FIFO job queue shared by HTTP producers and pool workers.
//!
//! Capacity is the backpressure mechanism: once it is reached, producers
//! wait for a worker to take a job rather than letting memory grow. The
//! queue has two shutdown stages. [`JobQueue::begin_shutdown`] refuses new
//! jobs and releases waiting producers. [`JobQueue::close`] also lets
//! consumers see the end of the stream once every accepted job has been
//! handed out.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        PoisonError, RwLock,
    },
    time::Instant,
};

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{IngestError, Result};

/// One raw webhook body awaiting processing.
#[derive(Debug)]
pub struct Job {
    body: Bytes,
    accepted_at: Instant,
}

impl Job {
    /// Wraps an accepted request body.
    pub fn new(body: Bytes) -> Self {
        Self { body, accepted_at: Instant::now() }
    }

    /// Raw request body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Instant the intake handler accepted the body.
    pub fn accepted_at(&self) -> Instant {
        self.accepted_at
    }
}

/// Fixed-capacity multi-producer, multi-consumer job queue.
///
/// Each job is delivered to exactly one consumer. Consumers take turns on
/// the receiving end, so jobs leave in the order they were accepted.
pub struct JobQueue {
    sender: RwLock<Option<mpsc::Sender<Job>>>,
    receiver: Mutex<mpsc::Receiver<Job>>,
    shutdown: CancellationToken,
    depth: AtomicUsize,
    capacity: usize,
}

impl JobQueue {
    /// Creates a queue holding at most `capacity` jobs.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(IngestError::configuration("queue capacity must be greater than 0"));
        }
        let (sender, receiver) = mpsc::channel(capacity);
        Ok(Self {
            sender: RwLock::new(Some(sender)),
            receiver: Mutex::new(receiver),
            shutdown: CancellationToken::new(),
            depth: AtomicUsize::new(0),
            capacity,
        })
    }

    /// Adds a job, waiting for a free slot while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::ShuttingDown`] once shutdown has begun,
    /// including for callers that were already waiting for a slot.
    pub async fn enqueue(&self, job: Job) -> Result<()> {
        let sender = self.live_sender()?;

        let permit = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => return Err(IngestError::ShuttingDown),
            permit = sender.reserve() => permit.map_err(|_| IngestError::ShuttingDown)?,
        };

        self.depth.fetch_add(1, Ordering::AcqRel);
        permit.send(job);
        Ok(())
    }

    /// Adds a job only if a slot is free right now.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::QueueFull`] when no slot is free and
    /// [`IngestError::ShuttingDown`] once shutdown has begun.
    pub fn try_enqueue(&self, job: Job) -> Result<()> {
        let sender = self.live_sender()?;
        let permit = sender.try_reserve().map_err(|e| match e {
            mpsc::error::TrySendError::Full(()) => IngestError::QueueFull { capacity: self.capacity },
            mpsc::error::TrySendError::Closed(()) => IngestError::ShuttingDown,
        })?;

        self.depth.fetch_add(1, Ordering::AcqRel);
        permit.send(job);
        Ok(())
    }

    /// Takes the oldest job, waiting until one is available.
    ///
    /// Returns `None` once the queue is closed and every accepted job has
    /// been handed out.
    pub async fn dequeue(&self) -> Option<Job> {
        let job = self.receiver.lock().await.recv().await?;
        self.depth.fetch_sub(1, Ordering::AcqRel);
        Some(job)
    }

    /// Refuses new jobs and releases producers waiting for a slot.
    ///
    /// Jobs already accepted stay queued for the workers.
    pub fn begin_shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            debug!(queued = self.len(), "job queue refusing new jobs");
        }
        self.shutdown.cancel();
    }

    /// Closes the queue; consumers drain what is left and then see `None`.
    pub fn close(&self) {
        self.begin_shutdown();
        let dropped = self.sender.write().unwrap_or_else(PoisonError::into_inner).take();
        if dropped.is_some() {
            debug!(queued = self.len(), "job queue closed");
        }
    }

    /// Whether new jobs are being refused.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Whether the queue has been closed to consumers.
    pub fn is_closed(&self) -> bool {
        self.sender.read().unwrap_or_else(PoisonError::into_inner).is_none()
    }

    /// Number of jobs accepted but not yet handed to a worker.
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    /// Whether no jobs are waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of queued jobs.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn live_sender(&self) -> Result<mpsc::Sender<Job>> {
        if self.shutdown.is_cancelled() {
            return Err(IngestError::ShuttingDown);
        }
        self.sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(IngestError::ShuttingDown)
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("shutting_down", &self.is_shutting_down())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;

    fn job(body: &'static str) -> Job {
        Job::new(Bytes::from_static(body.as_bytes()))
    }

    #[test]
    fn zero_capacity_rejected() {
        assert!(matches!(JobQueue::new(0), Err(IngestError::Configuration { .. })));
    }

    #[tokio::test]
    async fn jobs_leave_in_fifo_order() {
        let queue = JobQueue::new(4).unwrap();
        for body in ["a", "b", "c"] {
            queue.enqueue(job(body)).await.unwrap();
        }

        assert_eq!(queue.len(), 3);
        for expected in ["a", "b", "c"] {
            assert_eq!(queue.dequeue().await.unwrap().body().as_ref(), expected.as_bytes());
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn capacity_enqueues_complete_without_waiting() {
        let queue = JobQueue::new(3).unwrap();

        for _ in 0..3 {
            tokio::time::timeout(Duration::from_millis(100), queue.enqueue(job("x")))
                .await
                .expect("enqueue within capacity must not wait")
                .unwrap();
        }

        assert_eq!(queue.len(), queue.capacity());
    }

    #[tokio::test]
    async fn enqueue_beyond_capacity_waits_for_dequeue() {
        let queue = Arc::new(JobQueue::new(1).unwrap());
        queue.enqueue(job("first")).await.unwrap();

        let producer = tokio::spawn({
            let queue = queue.clone();
            async move { queue.enqueue(job("second")).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!producer.is_finished(), "producer must wait while the queue is full");

        assert_eq!(queue.dequeue().await.unwrap().body().as_ref(), b"first");
        tokio::time::timeout(Duration::from_secs(1), producer)
            .await
            .expect("producer should resume after a dequeue")
            .unwrap()
            .unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn try_enqueue_reports_full_queue() {
        let queue = JobQueue::new(1).unwrap();
        queue.try_enqueue(job("a")).unwrap();

        let err = queue.try_enqueue(job("b")).unwrap_err();

        assert!(matches!(err, IngestError::QueueFull { capacity: 1 }));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn begin_shutdown_releases_waiting_producer() {
        let queue = Arc::new(JobQueue::new(1).unwrap());
        queue.enqueue(job("first")).await.unwrap();

        let producer = tokio::spawn({
            let queue = queue.clone();
            async move { queue.enqueue(job("second")).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        queue.begin_shutdown();

        let result = tokio::time::timeout(Duration::from_secs(1), producer)
            .await
            .expect("waiting producer must be released")
            .unwrap();
        assert!(matches!(result, Err(IngestError::ShuttingDown)));
        assert_eq!(queue.len(), 1, "accepted job stays queued");
    }

    #[tokio::test]
    async fn enqueue_after_shutdown_fails_fast() {
        let queue = JobQueue::new(8).unwrap();
        queue.begin_shutdown();

        assert!(matches!(queue.enqueue(job("late")).await, Err(IngestError::ShuttingDown)));
        assert!(matches!(queue.try_enqueue(job("late")), Err(IngestError::ShuttingDown)));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn close_drains_then_reports_end() {
        let queue = JobQueue::new(4).unwrap();
        queue.enqueue(job("a")).await.unwrap();
        queue.enqueue(job("b")).await.unwrap();

        queue.close();

        assert!(queue.is_closed());
        assert!(queue.dequeue().await.is_some());
        assert!(queue.dequeue().await.is_some());
        assert!(queue.dequeue().await.is_none());
    }

    #[tokio::test]
    async fn close_wakes_idle_consumers() {
        let queue = Arc::new(JobQueue::new(2).unwrap());
        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.dequeue().await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(20)).await;

        queue.close();

        for consumer in consumers {
            let job = tokio::time::timeout(Duration::from_secs(1), consumer)
                .await
                .expect("idle consumer must observe close")
                .unwrap();
            assert!(job.is_none());
        }
    }

    #[tokio::test]
    async fn each_job_has_exactly_one_consumer() {
        let queue = Arc::new(JobQueue::new(64).unwrap());
        for i in 0..50u8 {
            queue.enqueue(Job::new(Bytes::from(vec![i]))).await.unwrap();
        }
        queue.close();

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    let mut seen = Vec::new();
                    while let Some(job) = queue.dequeue().await {
                        seen.push(job.body()[0]);
                    }
                    seen
                })
            })
            .collect();

        let mut all = Vec::new();
        for consumer in consumers {
            all.extend(consumer.await.unwrap());
        }
        all.sort_unstable();
        assert_eq!(all, (0..50u8).collect::<Vec<_>>());
    }
}
