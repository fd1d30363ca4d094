//! Pipeline tests over the in-memory object store.
//!
//! Exercise the queue, pool, and object-store writer together the way the
//! binary wires them, with a pinned clock so object keys are predictable.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use chrono::{TimeZone, Utc};
use object_store::path::Path;
use scanhook_core::TestClock;
use scanhook_ingest::{
    storage::mock::RecordingStorage, IngestConfig, IngestError, Job, JobQueue, ObjectStoreWriter,
    StorageWriter, WorkerPool,
};
use serde_json::{json, Value};

const SECRET: &str = "pipeline-secret";

fn envelope(secret: &str, ap_mac: &str) -> Bytes {
    let body = json!({
        "version": "2.0",
        "secret": secret,
        "type": "DevicesSeen",
        "data": {
            "apMac": ap_mac,
            "apFloors": ["2"],
            "observations": [
                { "clientMac": "de:ad:be:ef:00:01", "rssi": -48, "ssid": "guest" },
                { "clientMac": "de:ad:be:ef:00:02", "rssi": -71 }
            ]
        }
    });
    Bytes::from(serde_json::to_vec(&body).unwrap())
}

fn config() -> IngestConfig {
    IngestConfig {
        worker_count: 2,
        queue_capacity: 8,
        secret: SECRET.to_string(),
        tenant: "tata".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn stored_object_is_tenant_stamped_batch() {
    let writer = Arc::new(ObjectStoreWriter::in_memory());
    let store = writer.store();
    let clock = TestClock::with_start_time(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    let queue = Arc::new(JobQueue::new(8).unwrap());
    let mut pool = WorkerPool::new(queue.clone(), writer, config(), Arc::new(clock));
    pool.spawn_workers().await.unwrap();

    queue.enqueue(Job::new(envelope(SECRET, "aa:bb:cc:dd:ee:ff"))).await.unwrap();
    let report = pool.shutdown_graceful(Duration::from_secs(5)).await.unwrap();

    assert_eq!(report.stats.stored, 1);
    let object = store
        .get(&Path::parse("2024-01-01T00:00:00Z-aa:bb:cc:dd:ee:ff.json").unwrap())
        .await
        .expect("object stored under derived key");
    let stored: Value = serde_json::from_slice(&object.bytes().await.unwrap()).unwrap();
    assert_eq!(stored["tenant"], "tata");
    assert_eq!(stored["apFloors"], json!(["2"]));
    assert_eq!(stored["observations"].as_array().unwrap().len(), 2);
    assert_eq!(stored["observations"][0]["ssid"], "guest");
    assert!(stored["observations"][1].get("ssid").is_none(), "empty fields are omitted");
}

#[tokio::test]
async fn wrong_secret_writes_nothing() {
    let storage = RecordingStorage::new();
    let queue = Arc::new(JobQueue::new(8).unwrap());
    let mut pool = WorkerPool::new(
        queue.clone(),
        Arc::new(storage.clone()),
        config(),
        Arc::new(TestClock::new()),
    );
    pool.spawn_workers().await.unwrap();

    for _ in 0..5 {
        queue.enqueue(Job::new(envelope("not-the-secret", "aa:bb:cc:dd:ee:ff"))).await.unwrap();
    }
    let report = pool.shutdown_graceful(Duration::from_secs(5)).await.unwrap();

    assert_eq!(report.stats.auth_rejected, 5);
    assert_eq!(storage.attempts(), 0);
}

#[tokio::test]
async fn full_queue_applies_backpressure_until_workers_start() {
    let storage = RecordingStorage::new();
    let queue = Arc::new(JobQueue::new(3).unwrap());
    let mut pool = WorkerPool::new(
        queue.clone(),
        Arc::new(storage.clone()),
        IngestConfig { queue_capacity: 3, ..config() },
        Arc::new(TestClock::new()),
    );

    for i in 0..3 {
        queue.enqueue(Job::new(envelope(SECRET, &format!("aa:aa:aa:aa:aa:{i:02}")))).await.unwrap();
    }
    let blocked = tokio::spawn({
        let queue = queue.clone();
        async move { queue.enqueue(Job::new(envelope(SECRET, "aa:aa:aa:aa:aa:03"))).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!blocked.is_finished(), "fourth enqueue must wait for a free slot");

    pool.spawn_workers().await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), blocked)
        .await
        .expect("enqueue should resume once workers drain")
        .unwrap()
        .unwrap();

    let report = pool.shutdown_graceful(Duration::from_secs(5)).await.unwrap();
    assert_eq!(report.stats.stored, 4);
    assert_eq!(storage.puts().await.len(), 4);
}

#[tokio::test]
async fn shutdown_releases_producer_blocked_on_full_queue() {
    let storage = RecordingStorage::new();
    storage.set_delay(Some(Duration::from_millis(200))).await;
    let queue = Arc::new(JobQueue::new(1).unwrap());
    let mut pool = WorkerPool::new(
        queue.clone(),
        Arc::new(storage.clone()),
        IngestConfig { worker_count: 1, queue_capacity: 1, ..config() },
        Arc::new(TestClock::new()),
    );
    pool.spawn_workers().await.unwrap();

    queue.enqueue(Job::new(envelope(SECRET, "aa:aa:aa:aa:aa:01"))).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    queue.enqueue(Job::new(envelope(SECRET, "aa:aa:aa:aa:aa:02"))).await.unwrap();
    let blocked = tokio::spawn({
        let queue = queue.clone();
        async move { queue.enqueue(Job::new(envelope(SECRET, "aa:aa:aa:aa:aa:03"))).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    queue.begin_shutdown();
    let refused = tokio::time::timeout(Duration::from_millis(100), blocked)
        .await
        .expect("blocked producer must be released promptly")
        .unwrap();
    assert!(matches!(refused, Err(IngestError::ShuttingDown)));

    let report = pool.shutdown_graceful(Duration::from_secs(5)).await.unwrap();
    assert_eq!(report.stats.stored, 2, "jobs accepted before shutdown are still stored");
}

#[tokio::test]
async fn in_memory_probe_succeeds() {
    let writer = ObjectStoreWriter::in_memory();
    writer.probe().await.unwrap();
}
