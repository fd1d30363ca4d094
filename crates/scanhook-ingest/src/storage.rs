//! Storage abstraction for encoded observation batches.
//!
//! Workers write through the [`StorageWriter`] trait so the pipeline can be
//! exercised without a cloud bucket. Production uses [`ObjectStoreWriter`]
//! over S3, tests use either the in-memory object store or the recording
//! double in [`mock`].

use std::{future::Future, pin::Pin, sync::Arc};

use bytes::Bytes;
use object_store::{aws::AmazonS3Builder, memory::InMemory, path::Path, ObjectStore};
use scanhook_core::StorageKey;
use tracing::debug;

use crate::error::{IngestError, Result};

/// Object used to check bucket reachability at startup.
const PROBE_OBJECT: &str = ".scanhook-probe";

/// Destination for encoded batches.
///
/// Implementations must be safe to call from every worker at once.
pub trait StorageWriter: Send + Sync + 'static {
    /// Writes `body` under `key`, overwriting any existing object.
    fn put(
        &self,
        key: &StorageKey,
        body: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Checks that the backend is reachable with the current credentials.
    ///
    /// A missing probe object counts as reachable.
    fn probe(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Short human-readable description for logs.
    fn describe(&self) -> String;
}

/// [`StorageWriter`] backed by any [`ObjectStore`].
pub struct ObjectStoreWriter {
    store: Arc<dyn ObjectStore>,
    description: String,
}

impl ObjectStoreWriter {
    /// Creates an S3 writer for `bucket` in `region`.
    ///
    /// Credentials come from the standard `AWS_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::StorageUnavailable`] if the client cannot be
    /// built from the environment.
    pub fn s3(bucket: &str, region: &str) -> Result<Self> {
        let store = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .with_region(region)
            .build()
            .map_err(IngestError::storage_unavailable)?;

        Ok(Self { store: Arc::new(store), description: format!("s3://{bucket} ({region})") })
    }

    /// Creates a writer over a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::from_store(Arc::new(InMemory::new()), "memory")
    }

    /// Wraps an existing object store.
    pub fn from_store(store: Arc<dyn ObjectStore>, description: impl Into<String>) -> Self {
        Self { store, description: description.into() }
    }

    /// Underlying object store.
    pub fn store(&self) -> Arc<dyn ObjectStore> {
        self.store.clone()
    }
}

impl StorageWriter for ObjectStoreWriter {
    fn put(
        &self,
        key: &StorageKey,
        body: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let parsed = object_path(key);
        let key = key.to_string();
        let store = self.store.clone();

        Box::pin(async move {
            let path = parsed?;
            let size = body.len();
            store.put(&path, body.into()).await.map_err(|e| IngestError::storage(&key, e))?;
            debug!(key = %key, size, "object written");
            Ok(())
        })
    }

    fn probe(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let store = self.store.clone();
        Box::pin(async move {
            match store.head(&Path::from(PROBE_OBJECT)).await {
                Ok(_) | Err(object_store::Error::NotFound { .. }) => Ok(()),
                Err(e) => Err(IngestError::storage_unavailable(e)),
            }
        })
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

/// Object path for `key`, kept verbatim.
///
/// `Path::from` would percent-encode characters such as `%`, `#`, and `~`
/// and so write under a different name. `/` still separates segments, so a
/// key with an empty, `.`, or `..` segment or a control character is
/// rejected instead of rewritten.
fn object_path(key: &StorageKey) -> Result<Path> {
    Path::parse(key.as_str()).map_err(|e| IngestError::storage(key.as_str(), e))
}

impl std::fmt::Debug for ObjectStoreWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreWriter").field("description", &self.description).finish()
    }
}

pub mod mock {
    //! Recording storage double for pipeline tests.
    //!
    //! Keeps every successful write in order and can be told to fail or
    //! stall, which is enough to drive the failure policy and shutdown
    //! paths deterministically.

    use std::{
        future::Future,
        pin::Pin,
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use bytes::Bytes;
    use scanhook_core::StorageKey;
    use tokio::sync::{Notify, RwLock};

    use super::StorageWriter;
    use crate::error::{IngestError, Result};

    /// In-memory writer that records puts and can inject failures.
    #[derive(Clone, Default)]
    pub struct RecordingStorage {
        puts: Arc<RwLock<Vec<(StorageKey, Bytes)>>>,
        attempts: Arc<AtomicUsize>,
        failing: Arc<AtomicBool>,
        unreachable: Arc<AtomicBool>,
        delay: Arc<RwLock<Option<Duration>>>,
        written: Arc<Notify>,
    }

    impl RecordingStorage {
        /// Creates an empty recorder.
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes subsequent puts fail (or succeed again).
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// Makes [`StorageWriter::probe`] fail.
        pub fn set_unreachable(&self, unreachable: bool) {
            self.unreachable.store(unreachable, Ordering::SeqCst);
        }

        /// Delays every put by `delay` before it completes.
        pub async fn set_delay(&self, delay: Option<Duration>) {
            *self.delay.write().await = delay;
        }

        /// Successful writes in completion order.
        pub async fn puts(&self) -> Vec<(StorageKey, Bytes)> {
            self.puts.read().await.clone()
        }

        /// Number of put calls, including failed ones.
        pub fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }

        /// Waits until at least `count` writes succeeded or `timeout` elapsed.
        ///
        /// Returns the writes recorded at that point.
        pub async fn wait_for_puts(&self, count: usize, timeout: Duration) -> Vec<(StorageKey, Bytes)> {
            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                let notified = self.written.notified();
                {
                    let puts = self.puts.read().await;
                    if puts.len() >= count {
                        return puts.clone();
                    }
                }
                if tokio::time::timeout_at(deadline, notified).await.is_err() {
                    return self.puts().await;
                }
            }
        }
    }

    impl StorageWriter for RecordingStorage {
        fn put(
            &self,
            key: &StorageKey,
            body: Bytes,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let key = key.clone();
            Box::pin(async move {
                self.attempts.fetch_add(1, Ordering::SeqCst);

                let delay = *self.delay.read().await;
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }

                if self.failing.load(Ordering::SeqCst) {
                    return Err(IngestError::storage(key.as_str(), "injected storage failure"));
                }

                self.puts.write().await.push((key, body));
                self.written.notify_waiters();
                Ok(())
            })
        }

        fn probe(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async move {
                if self.unreachable.load(Ordering::SeqCst) {
                    return Err(IngestError::storage_unavailable("injected probe failure"));
                }
                Ok(())
            })
        }

        fn describe(&self) -> String {
            "recording".to_string()
        }
    }
}
