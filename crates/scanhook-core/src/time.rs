//! Clock abstraction for storage key derivation.
//!
//! Workers read wall-clock time to build object keys and monotonic time to
//! report processing latency. Production code uses `RealClock`; tests pin
//! the wall clock with `TestClock` to get deterministic keys.

use std::{
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};

/// Source of wall-clock and monotonic time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current instant for duration measurements.
    fn now(&self) -> Instant;

    /// Returns the current wall-clock time.
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock instance.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock whose wall time only moves when told to.
///
/// Clones share state, so a test can hold one handle while the worker pool
/// holds another.
#[derive(Debug, Clone)]
pub struct TestClock {
    /// Monotonic nanoseconds since `base_instant`
    monotonic_ns: Arc<AtomicU64>,
    /// Wall time as nanoseconds since the Unix epoch
    wall_ns: Arc<AtomicI64>,
    base_instant: Instant,
}

impl TestClock {
    /// Creates a test clock frozen at the current time.
    pub fn new() -> Self {
        Self::with_start_time(Utc::now())
    }

    /// Creates a test clock frozen at `start`.
    pub fn with_start_time(start: DateTime<Utc>) -> Self {
        Self {
            monotonic_ns: Arc::new(AtomicU64::new(0)),
            wall_ns: Arc::new(AtomicI64::new(to_nanos(start))),
            base_instant: Instant::now(),
        }
    }

    /// Advances both monotonic and wall time.
    pub fn advance(&self, duration: Duration) {
        let ns = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.monotonic_ns.fetch_add(ns, Ordering::AcqRel);
        self.wall_ns.fetch_add(i64::try_from(ns).unwrap_or(i64::MAX), Ordering::AcqRel);
    }

    /// Sets wall time, which may move backwards. Monotonic time is untouched.
    pub fn set(&self, time: DateTime<Utc>) {
        self.wall_ns.store(to_nanos(time), Ordering::Release);
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.base_instant + Duration::from_nanos(self.monotonic_ns.load(Ordering::Acquire))
    }

    fn now_utc(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.wall_ns.load(Ordering::Acquire))
    }
}

fn to_nanos(time: DateTime<Utc>) -> i64 {
    time.timestamp_nanos_opt().unwrap_or(i64::MAX)
}
