//! Process-wide liveness flag read by the health endpoint.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Shared healthy/unhealthy gate.
///
/// Starts unhealthy. The lifecycle controller marks it ready once the
/// listener is bound and unhealthy again as soon as shutdown begins, so
/// load balancers stop routing before connections are drained. Clones
/// share the same flag.
#[derive(Debug, Clone, Default)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    /// Creates an unhealthy gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the process as ready to serve.
    pub fn mark_ready(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Marks the process as shutting down.
    pub fn mark_unhealthy(&self) {
        self.0.store(false, Ordering::Release);
    }

    /// Current state.
    pub fn is_healthy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
