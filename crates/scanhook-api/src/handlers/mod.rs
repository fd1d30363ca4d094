//! HTTP request handlers for the scanhook receiver.
//!
//! - `intake` - Validator token and payload intake on `/`
//! - `health` - Liveness probe and the optional stats snapshot
//!
//! Handlers never process payloads themselves. Intake only enqueues, so a
//! response reflects whether the body was accepted, never whether it was
//! valid or stored.

use axum::http::StatusCode;

pub mod health;
pub mod intake;

pub use health::{debug_stats, healthz};
pub use intake::{receive_payload, serve_validator};

/// Fallback for unknown paths and unsupported methods.
pub async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}
