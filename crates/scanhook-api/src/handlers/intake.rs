//! Payload intake on `/`.
//!
//! `GET` answers the sender's validation handshake with the configured
//! token. `POST` reads the raw body and hands it to the job queue, waiting
//! for a free slot when the queue is full.

use axum::{
    extract::{rejection::BytesRejection, State},
    http::{
        header::{CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS},
        StatusCode,
    },
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use scanhook_ingest::Job;
use tracing::{debug, error, instrument, warn};

use crate::AppState;

const UNREADABLE_BODY: &str = "Bad request - Can't Decode!";
const SHUTTING_DOWN: &str = "Service shutting down";

/// Returns the validator token exactly as configured.
pub async fn serve_validator(State(state): State<AppState>) -> Response {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; charset=utf-8"), (X_CONTENT_TYPE_OPTIONS, "nosniff")],
        state.validator.to_string(),
    )
        .into_response()
}

/// Accepts a pushed payload for asynchronous processing.
///
/// Responds once the enqueue attempt has resolved:
/// - 202: body read and queued
/// - 400: body could not be read; nothing queued
/// - 503: shutdown refused the enqueue; nothing queued
#[instrument(name = "receive_payload", skip_all, fields(size = tracing::field::Empty))]
pub async fn receive_payload(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            warn!(error = %rejection, "failed to read request body");
            return (StatusCode::BAD_REQUEST, UNREADABLE_BODY).into_response();
        },
    };

    tracing::Span::current().record("size", body.len());

    match state.queue.enqueue(Job::new(body)).await {
        Ok(()) => {
            debug!(queue_depth = state.queue.len(), "payload queued");
            StatusCode::ACCEPTED.into_response()
        },
        Err(e) if e.is_enqueue_refusal() => {
            warn!(error = %e, "payload refused during shutdown");
            (StatusCode::SERVICE_UNAVAILABLE, SHUTTING_DOWN).into_response()
        },
        Err(e) => {
            error!(error = %e, "unexpected enqueue failure");
            (StatusCode::SERVICE_UNAVAILABLE, SHUTTING_DOWN).into_response()
        },
    }
}
