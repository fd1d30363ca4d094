//! Payload codec: envelope decoding, batch annotation, key derivation, and
//! re-encoding for storage.
//!
//! All functions are pure. The current time and the time zone are inputs so
//! that callers control key derivation completely.

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use chrono_tz::Tz;

use crate::{
    error::{CoreError, Result},
    models::{Envelope, ObservationBatch, StorageKey},
    KEY_EXTENSION,
};

/// Decodes raw request bytes into an envelope.
///
/// # Errors
///
/// Returns [`CoreError::Decode`] for malformed JSON and
/// [`CoreError::MissingSecret`] when the envelope cannot be authorized.
pub fn decode(bytes: &[u8]) -> Result<Envelope> {
    let envelope: Envelope = serde_json::from_slice(bytes).map_err(CoreError::Decode)?;
    if envelope.secret.is_empty() {
        return Err(CoreError::MissingSecret);
    }
    Ok(envelope)
}

/// Overwrites the batch tenant with the configured label.
pub fn annotate(mut batch: ObservationBatch, tenant: &str) -> ObservationBatch {
    batch.tenant = tenant.to_string();
    batch
}

/// Derives the storage key for a batch observed at `now`.
///
/// The key is `now` rendered in `tz` as RFC 3339 with second precision,
/// followed by `-`, the access point address, and `.json`. A zero offset
/// renders as `Z`.
///
/// # Errors
///
/// Returns [`CoreError::MissingApMac`] when the batch has no access point.
pub fn derive_key(batch: &ObservationBatch, now: DateTime<Utc>, tz: &Tz) -> Result<StorageKey> {
    if batch.ap_mac.is_empty() {
        return Err(CoreError::MissingApMac);
    }
    let timestamp = now.with_timezone(tz).to_rfc3339_opts(SecondsFormat::Secs, true);
    Ok(StorageKey::new(format!("{timestamp}-{}{KEY_EXTENSION}", batch.ap_mac)))
}

/// Encodes a batch as the JSON document written to storage.
///
/// # Errors
///
/// Returns [`CoreError::Encode`] if serialization fails.
pub fn encode(batch: &ObservationBatch) -> Result<Bytes> {
    serde_json::to_vec(batch).map(Bytes::from).map_err(CoreError::Encode)
}

/// Resolves a tz database name such as `UTC` or `America/Caracas`.
///
/// # Errors
///
/// Returns [`CoreError::InvalidTimeZone`] for unknown names.
pub fn parse_time_zone(name: &str) -> Result<Tz> {
    name.parse::<Tz>().map_err(|_| CoreError::invalid_time_zone(name))
}
