//! Error types for payload decoding, encoding, and key derivation.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Failures raised by the payload codec.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Payload bytes are not a valid envelope.
    #[error("malformed envelope: {0}")]
    Decode(#[source] serde_json::Error),

    /// Envelope carries no shared secret.
    #[error("envelope has no secret")]
    MissingSecret,

    /// Batch has no access-point identifier to key the record by.
    #[error("batch has no apMac")]
    MissingApMac,

    /// Batch could not be serialized for storage.
    #[error("failed to encode batch: {0}")]
    Encode(#[source] serde_json::Error),

    /// Time-zone name is not in the tz database.
    #[error("unknown time zone: {name}")]
    InvalidTimeZone {
        /// Name that failed to resolve
        name: String,
    },
}

impl CoreError {
    /// Creates an invalid time-zone error.
    pub fn invalid_time_zone(name: impl Into<String>) -> Self {
        Self::InvalidTimeZone { name: name.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_format() {
        assert_eq!(CoreError::MissingApMac.to_string(), "batch has no apMac");
        assert_eq!(
            CoreError::invalid_time_zone("Mars/Olympus").to_string(),
            "unknown time zone: Mars/Olympus"
        );
    }
}
