//! Core domain models and payload codec.
//!
//! Provides the wire envelope pushed by the scanning service, the
//! observation batch stored for each accepted payload, storage key
//! derivation, and the clock abstraction used to make key derivation
//! testable. Everything here is pure and performs no I/O.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod error;
pub mod models;
pub mod time;

pub use codec::{annotate, decode, derive_key, encode, parse_time_zone};
pub use error::{CoreError, Result};
pub use models::{Envelope, Location, Observation, ObservationBatch, StorageKey};
pub use time::{Clock, RealClock, TestClock};

/// Tenant label written into every stored batch unless configured otherwise.
pub const DEFAULT_TENANT: &str = "tata";

/// Extension appended to every storage key.
pub const KEY_EXTENSION: &str = ".json";
