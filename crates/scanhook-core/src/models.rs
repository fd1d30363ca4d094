//! Wire and storage models for location-observation payloads.
//!
//! Field names follow the scanning service's JSON (`apMac`, `seenEpoch`,
//! ...). Empty strings, empty sequences, and zero numbers are omitted on
//! encode. On decode, a missing field and an explicit `null` both yield the
//! zero value, so a batch survives a decode/encode cycle unchanged.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Versioned envelope pushed by the scanning service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Envelope {
    /// Protocol version declared by the sender
    #[serde(skip_serializing_if = "String::is_empty", deserialize_with = "null_as_default")]
    pub version: String,
    /// Shared secret used to authorize the payload
    #[serde(skip_serializing_if = "String::is_empty", deserialize_with = "null_as_default")]
    pub secret: String,
    /// Payload type tag, e.g. `DevicesSeen`
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    #[serde(deserialize_with = "null_as_default")]
    pub kind: String,
    /// Observation batch carried by the envelope
    #[serde(deserialize_with = "null_as_default")]
    pub data: ObservationBatch,
}

impl Envelope {
    /// Checks the embedded secret against the configured one.
    ///
    /// Comparison time does not depend on where the secrets differ.
    pub fn authorize(&self, secret: &str) -> bool {
        constant_time_eq(self.secret.as_bytes(), secret.as_bytes())
    }

    /// Consumes the envelope, yielding its batch.
    pub fn into_batch(self) -> ObservationBatch {
        self.data
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Observations reported by a single access point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ObservationBatch {
    /// Hardware address of the reporting access point
    #[serde(skip_serializing_if = "String::is_empty", deserialize_with = "null_as_default")]
    pub ap_mac: String,
    /// Tags configured on the access point
    #[serde(skip_serializing_if = "Vec::is_empty", deserialize_with = "null_as_default")]
    pub ap_tags: Vec<String>,
    /// Floor plans the access point is placed on
    #[serde(skip_serializing_if = "Vec::is_empty", deserialize_with = "null_as_default")]
    pub ap_floors: Vec<String>,
    /// Client sightings in the order reported
    #[serde(skip_serializing_if = "Vec::is_empty", deserialize_with = "null_as_default")]
    pub observations: Vec<Observation>,
    /// Tenant label, overwritten before storage
    #[serde(skip_serializing_if = "String::is_empty", deserialize_with = "null_as_default")]
    pub tenant: String,
}

/// One client sighting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Observation {
    /// Network name the client was seen on
    #[serde(skip_serializing_if = "String::is_empty", deserialize_with = "null_as_default")]
    pub ssid: String,
    /// Client IPv4 address, if known
    #[serde(skip_serializing_if = "String::is_empty", deserialize_with = "null_as_default")]
    pub ipv4: String,
    /// Client IPv6 address, if known
    #[serde(skip_serializing_if = "String::is_empty", deserialize_with = "null_as_default")]
    pub ipv6: String,
    /// Capture time as seconds since the Unix epoch
    #[serde(rename = "seenEpoch", skip_serializing_if = "is_zero_i64")]
    #[serde(deserialize_with = "null_as_default")]
    pub seen_epoch: i64,
    /// Capture time as formatted by the sender
    #[serde(rename = "seenTime", skip_serializing_if = "String::is_empty")]
    #[serde(deserialize_with = "null_as_default")]
    pub seen_time: String,
    /// Received signal strength
    #[serde(skip_serializing_if = "is_zero_i32", deserialize_with = "null_as_default")]
    pub rssi: i32,
    /// Client hardware vendor
    #[serde(skip_serializing_if = "String::is_empty", deserialize_with = "null_as_default")]
    pub manufacturer: String,
    /// Operating system hint
    #[serde(skip_serializing_if = "String::is_empty", deserialize_with = "null_as_default")]
    pub os: String,
    /// Estimated position
    #[serde(deserialize_with = "null_as_default")]
    pub location: Location,
    /// Hardware address of the sighted client
    #[serde(rename = "clientMac", skip_serializing_if = "String::is_empty")]
    #[serde(deserialize_with = "null_as_default")]
    pub client_mac: String,
}

/// Geographic estimate for a sighting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Location {
    /// Latitude in degrees
    #[serde(skip_serializing_if = "is_zero_f64", deserialize_with = "null_as_default")]
    pub lat: f64,
    /// Longitude in degrees
    #[serde(skip_serializing_if = "is_zero_f64", deserialize_with = "null_as_default")]
    pub lng: f64,
    /// Uncertainty radius in meters
    #[serde(skip_serializing_if = "is_zero_f64", deserialize_with = "null_as_default")]
    pub unc: f64,
    /// Sample x coordinates for multi-point estimates
    #[serde(skip_serializing_if = "Vec::is_empty", deserialize_with = "null_as_default")]
    pub x: Vec<f64>,
    /// Sample y coordinates for multi-point estimates
    #[serde(skip_serializing_if = "Vec::is_empty", deserialize_with = "null_as_default")]
    pub y: Vec<f64>,
}

/// Reads `null` as the zero value, the same as an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}

fn is_zero_i32(v: &i32) -> bool {
    *v == 0
}

fn is_zero_f64(v: &f64) -> bool {
    *v == 0.0
}

/// Object key a stored batch is written under.
///
/// Keys are derived from arrival time and access point, so two batches from
/// the same access point within one second share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageKey(String);

impl StorageKey {
    /// Wraps an already-formatted key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StorageKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
