//! Configuration management for the scanhook receiver.

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use chrono_tz::Tz;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use scanhook_ingest::{FailurePolicy, IngestConfig};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "scanhook.toml";

/// Environment variable prefix for every setting.
pub const ENV_PREFIX: &str = "SCANHOOK_";

/// Where accepted batches are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// S3 bucket addressed by `bucket` and `region`.
    #[default]
    S3,
    /// Process-local in-memory store, for local runs.
    Memory,
}

/// Complete service configuration with defaults, file, and environment
/// overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables prefixed with `SCANHOOK_` (highest priority)
/// 2. Configuration file (`scanhook.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// # Example
///
/// ```no_run
/// use scanhook_api::Config;
///
/// let config = Config::load().expect("Failed to load configuration");
///
/// println!("Receiver will bind to {}:{}", config.host, config.port);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server
    /// Server bind address.
    ///
    /// Environment variable: `SCANHOOK_HOST`
    #[serde(default = "default_host")]
    pub host: String,
    /// Server bind port.
    ///
    /// Environment variable: `SCANHOOK_PORT`
    #[serde(default = "default_port")]
    pub port: u16,
    /// Per-request timeout in seconds.
    ///
    /// Environment variable: `SCANHOOK_REQUEST_TIMEOUT_SECS`
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Deadline for draining requests and queued jobs at shutdown, in seconds.
    ///
    /// Environment variable: `SCANHOOK_DRAIN_TIMEOUT_SECS`
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
    /// PEM certificate chain; enables TLS together with `tls_key`.
    ///
    /// Environment variable: `SCANHOOK_TLS_CERT`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_cert: Option<PathBuf>,
    /// PEM private key; enables TLS together with `tls_cert`.
    ///
    /// Environment variable: `SCANHOOK_TLS_KEY`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_key: Option<PathBuf>,

    // Pipeline
    /// Maximum queued jobs before intake waits.
    ///
    /// Environment variable: `SCANHOOK_MAX_QUEUE_SIZE`
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    /// Number of ingest workers.
    ///
    /// Environment variable: `SCANHOOK_MAX_WORKERS`
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Shared secret expected inside every envelope.
    ///
    /// Environment variable: `SCANHOOK_SECRET`
    #[serde(default = "default_secret")]
    pub secret: String,
    /// Token returned by `GET /` so the sender can validate the receiver.
    ///
    /// Environment variable: `SCANHOOK_VALIDATOR`
    #[serde(default = "default_validator")]
    pub validator: String,
    /// Tenant label stamped onto stored batches.
    ///
    /// Environment variable: `SCANHOOK_TENANT`
    #[serde(default = "default_tenant")]
    pub tenant: String,
    /// IANA time zone used in object keys.
    ///
    /// Environment variable: `SCANHOOK_LOCATION`
    #[serde(default = "default_location")]
    pub location: String,
    /// Reaction to decode, encode, and store failures.
    ///
    /// Environment variable: `SCANHOOK_FAILURE_POLICY`
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Bound on a single storage write, in seconds.
    ///
    /// Environment variable: `SCANHOOK_STORE_TIMEOUT_SECS`
    #[serde(default = "default_store_timeout")]
    pub store_timeout_secs: u64,

    // Storage
    /// Storage backend.
    ///
    /// Environment variable: `SCANHOOK_STORAGE_BACKEND`
    #[serde(default)]
    pub storage_backend: StorageBackend,
    /// Destination bucket.
    ///
    /// Environment variable: `SCANHOOK_BUCKET`
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Bucket region.
    ///
    /// Environment variable: `SCANHOOK_REGION`
    #[serde(default = "default_region")]
    pub region: String,

    // Diagnostics
    /// Exposes `GET /debug/stats`.
    ///
    /// Environment variable: `SCANHOOK_PROFILING`
    #[serde(default)]
    pub profiling: bool,
    /// Log filter used when `RUST_LOG` is unset.
    ///
    /// Environment variable: `SCANHOOK_RUST_LOG`
    #[serde(default = "default_log_level")]
    pub rust_log: String,
}

impl Config {
    /// Load configuration from defaults, config file, and environment variable
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns error if a source cannot be parsed or validation fails.
    pub fn load() -> Result<Self> {
        Self::from_figment(
            Figment::new()
                .merge(Serialized::defaults(Self::default()))
                .merge(Toml::file(CONFIG_FILE))
                .merge(Env::prefixed(ENV_PREFIX)),
        )
    }

    /// Extracts and validates configuration from an arbitrary figment.
    ///
    /// # Errors
    ///
    /// Returns error if extraction or validation fails.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Parses the configured time zone.
    ///
    /// # Errors
    ///
    /// Returns error if `location` is not a known IANA zone.
    pub fn time_zone(&self) -> Result<Tz> {
        scanhook_core::parse_time_zone(&self.location)
            .with_context(|| format!("Invalid location {:?}", self.location))
    }

    /// Convert to the ingest crate's configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the time zone cannot be parsed.
    pub fn to_ingest_config(&self) -> Result<IngestConfig> {
        Ok(IngestConfig {
            worker_count: self.max_workers,
            queue_capacity: self.max_queue_size,
            secret: self.secret.clone(),
            tenant: self.tenant.clone(),
            time_zone: self.time_zone()?,
            store_timeout: Duration::from_secs(self.store_timeout_secs),
            failure_policy: self.failure_policy,
        })
    }

    /// Parse server socket address from host and port configuration.
    pub fn parse_server_addr(&self) -> Result<SocketAddr> {
        let addr_str = format!("{}:{}", self.host, self.port);
        SocketAddr::from_str(&addr_str).context("Invalid server address")
    }

    /// Shutdown drain deadline.
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    /// Per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Certificate and key paths when TLS is configured.
    pub fn tls_paths(&self) -> Option<(PathBuf, PathBuf)> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Some((cert.clone(), key.clone())),
            _ => None,
        }
    }

    /// Get the shared secret masked for logging.
    pub fn secret_masked(&self) -> String {
        mask(&self.secret)
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<()> {
        if self.max_queue_size == 0 {
            anyhow::bail!("max_queue_size must be greater than 0");
        }

        if self.max_workers == 0 {
            anyhow::bail!("max_workers must be greater than 0");
        }

        if self.store_timeout_secs == 0 {
            anyhow::bail!("store_timeout_secs must be greater than 0");
        }

        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than 0");
        }

        for (name, value) in [
            ("secret", &self.secret),
            ("validator", &self.validator),
            ("tenant", &self.tenant),
            ("bucket", &self.bucket),
        ] {
            if value.trim().is_empty() {
                anyhow::bail!("{name} must not be empty");
            }
        }

        self.time_zone()?;

        match (&self.tls_cert, &self.tls_key) {
            (Some(_), None) => anyhow::bail!("tls_cert is set but tls_key is missing"),
            (None, Some(_)) => anyhow::bail!("tls_key is set but tls_cert is missing"),
            _ => {},
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            drain_timeout_secs: default_drain_timeout(),
            tls_cert: None,
            tls_key: None,
            max_queue_size: default_max_queue_size(),
            max_workers: default_max_workers(),
            secret: default_secret(),
            validator: default_validator(),
            tenant: default_tenant(),
            location: default_location(),
            failure_policy: FailurePolicy::default(),
            store_timeout_secs: default_store_timeout(),
            storage_backend: StorageBackend::default(),
            bucket: default_bucket(),
            region: default_region(),
            profiling: false,
            rust_log: default_log_level(),
        }
    }
}

fn mask(value: &str) -> String {
    let visible: String = value.chars().take(4).collect();
    if value.chars().count() <= 8 {
        return "***".to_string();
    }
    format!("{visible}***")
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    10
}

fn default_drain_timeout() -> u64 {
    30
}

fn default_max_queue_size() -> usize {
    scanhook_ingest::DEFAULT_QUEUE_CAPACITY
}

fn default_max_workers() -> usize {
    scanhook_ingest::DEFAULT_WORKER_COUNT
}

fn default_secret() -> String {
    "cjkww5rmn0001SE__2j7wztuy".to_string()
}

fn default_validator() -> String {
    "da6a17c407bb11dfeec7392a5042be0a4cc034b6".to_string()
}

fn default_tenant() -> String {
    scanhook_core::DEFAULT_TENANT.to_string()
}

fn default_location() -> String {
    "UTC".to_string()
}

fn default_store_timeout() -> u64 {
    scanhook_ingest::DEFAULT_STORE_TIMEOUT_SECONDS
}

fn default_bucket() -> String {
    "cri.conatel.cloud".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}
