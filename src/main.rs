//! scanhook webhook receiver.
//!
//! Main entry point. Loads configuration, builds the storage backend, runs
//! the receiver, and turns the first shutdown trigger into a bounded drain.

use std::{process::ExitCode, sync::Arc};

use anyhow::{Context, Result};
use scanhook_api::{Config, Service, ServiceOptions, StorageBackend};
use scanhook_core::RealClock;
use scanhook_ingest::{ObjectStoreWriter, StorageWriter};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            init_tracing("info");
            error!(error = %format!("{e:#}"), "Failed to load configuration");
            return ExitCode::FAILURE;
        },
    };

    init_tracing(&config.rust_log);

    match run(config).await {
        Ok(RunOutcome::Clean) => ExitCode::SUCCESS,
        Ok(RunOutcome::Aborted) => {
            error!("scanhook stopped after a fatal worker error");
            ExitCode::FAILURE
        },
        Err(e) => {
            error!(error = %format!("{e:#}"), "scanhook failed");
            ExitCode::FAILURE
        },
    }
}

/// How the service came to stop.
enum RunOutcome {
    /// Stopped by a shutdown signal.
    Clean,
    /// Stopped because a worker aborted under the abort policy.
    Aborted,
}

async fn run(config: Config) -> Result<RunOutcome> {
    info!("Starting scanhook webhook receiver");
    info!(
        host = %config.host,
        port = config.port,
        max_queue_size = config.max_queue_size,
        max_workers = config.max_workers,
        storage_backend = ?config.storage_backend,
        bucket = %config.bucket,
        region = %config.region,
        location = %config.location,
        tenant = %config.tenant,
        secret = %config.secret_masked(),
        failure_policy = ?config.failure_policy,
        drain_timeout_secs = config.drain_timeout_secs,
        tls = config.tls_paths().is_some(),
        profiling = config.profiling,
        "Configuration loaded"
    );

    let options = ServiceOptions::from_config(&config)?;
    let ingest = config.to_ingest_config()?;
    let storage = build_storage(&config)?;

    let service = Service::start(options, ingest, storage, Arc::new(RealClock)).await?;
    let fatal = service.fatal_error_token();

    let outcome = tokio::select! {
        _ = scanhook_api::shutdown_signal() => RunOutcome::Clean,
        () = fatal.cancelled() => {
            error!("Worker aborted, starting shutdown");
            RunOutcome::Aborted
        },
    };

    let summary = service.shutdown().await;
    if !summary.is_complete() {
        warn!(
            http_drained = summary.http_drained,
            abandoned_jobs = summary.abandoned_jobs,
            "Shutdown drain was incomplete"
        );
    }

    Ok(outcome)
}

/// Builds the configured storage backend.
fn build_storage(config: &Config) -> Result<Arc<dyn StorageWriter>> {
    let writer = match config.storage_backend {
        StorageBackend::S3 => ObjectStoreWriter::s3(&config.bucket, &config.region)
            .context("Failed to build S3 client")?,
        StorageBackend::Memory => {
            warn!("Using in-memory storage; stored payloads are lost on exit");
            ObjectStoreWriter::in_memory()
        },
    };
    Ok(Arc::new(writer))
}

/// Initializes tracing with environment-based configuration.
///
/// `RUST_LOG` wins over the configured default filter.
fn init_tracing(default_filter: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    let _ = tracing_subscriber::registry().with(filter).with(fmt_layer).try_init();
}
