//! AuthSentry -- anomaly detection and alert dispatch for identity event
//! streams.
//!
//! This crate provides the core library for event ingestion, windowed
//! rule evaluation, risk scoring, alert deduplication, and delivery.

pub mod config;
pub mod detect;
pub mod dispatch;
pub mod ingest;
pub mod model;
pub mod pipeline;
pub mod score;
pub mod storage;

use std::path::Path;

use anyhow::Result;

/// Run a one-shot scan over a CSV export and dispatch whatever alerts
/// it produces.
pub async fn scan(
    input: &Path,
    config: &config::AppConfig,
    pool: &storage::Pool,
) -> Result<pipeline::RunSummary> {
    tracing::info!(input = %input.display(), "Starting scan");
    let mut source = ingest::csv_file::CsvFileSource::open(input)?;
    let notifier = dispatch::notifier::from_config(&config.notifier);
    pipeline::batch::run(&mut source, config, pool, notifier).await
}

/// Watch an event stream until it ends, the event budget is spent, or a
/// shutdown signal arrives.
pub async fn watch(
    source: Box<dyn ingest::EventSource>,
    config: &config::AppConfig,
    pool: &storage::Pool,
    shutdown: tokio::sync::oneshot::Receiver<()>,
    options: pipeline::WatchOptions,
) -> Result<pipeline::RunSummary> {
    let notifier = dispatch::notifier::from_config(&config.notifier);
    pipeline::stream::run(source, config, pool, notifier, shutdown, options).await
}
