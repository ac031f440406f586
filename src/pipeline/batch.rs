//! One-shot scan: ingest everything, evaluate, dispatch, persist.
//!
//! A scan is all-or-nothing. If the source fails mid-read the run aborts
//! and no alert rows are written; alerts from a completed scan land in
//! the sink inside a single transaction.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, error, info};

use crate::config::AppConfig;
use crate::detect::engine::DetectionEngine;
use crate::detect::rules::default_rules;
use crate::dispatch::{
    AlertTrigger, DedupState, DispatchOutcome, Dispatcher, FailureLog, Notifier,
};
use crate::ingest::EventSource;
use crate::model::Event;
use crate::score::RiskScorer;
use crate::storage::{self, Pool};

use super::{RunCounters, RunState, RunSummary};

pub async fn run(
    source: &mut dyn EventSource,
    config: &AppConfig,
    pool: &Pool,
    notifier: Arc<dyn Notifier>,
) -> Result<RunSummary> {
    let counters = RunCounters::default();
    debug!(
        from = RunState::Idle.as_str(),
        to = RunState::Running.as_str(),
        "scan starting"
    );

    // Ingest phase. Any source error abandons the whole run.
    let mut events: Vec<Event> = Vec::new();
    loop {
        match source.next_event().await {
            Ok(Some(event)) => events.push(event),
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, events_read = events.len(), "event source failed, aborting scan");
                counters
                    .events_ingested
                    .store(events.len() as u64, Ordering::Relaxed);
                counters
                    .rows_dropped
                    .store(source.rows_dropped(), Ordering::Relaxed);
                return Ok(counters.summarize(RunState::Aborted));
            }
        }
    }
    counters
        .events_ingested
        .store(events.len() as u64, Ordering::Relaxed);
    counters
        .rows_dropped
        .store(source.rows_dropped(), Ordering::Relaxed);

    // Detection phase.
    let mut engine = DetectionEngine::new(default_rules(&config.rules), None);
    for event in &events {
        engine.ingest(event);
    }
    let findings = engine.evaluate_all();
    counters
        .findings
        .store(findings.len() as u64, Ordering::Relaxed);
    debug!(
        events = events.len(),
        findings = findings.len(),
        "detection pass complete"
    );

    // Dispatch phase: window findings first, then raw threats.
    let scorer = RiskScorer::new(&config.scoring, &config.rules);
    let failure_log = FailureLog::open(&config.storage.failure_log_path).await?;
    let mut dispatcher = Dispatcher::new(
        notifier,
        DedupState::new(config.dispatch.dedup_ttl_secs),
        failure_log,
        config.dispatch.alert_threshold,
    );

    let mut produced = Vec::new();
    for finding in findings {
        let score = scorer.score_finding(&finding);
        let outcome = dispatcher.consider(AlertTrigger::Finding(finding), score).await;
        counters.record(&outcome);
        if let DispatchOutcome::Dispatched(alert) | DispatchOutcome::Failed(alert) = outcome {
            produced.push(alert);
        }
    }
    for event in &events {
        if !event.has_confidence() {
            continue;
        }
        let score = scorer.score_event(event);
        let outcome = dispatcher.consider(AlertTrigger::threat(event), score).await;
        counters.record(&outcome);
        if let DispatchOutcome::Dispatched(alert) | DispatchOutcome::Failed(alert) = outcome {
            produced.push(alert);
        }
    }

    // Persist phase: every produced alert in one transaction.
    storage::insert_alerts(pool, &produced)?;

    let summary = counters.summarize(RunState::Completed);
    info!(
        events = summary.events_ingested,
        findings = summary.findings,
        sent = summary.alerts_sent,
        failed = summary.alerts_failed,
        "scan complete"
    );
    Ok(summary)
}
