//! Continuous watch: a tick-driven ingest loop that hands alert
//! candidates to the dispatch worker so slow deliveries never stall
//! ingestion.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::config::AppConfig;
use crate::detect::engine::DetectionEngine;
use crate::detect::rules::default_rules;
use crate::dispatch::{worker, AlertTrigger, DedupState, DispatchJob, Dispatcher, FailureLog, Notifier};
use crate::ingest::EventSource;
use crate::score::RiskScorer;
use crate::storage::Pool;

use super::{RunCounters, RunState, RunSummary};

/// Knobs for one watch run.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Pause between ingestion ticks.
    pub tick: Duration,
    /// Stop after this many events; `None` runs until the source ends
    /// or a shutdown arrives.
    pub budget: Option<u64>,
}

impl WatchOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            tick: Duration::from_millis(config.stream.tick_ms),
            budget: None,
        }
    }
}

enum TickFlow {
    Continue,
    Stop(RunState),
}

pub async fn run(
    mut source: Box<dyn EventSource>,
    config: &AppConfig,
    pool: &Pool,
    notifier: Arc<dyn Notifier>,
    shutdown: oneshot::Receiver<()>,
    options: WatchOptions,
) -> Result<RunSummary> {
    let counters = Arc::new(RunCounters::default());
    let mut engine = DetectionEngine::new(
        default_rules(&config.rules),
        Some(config.stream.max_buckets_per_rule),
    );
    let scorer = RiskScorer::new(&config.scoring, &config.rules);

    let failure_log = FailureLog::open(&config.storage.failure_log_path).await?;
    let dispatcher = Dispatcher::new(
        notifier,
        DedupState::new(config.dispatch.dedup_ttl_secs),
        failure_log,
        config.dispatch.alert_threshold,
    );
    let (jobs, worker) = worker::spawn(
        dispatcher,
        pool.clone(),
        counters.clone(),
        config.dispatch.queue_capacity,
    );

    info!(
        tick_ms = options.tick.as_millis() as u64,
        budget = ?options.budget,
        "watch starting"
    );

    let mut interval = tokio::time::interval(options.tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut shutdown = shutdown;

    let state = loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("shutdown requested, stopping watch");
                break RunState::Aborted;
            }
            _ = interval.tick() => {
                let flow = tick(
                    source.as_mut(),
                    &mut engine,
                    &scorer,
                    &jobs,
                    &counters,
                    options.budget,
                )
                .await;
                match flow {
                    TickFlow::Continue => {}
                    TickFlow::Stop(state) => break state,
                }
            }
        }
    };
    counters
        .rows_dropped
        .store(source.rows_dropped(), Ordering::Relaxed);

    // Close the queue and let the worker drain before reporting.
    drop(jobs);
    match worker.await {
        Ok(dispatcher) => {
            debug!(dedup_entries = dispatcher.dedup_len(), "dispatch worker finished")
        }
        Err(e) => error!(error = %e, "dispatch worker panicked"),
    }

    let summary = counters.summarize(state);
    info!(
        state = state.as_str(),
        events = summary.events_ingested,
        findings = summary.findings,
        sent = summary.alerts_sent,
        suppressed = summary.alerts_suppressed,
        failed = summary.alerts_failed,
        "watch finished"
    );
    Ok(summary)
}

/// Pull one event, update the live windows, and queue whatever alerts
/// the event produced.
async fn tick(
    source: &mut dyn EventSource,
    engine: &mut DetectionEngine,
    scorer: &RiskScorer,
    jobs: &mpsc::Sender<DispatchJob>,
    counters: &RunCounters,
    budget: Option<u64>,
) -> TickFlow {
    match source.next_event().await {
        Ok(Some(event)) => {
            let ingested = counters.events_ingested.fetch_add(1, Ordering::Relaxed) + 1;

            let touched = engine.ingest(&event);
            for finding in engine.evaluate_touched(&touched) {
                counters.findings.fetch_add(1, Ordering::Relaxed);
                let score = scorer.score_finding(&finding);
                let job = DispatchJob {
                    trigger: AlertTrigger::Finding(finding),
                    score,
                };
                if jobs.send(job).await.is_err() {
                    error!("dispatch queue closed, stopping watch");
                    return TickFlow::Stop(RunState::Aborted);
                }
            }

            if event.has_confidence() {
                let score = scorer.score_event(&event);
                let job = DispatchJob {
                    trigger: AlertTrigger::threat(&event),
                    score,
                };
                if jobs.send(job).await.is_err() {
                    error!("dispatch queue closed, stopping watch");
                    return TickFlow::Stop(RunState::Aborted);
                }
            }

            if budget.is_some_and(|b| ingested >= b) {
                debug!(ingested, "event budget reached");
                return TickFlow::Stop(RunState::Completed);
            }
            TickFlow::Continue
        }
        Ok(None) => {
            debug!("event source exhausted");
            TickFlow::Stop(RunState::Completed)
        }
        Err(e) => {
            error!(error = %e, "event source failed");
            TickFlow::Stop(RunState::Aborted)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::dispatch::testutil::ScriptedNotifier;
    use crate::ingest::synthetic::SyntheticSource;
    use crate::storage;

    fn fast_config(dir: &tempfile::TempDir) -> AppConfig {
        let mut config = AppConfig::default();
        config.storage.database_path = dir.path().join("alerts.db");
        config.storage.failure_log_path = dir.path().join("failed.jsonl");
        config.stream.tick_ms = 1;
        config
    }

    #[tokio::test]
    async fn test_watch_honors_event_budget() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = fast_config(&dir);
        let pool = storage::open_pool(&config.storage.database_path).unwrap();
        let (_stop, shutdown) = oneshot::channel();

        let summary = run(
            Box::new(SyntheticSource::seeded(7)),
            &config,
            &pool,
            ScriptedNotifier::reliable(),
            shutdown,
            WatchOptions {
                tick: Duration::from_millis(1),
                budget: Some(5),
            },
        )
        .await
        .unwrap();

        assert_eq!(summary.state, RunState::Completed);
        assert_eq!(summary.events_ingested, 5);
    }

    #[tokio::test]
    async fn test_watch_stops_on_shutdown_signal() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = fast_config(&dir);
        let pool = storage::open_pool(&config.storage.database_path).unwrap();
        let (stop, shutdown) = oneshot::channel();

        let watch = tokio::spawn(async move {
            run(
                Box::new(SyntheticSource::seeded(11)),
                &config,
                &pool,
                ScriptedNotifier::reliable(),
                shutdown,
                WatchOptions {
                    tick: Duration::from_millis(1),
                    budget: None,
                },
            )
            .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.send(()).unwrap();
        let summary = watch.await.unwrap().unwrap();

        assert_eq!(summary.state, RunState::Aborted);
        assert!(summary.events_ingested > 0);
    }
}
