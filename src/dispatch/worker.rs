//! Single-consumer dispatch worker for streaming runs.
//!
//! The tick loop stays on schedule by handing alert candidates to this
//! task over a bounded channel. The worker owns the dispatcher (and with
//! it the dedup state), so suppression decisions are serialized without
//! locks. Closing the channel drains the queue and returns the dispatcher
//! to the caller.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::pipeline::RunCounters;
use crate::storage::{self, Pool};

use super::{AlertTrigger, DispatchOutcome, Dispatcher};

/// One alert candidate, scored and ready for the dedup and threshold gates.
#[derive(Debug)]
pub struct DispatchJob {
    pub trigger: AlertTrigger,
    pub score: u8,
}

/// Start the worker. The returned sender enqueues jobs; dropping it stops
/// the worker after the queue drains.
pub fn spawn(
    mut dispatcher: Dispatcher,
    pool: Pool,
    counters: Arc<RunCounters>,
    capacity: usize,
) -> (mpsc::Sender<DispatchJob>, JoinHandle<Dispatcher>) {
    let (tx, mut rx) = mpsc::channel::<DispatchJob>(capacity);

    let handle = tokio::spawn(async move {
        debug!(capacity, "dispatch worker started");
        while let Some(job) = rx.recv().await {
            let outcome = dispatcher.consider(job.trigger, job.score).await;
            counters.record(&outcome);
            let alert = match &outcome {
                DispatchOutcome::Dispatched(alert) | DispatchOutcome::Failed(alert) => alert,
                DispatchOutcome::Suppressed | DispatchOutcome::BelowThreshold => continue,
            };
            if let Err(e) = storage::insert_alert(&pool, alert) {
                error!(alert_id = %alert.id, error = %e, "could not persist alert");
            }
        }
        debug!("dispatch worker drained");
        dispatcher
    });

    (tx, handle)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::dispatch::testutil::ScriptedNotifier;
    use crate::dispatch::{DedupState, FailureLog};

    async fn test_dispatcher(
        notifier: Arc<ScriptedNotifier>,
        dir: &tempfile::TempDir,
    ) -> Dispatcher {
        let log = FailureLog::open(&dir.path().join("failed.jsonl")).await.unwrap();
        Dispatcher::new(notifier, DedupState::new(None), log, 85)
    }

    fn threat_job(ip: &str, score: u8) -> DispatchJob {
        DispatchJob {
            trigger: AlertTrigger::Threat {
                ip: ip.to_string(),
                threat_type: "malware".to_string(),
                confidence: score,
                observed_at: chrono::Utc::now(),
            },
            score,
        }
    }

    #[tokio::test]
    async fn test_worker_drains_queue_then_returns_dispatcher() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = storage::open_pool(&dir.path().join("alerts.db")).unwrap();
        let notifier = ScriptedNotifier::reliable();
        let dispatcher = test_dispatcher(notifier.clone(), &dir).await;
        let counters = Arc::new(RunCounters::default());

        let (tx, handle) = spawn(dispatcher, pool.clone(), counters.clone(), 8);
        tx.send(threat_job("185.22.33.4", 95)).await.unwrap();
        tx.send(threat_job("185.22.33.4", 95)).await.unwrap();
        tx.send(threat_job("198.51.100.7", 90)).await.unwrap();
        drop(tx);

        let dispatcher = handle.await.unwrap();
        assert_eq!(dispatcher.dedup_len(), 2);
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 2);
        assert_eq!(counters.sent.load(Ordering::Relaxed), 2);
        assert_eq!(counters.suppressed.load(Ordering::Relaxed), 1);

        let rows = storage::list_recent_alerts(&pool, 10).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_worker_persists_failed_alerts_too() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = storage::open_pool(&dir.path().join("alerts.db")).unwrap();
        let notifier = ScriptedNotifier::failing_first(1);
        let dispatcher = test_dispatcher(notifier, &dir).await;
        let counters = Arc::new(RunCounters::default());

        let (tx, handle) = spawn(dispatcher, pool.clone(), counters.clone(), 8);
        tx.send(threat_job("185.22.33.4", 95)).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(counters.failed.load(Ordering::Relaxed), 1);
        let rows = storage::list_recent_alerts(&pool, 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, "failed");
    }
}
