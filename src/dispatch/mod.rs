//! Alert construction, deduplication, and dispatch.

pub mod failure_log;
pub mod notifier;
pub mod worker;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::detect::Finding;
use crate::model::{AlertType, Event};

pub use failure_log::{FailureLog, FailureRecord};
pub use notifier::{Notifier, NotifyError};
pub use worker::DispatchJob;

// ---------------------------------------------------------------------------
// AlertTrigger / Alert
// ---------------------------------------------------------------------------

/// What raised an alert: a rule finding or a raw scored threat event.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertTrigger {
    Finding(Finding),
    Threat {
        ip: String,
        threat_type: String,
        confidence: u8,
        observed_at: DateTime<Utc>,
    },
}

impl AlertTrigger {
    pub fn threat(event: &Event) -> Self {
        AlertTrigger::Threat {
            ip: event.source_ip.clone(),
            threat_type: event.category.clone(),
            confidence: event.confidence(),
            observed_at: event.timestamp,
        }
    }

    pub fn alert_type(&self) -> AlertType {
        match self {
            AlertTrigger::Finding(finding) => finding.alert_type,
            AlertTrigger::Threat { .. } => AlertType::Threat,
        }
    }

    /// Suppression identity: findings dedup on (rule, group, bucket), raw
    /// threats dedup on the source address alone.
    pub fn dedup_key(&self) -> String {
        match self {
            AlertTrigger::Finding(finding) => finding.dedup_key(),
            AlertTrigger::Threat { ip, .. } => ip.clone(),
        }
    }

    /// One-line description used in notifications and failure records.
    pub fn summary(&self) -> String {
        match self {
            AlertTrigger::Finding(finding) => format!(
                "{} for {} at {}",
                finding.rule_id,
                finding.key.group,
                finding.key.bucket.to_rfc3339()
            ),
            AlertTrigger::Threat {
                ip,
                threat_type,
                confidence,
                ..
            } => format!("{threat_type} from {ip} (confidence {confidence})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Pending,
    Sent,
    Failed,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Pending => "pending",
            AlertStatus::Sent => "sent",
            AlertStatus::Failed => "failed",
        }
    }
}

/// A scored alert on its way through the notifier.
///
/// Status moves from `Pending` to exactly one of `Sent` or `Failed`.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: Uuid,
    pub trigger: AlertTrigger,
    pub risk_score: u8,
    pub dispatched_at: DateTime<Utc>,
    pub status: AlertStatus,
}

impl Alert {
    pub fn new(trigger: AlertTrigger, risk_score: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger,
            risk_score,
            dispatched_at: Utc::now(),
            status: AlertStatus::Pending,
        }
    }

    fn mark_sent(&mut self) {
        debug_assert_eq!(self.status, AlertStatus::Pending);
        self.status = AlertStatus::Sent;
        self.dispatched_at = Utc::now();
    }

    fn mark_failed(&mut self) {
        debug_assert_eq!(self.status, AlertStatus::Pending);
        self.status = AlertStatus::Failed;
        self.dispatched_at = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// DedupState
// ---------------------------------------------------------------------------

/// Already-alerted keys with their send times.
///
/// Owned by exactly one task. Keys are recorded only after a successful
/// send, so failed alerts stay eligible for retry.
#[derive(Debug, Default)]
pub struct DedupState {
    seen: HashMap<String, DateTime<Utc>>,
    ttl: Option<Duration>,
}

impl DedupState {
    pub fn new(ttl_secs: Option<u64>) -> Self {
        Self {
            seen: HashMap::new(),
            ttl: ttl_secs.map(|s| Duration::seconds(s as i64)),
        }
    }

    /// True when the key has not alerted within the TTL horizon.
    pub fn is_new(&self, key: &str, now: DateTime<Utc>) -> bool {
        match self.seen.get(key) {
            None => true,
            Some(sent_at) => match self.ttl {
                Some(ttl) => now - *sent_at > ttl,
                None => false,
            },
        }
    }

    pub fn mark(&mut self, key: impl Into<String>, now: DateTime<Utc>) {
        self.seen.insert(key.into(), now);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Terminal result of considering one alert candidate.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Delivered; the dedup key is now recorded.
    Dispatched(Alert),
    /// An alert for this key already went out.
    Suppressed,
    /// Raw threat scored below the alerting threshold.
    BelowThreshold,
    /// Delivery failed; recorded in the failure log, key left eligible.
    Failed(Alert),
}

pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
    dedup: DedupState,
    failure_log: FailureLog,
    alert_threshold: u8,
}

impl Dispatcher {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        dedup: DedupState,
        failure_log: FailureLog,
        alert_threshold: u8,
    ) -> Self {
        Self {
            notifier,
            dedup,
            failure_log,
            alert_threshold,
        }
    }

    /// Gate, send, and record one candidate.
    ///
    /// Suppression is checked first so a duplicate never consumes a
    /// notifier call, then the threshold gate for raw threats. Window
    /// findings always pass the gate.
    pub async fn consider(&mut self, trigger: AlertTrigger, score: u8) -> DispatchOutcome {
        let key = trigger.dedup_key();
        let now = Utc::now();

        if !self.dedup.is_new(&key, now) {
            debug!(key = %key, "alert suppressed by dedup");
            return DispatchOutcome::Suppressed;
        }
        if matches!(trigger, AlertTrigger::Threat { .. }) && score < self.alert_threshold {
            debug!(
                key = %key,
                score,
                threshold = self.alert_threshold,
                "threat below alert threshold"
            );
            return DispatchOutcome::BelowThreshold;
        }

        let mut alert = Alert::new(trigger, score);
        match self.notifier.send(&alert).await {
            Ok(()) => {
                alert.mark_sent();
                self.dedup.mark(key, now);
                info!(
                    alert_id = %alert.id,
                    score = alert.risk_score,
                    summary = %alert.trigger.summary(),
                    "alert dispatched"
                );
                DispatchOutcome::Dispatched(alert)
            }
            Err(e) => {
                alert.mark_failed();
                warn!(alert_id = %alert.id, error = %e, "alert dispatch failed");
                let record = FailureRecord::new(alert.trigger.summary(), e.to_string());
                if let Err(log_err) = self.failure_log.append(&record).await {
                    tracing::error!(error = %log_err, "could not persist failure record");
                }
                DispatchOutcome::Failed(alert)
            }
        }
    }

    /// Number of keys currently suppressed.
    pub fn dedup_len(&self) -> usize {
        self.dedup.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::testutil::ScriptedNotifier;
    use super::*;
    use crate::detect::window::WindowKey;

    fn ts(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }

    fn finding_trigger() -> AlertTrigger {
        let key = WindowKey::new("203.0.113.9", ts("2024-03-01T10:00:00Z"));
        AlertTrigger::Finding(Finding::new(
            "high_frequency",
            AlertType::HighFrequency,
            key,
            3,
        ))
    }

    fn threat_trigger(ip: &str, confidence: u8) -> AlertTrigger {
        AlertTrigger::Threat {
            ip: ip.to_string(),
            threat_type: "malware".to_string(),
            confidence,
            observed_at: ts("2024-03-01T10:00:00Z"),
        }
    }

    async fn dispatcher(
        notifier: Arc<ScriptedNotifier>,
        dir: &tempfile::TempDir,
    ) -> Dispatcher {
        let log = FailureLog::open(&dir.path().join("failed.jsonl")).await.unwrap();
        Dispatcher::new(notifier, DedupState::new(None), log, 85)
    }

    #[test]
    fn test_dedup_state_marks_and_suppresses() {
        let mut dedup = DedupState::new(None);
        let now = Utc::now();

        assert!(dedup.is_new("203.0.113.9", now));
        dedup.mark("203.0.113.9", now);
        assert!(!dedup.is_new("203.0.113.9", now));
        assert!(dedup.is_new("198.51.100.7", now));
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn test_dedup_ttl_reopens_expired_keys() {
        let mut dedup = DedupState::new(Some(60));
        let sent_at = ts("2024-03-01T10:00:00Z");

        dedup.mark("203.0.113.9", sent_at);
        assert!(!dedup.is_new("203.0.113.9", ts("2024-03-01T10:00:30Z")));
        assert!(dedup.is_new("203.0.113.9", ts("2024-03-01T10:02:00Z")));
    }

    #[tokio::test]
    async fn test_duplicate_never_reaches_the_notifier() {
        let notifier = ScriptedNotifier::reliable();
        let dir = tempfile::TempDir::new().unwrap();
        let mut dispatcher = dispatcher(notifier.clone(), &dir).await;

        let first = dispatcher.consider(threat_trigger("185.22.33.4", 95), 100).await;
        assert!(matches!(first, DispatchOutcome::Dispatched(_)));

        let second = dispatcher.consider(threat_trigger("185.22.33.4", 95), 100).await;
        assert!(matches!(second, DispatchOutcome::Suppressed));
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_threat_below_threshold_is_gated_but_findings_pass() {
        let notifier = ScriptedNotifier::reliable();
        let dir = tempfile::TempDir::new().unwrap();
        let mut dispatcher = dispatcher(notifier.clone(), &dir).await;

        let gated = dispatcher.consider(threat_trigger("192.168.1.4", 20), 20).await;
        assert!(matches!(gated, DispatchOutcome::BelowThreshold));
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 0);

        let finding = dispatcher.consider(finding_trigger(), 75).await;
        assert!(matches!(finding, DispatchOutcome::Dispatched(_)));
    }

    #[tokio::test]
    async fn test_failed_send_leaves_key_eligible_and_records_failure() {
        let notifier = ScriptedNotifier::failing_first(1);
        let dir = tempfile::TempDir::new().unwrap();
        let mut dispatcher = dispatcher(notifier.clone(), &dir).await;
        let log_path = dir.path().join("failed.jsonl");

        let first = dispatcher.consider(threat_trigger("185.22.33.4", 95), 100).await;
        match first {
            DispatchOutcome::Failed(alert) => assert_eq!(alert.status, AlertStatus::Failed),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(dispatcher.dedup_len(), 0);

        let records = FailureLog::read_all(&log_path).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].alert_summary.contains("185.22.33.4"));
        assert!(records[0].error_reason.contains("scripted failure"));

        // The identical candidate retries and succeeds.
        let second = dispatcher.consider(threat_trigger("185.22.33.4", 95), 100).await;
        match second {
            DispatchOutcome::Dispatched(alert) => assert_eq!(alert.status, AlertStatus::Sent),
            other => panic!("expected success, got {other:?}"),
        }
        assert_eq!(dispatcher.dedup_len(), 1);
    }

    #[test]
    fn test_trigger_dedup_keys() {
        assert_eq!(threat_trigger("185.22.33.4", 95).dedup_key(), "185.22.33.4");
        assert_eq!(
            finding_trigger().dedup_key(),
            "high_frequency|203.0.113.9|2024-03-01T10:00:00+00:00"
        );
    }
}
