//! Outbound alert delivery through an HTTP mail gateway.
//!
//! The gateway address, sender, and recipient come from configuration or
//! the `ALERTER_URL` / `ALERTER_EMAIL` / `ALERTER_TO` environment
//! variables. The credential is read from `ALERTER_PASSWORD` only; it is
//! never written to configuration files and never logged.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::config::NotifierConfig;
use crate::model::AlertType;

use super::{Alert, AlertTrigger};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notifier not configured: {0}")]
    Unavailable(String),
    #[error("gateway rejected alert: {0}")]
    Failed(String),
    #[error("gateway timed out after {0}s")]
    Timeout(u64),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, alert: &Alert) -> Result<(), NotifyError>;
}

// ---------------------------------------------------------------------------
// Gateway client
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct GatewayMessage<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    body: &'a str,
}

pub struct GatewayNotifier {
    client: reqwest::Client,
    url: String,
    sender: String,
    recipient: String,
    credential: Zeroizing<String>,
    timeout_secs: u64,
}

impl GatewayNotifier {
    pub fn new(
        url: String,
        sender: String,
        recipient: String,
        credential: Zeroizing<String>,
        timeout_secs: u64,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            url,
            sender,
            recipient,
            credential,
            timeout_secs,
        }
    }
}

#[async_trait]
impl Notifier for GatewayNotifier {
    async fn send(&self, alert: &Alert) -> Result<(), NotifyError> {
        let subject = subject_for(alert);
        let body = body_for(alert);
        let message = GatewayMessage {
            from: &self.sender,
            to: &self.recipient,
            subject: &subject,
            body: &body,
        };

        debug!(url = %self.url, subject = %subject, "posting alert to gateway");
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(self.credential.as_str())
            .json(&message)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NotifyError::Timeout(self.timeout_secs)
                } else {
                    NotifyError::Failed(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Failed(format!("gateway returned {status}")));
        }
        Ok(())
    }
}

/// Stand-in used when delivery settings are incomplete. Every send fails
/// with the list of missing settings, so the run still records failures
/// instead of dropping alerts silently.
pub struct UnconfiguredNotifier {
    reason: String,
}

#[async_trait]
impl Notifier for UnconfiguredNotifier {
    async fn send(&self, _alert: &Alert) -> Result<(), NotifyError> {
        Err(NotifyError::Unavailable(self.reason.clone()))
    }
}

/// Build the configured notifier, or an [`UnconfiguredNotifier`] naming
/// whatever is missing. The credential comes from `ALERTER_PASSWORD`.
pub fn from_config(config: &NotifierConfig) -> Arc<dyn Notifier> {
    let mut missing = Vec::new();
    if config.gateway_url.is_none() {
        missing.push("gateway url (ALERTER_URL)");
    }
    if config.sender.is_none() {
        missing.push("sender address (ALERTER_EMAIL)");
    }
    let credential = std::env::var("ALERTER_PASSWORD").ok().map(Zeroizing::new);
    if credential.is_none() {
        missing.push("credential (ALERTER_PASSWORD)");
    }

    if !missing.is_empty() {
        let reason = missing.join(", ");
        warn!(missing = %reason, "alert delivery not configured");
        return Arc::new(UnconfiguredNotifier { reason });
    }

    Arc::new(GatewayNotifier::new(
        config.gateway_url.clone().unwrap_or_default(),
        config.sender.clone().unwrap_or_default(),
        config.recipient.clone(),
        credential.unwrap_or_else(|| Zeroizing::new(String::new())),
        config.timeout_secs,
    ))
}

// ---------------------------------------------------------------------------
// Message rendering
// ---------------------------------------------------------------------------

fn subject_for(alert: &Alert) -> String {
    match &alert.trigger {
        AlertTrigger::Threat {
            ip, threat_type, ..
        } => format!(
            "URGENT: {} detected from {}",
            threat_type.to_uppercase(),
            ip
        ),
        AlertTrigger::Finding(finding) => {
            let label = match finding.alert_type {
                AlertType::HighFrequency => "High-frequency access",
                AlertType::ImpossibleTravel => "Impossible travel",
                AlertType::Threat => "Threat",
            };
            format!("SECURITY ALERT: {} for {}", label, finding.key.group)
        }
    }
}

fn body_for(alert: &Alert) -> String {
    let mut lines = vec![
        format!("Alert: {}", alert.trigger.summary()),
        format!("Risk score: {}", alert.risk_score),
        format!("Raised at: {}", alert.dispatched_at.to_rfc3339()),
    ];
    match &alert.trigger {
        AlertTrigger::Threat { observed_at, .. } => {
            lines.push(format!("Observed at: {}", observed_at.to_rfc3339()));
        }
        AlertTrigger::Finding(finding) => {
            let mut evidence: Vec<_> = finding.evidence.iter().collect();
            evidence.sort_by(|a, b| a.0.cmp(b.0));
            for (k, v) in evidence {
                lines.push(format!("  {k}: {v}"));
            }
        }
    }
    lines.join("\n")
}
