//! Anomaly detection: windows, rules, and the evaluation engine.

pub mod engine;
pub mod rules;
pub mod window;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::AlertType;
use window::WindowKey;

/// A rule whose window crossed its threshold.
#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub rule_id: String,
    pub alert_type: AlertType,
    pub key: WindowKey,
    pub metric: u64,
    pub evidence: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl Finding {
    pub fn new(
        rule_id: impl Into<String>,
        alert_type: AlertType,
        key: WindowKey,
        metric: u64,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            alert_type,
            key,
            metric,
            evidence: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Builder-style setter for one evidence field.
    pub fn with_evidence(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.evidence.insert(field.into(), value.into());
        self
    }

    /// Suppression identity: the same rule firing on the same window always
    /// maps to the same key.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.rule_id,
            self.key.group,
            self.key.bucket.to_rfc3339()
        )
    }
}
