//! Burst detection: many events from one source address within an hour.

use crate::detect::window::{Granularity, WindowKey};
use crate::detect::Finding;
use crate::model::{AlertType, Event};

use super::{DetectionRule, RuleKind};

pub struct HighFrequencyRule {
    threshold: u64,
}

impl HighFrequencyRule {
    pub fn new(threshold: u64) -> Self {
        Self { threshold }
    }
}

impl DetectionRule for HighFrequencyRule {
    fn id(&self) -> &'static str {
        "high_frequency"
    }

    fn alert_type(&self) -> AlertType {
        AlertType::HighFrequency
    }

    fn granularity(&self) -> Granularity {
        Granularity::Hour
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Count
    }

    fn derive_key(&self, event: &Event) -> Option<WindowKey> {
        if event.source_ip.is_empty() {
            return None;
        }
        Some(WindowKey::new(
            event.source_ip.clone(),
            self.granularity().bucket_of(event.timestamp),
        ))
    }

    fn threshold(&self) -> u64 {
        self.threshold
    }

    fn emit(&self, key: &WindowKey, metric: u64) -> Finding {
        Finding::new(self.id(), self.alert_type(), key.clone(), metric)
            .with_evidence("ip_address", key.group.clone())
            .with_evidence("hour", key.bucket.to_rfc3339())
            .with_evidence("count", metric.to_string())
    }
}
