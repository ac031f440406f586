//! Geographic dispersion: one subject seen from multiple countries within a
//! single day.

use crate::detect::window::{Granularity, WindowKey};
use crate::detect::Finding;
use crate::model::{AlertType, Event};

use super::{DetectionRule, RuleKind};

pub struct ImpossibleTravelRule {
    threshold: u64,
}

impl ImpossibleTravelRule {
    pub fn new(threshold: u64) -> Self {
        Self { threshold }
    }
}

impl DetectionRule for ImpossibleTravelRule {
    fn id(&self) -> &'static str {
        "impossible_travel"
    }

    fn alert_type(&self) -> AlertType {
        AlertType::ImpossibleTravel
    }

    fn granularity(&self) -> Granularity {
        Granularity::Day
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Distinct
    }

    fn derive_key(&self, event: &Event) -> Option<WindowKey> {
        let subject = event.subject_id.as_deref()?;
        if subject.is_empty() {
            return None;
        }
        Some(WindowKey::new(
            subject,
            self.granularity().bucket_of(event.timestamp),
        ))
    }

    fn distinct_value(&self, event: &Event) -> Option<String> {
        event.country().map(str::to_owned)
    }

    fn threshold(&self) -> u64 {
        self.threshold
    }

    fn emit(&self, key: &WindowKey, metric: u64) -> Finding {
        Finding::new(self.id(), self.alert_type(), key.clone(), metric)
            .with_evidence("user_id", key.group.clone())
            .with_evidence("date", key.bucket.date_naive().to_string())
            .with_evidence("countries", metric.to_string())
    }
}
