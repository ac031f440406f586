//! Pluggable detection rules.

pub mod high_frequency;
pub mod impossible_travel;

pub use high_frequency::HighFrequencyRule;
pub use impossible_travel::ImpossibleTravelRule;

use crate::config::RulesConfig;
use crate::detect::window::{Granularity, WindowKey};
use crate::detect::Finding;
use crate::model::{AlertType, Event};

/// How a rule accumulates window state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    /// Count every matching event.
    Count,
    /// Collect one distinct value per matching event; the metric is the
    /// number of distinct values.
    Distinct,
}

/// A detection rule over time-bucketed windows.
///
/// Rules never see the whole stream: they derive a window key per event,
/// the aggregator maintains the state, and `emit` turns a window whose
/// metric reached the threshold into a finding.
pub trait DetectionRule: Send + Sync {
    fn id(&self) -> &'static str;
    fn alert_type(&self) -> AlertType;
    fn granularity(&self) -> Granularity;
    fn kind(&self) -> RuleKind;

    /// Window key for this event, or `None` when the rule does not apply.
    fn derive_key(&self, event: &Event) -> Option<WindowKey>;

    /// The value a distinct-kind rule accumulates for this event.
    fn distinct_value(&self, _event: &Event) -> Option<String> {
        None
    }

    /// Metric at or above which the rule fires.
    fn threshold(&self) -> u64;

    /// Build the finding for a fired window.
    fn emit(&self, key: &WindowKey, metric: u64) -> Finding;
}

/// The built-in rule set, thresholds taken from config.
pub fn default_rules(cfg: &RulesConfig) -> Vec<Box<dyn DetectionRule>> {
    vec![
        Box::new(HighFrequencyRule::new(cfg.high_frequency_threshold)),
        Box::new(ImpossibleTravelRule::new(cfg.impossible_travel_threshold)),
    ]
}
