//! Detection engine: the aggregator, the rule set, and per-run emission
//! tracking.

use std::collections::HashSet;

use tracing::debug;

use crate::detect::rules::DetectionRule;
use crate::detect::window::{TouchedWindow, WindowAggregator, WindowKey};
use crate::detect::Finding;
use crate::model::Event;

pub struct DetectionEngine {
    rules: Vec<Box<dyn DetectionRule>>,
    aggregator: WindowAggregator,
    /// Windows already reported this run; re-evaluation never duplicates.
    emitted: HashSet<(usize, WindowKey)>,
}

impl DetectionEngine {
    pub fn new(rules: Vec<Box<dyn DetectionRule>>, max_buckets: Option<usize>) -> Self {
        let aggregator = WindowAggregator::new(rules.len(), max_buckets);
        Self {
            rules,
            aggregator,
            emitted: HashSet::new(),
        }
    }

    /// Feed one event through every rule's window.
    pub fn ingest(&mut self, event: &Event) -> Vec<TouchedWindow> {
        self.aggregator.ingest(&self.rules, event)
    }

    /// Evaluate only the windows an ingest just touched (streaming path).
    pub fn evaluate_touched(&mut self, touched: &[TouchedWindow]) -> Vec<Finding> {
        let mut findings = Vec::new();
        for t in touched {
            if let Some(finding) = self.evaluate_window(t.rule_index, &t.key) {
                findings.push(finding);
            }
        }
        findings
    }

    /// Evaluate every live window (batch path).
    pub fn evaluate_all(&mut self) -> Vec<Finding> {
        let mut findings = Vec::new();
        for rule_index in 0..self.rules.len() {
            let keys: Vec<WindowKey> = self
                .aggregator
                .windows_for(rule_index)
                .map(|(key, _)| key.clone())
                .collect();
            for key in keys {
                if let Some(finding) = self.evaluate_window(rule_index, &key) {
                    findings.push(finding);
                }
            }
        }
        findings
    }

    fn evaluate_window(&mut self, rule_index: usize, key: &WindowKey) -> Option<Finding> {
        let rule = self.rules.get(rule_index)?;
        let metric = self.aggregator.state(rule_index, key)?.metric();
        if metric < rule.threshold() {
            return None;
        }
        if !self.emitted.insert((rule_index, key.clone())) {
            return None;
        }
        debug!(
            rule = rule.id(),
            group = %key.group,
            bucket = %key.bucket,
            metric,
            "rule fired"
        );
        Some(rule.emit(key, metric))
    }
}
