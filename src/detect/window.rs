//! Time-bucketed window aggregation.
//!
//! One window map per registered rule, keyed by `(group, bucket)`. States
//! update incrementally per event. Streaming runs cap the number of live
//! buckets per rule and evict anything older than the horizon.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::detect::rules::{DetectionRule, RuleKind};
use crate::model::Event;

// ---------------------------------------------------------------------------
// Granularity
// ---------------------------------------------------------------------------

/// Bucket width for a rule's windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Hour,
    Day,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Hour => "hour",
            Granularity::Day => "day",
        }
    }

    pub fn width(&self) -> Duration {
        match self {
            Granularity::Hour => Duration::hours(1),
            Granularity::Day => Duration::days(1),
        }
    }

    /// Truncate a timestamp to the start of its bucket.
    pub fn bucket_of(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let hour = match self {
            Granularity::Hour => ts.hour(),
            Granularity::Day => 0,
        };
        ts.date_naive()
            .and_hms_opt(hour, 0, 0)
            .map(|naive| Utc.from_utc_datetime(&naive))
            .unwrap_or(ts)
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// WindowKey / WindowState
// ---------------------------------------------------------------------------

/// Identity of one window: the grouped entity plus its time bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowKey {
    pub group: String,
    pub bucket: DateTime<Utc>,
}

impl WindowKey {
    pub fn new(group: impl Into<String>, bucket: DateTime<Utc>) -> Self {
        Self {
            group: group.into(),
            bucket,
        }
    }
}

/// Accumulated state of one window.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowState {
    /// Plain occurrence count.
    Count(u64),
    /// Distinct values observed; the metric is the cardinality.
    Distinct(HashSet<String>),
}

impl WindowState {
    fn empty(kind: RuleKind) -> Self {
        match kind {
            RuleKind::Count => WindowState::Count(0),
            RuleKind::Distinct => WindowState::Distinct(HashSet::new()),
        }
    }

    /// The number rules compare against their threshold.
    pub fn metric(&self) -> u64 {
        match self {
            WindowState::Count(n) => *n,
            WindowState::Distinct(values) => values.len() as u64,
        }
    }
}

// ---------------------------------------------------------------------------
// WindowAggregator
// ---------------------------------------------------------------------------

/// A (rule, window) pair an ingest just updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TouchedWindow {
    pub rule_index: usize,
    pub key: WindowKey,
}

/// Incremental per-rule window maps.
pub struct WindowAggregator {
    windows: Vec<HashMap<WindowKey, WindowState>>,
    newest_bucket: Vec<Option<DateTime<Utc>>>,
    max_buckets: Option<usize>,
}

impl WindowAggregator {
    /// `max_buckets` of `None` keeps every bucket (batch runs).
    pub fn new(rule_count: usize, max_buckets: Option<usize>) -> Self {
        Self {
            windows: (0..rule_count).map(|_| HashMap::new()).collect(),
            newest_bucket: vec![None; rule_count],
            max_buckets,
        }
    }

    /// Apply one event to every rule it matches and report the windows it
    /// touched, so callers can evaluate incrementally.
    pub fn ingest(
        &mut self,
        rules: &[Box<dyn DetectionRule>],
        event: &Event,
    ) -> Vec<TouchedWindow> {
        debug_assert_eq!(rules.len(), self.windows.len());
        let mut touched = Vec::new();

        for (rule_index, rule) in rules.iter().enumerate() {
            let Some(key) = rule.derive_key(event) else {
                continue;
            };
            // Distinct rules also need the contributing value.
            let distinct = match rule.kind() {
                RuleKind::Count => None,
                RuleKind::Distinct => match rule.distinct_value(event) {
                    Some(value) => Some(value),
                    None => continue,
                },
            };

            let state = self.windows[rule_index]
                .entry(key.clone())
                .or_insert_with(|| WindowState::empty(rule.kind()));
            match (state, distinct) {
                (WindowState::Count(n), _) => *n += 1,
                (WindowState::Distinct(values), Some(value)) => {
                    values.insert(value);
                }
                (WindowState::Distinct(_), None) => {}
            }

            if self.newest_bucket[rule_index].map_or(true, |newest| key.bucket > newest) {
                self.newest_bucket[rule_index] = Some(key.bucket);
            }

            touched.push(TouchedWindow { rule_index, key });

            if let Some(max) = self.max_buckets {
                self.evict_stale(rule_index, rule.granularity(), max);
            }
        }

        touched
    }

    /// State of one window, if it is live.
    pub fn state(&self, rule_index: usize, key: &WindowKey) -> Option<&WindowState> {
        self.windows.get(rule_index).and_then(|map| map.get(key))
    }

    /// Iterate every live window of one rule.
    pub fn windows_for(
        &self,
        rule_index: usize,
    ) -> impl Iterator<Item = (&WindowKey, &WindowState)> {
        self.windows.get(rule_index).into_iter().flat_map(|m| m.iter())
    }

    /// Number of live windows for one rule.
    pub fn window_count(&self, rule_index: usize) -> usize {
        self.windows.get(rule_index).map(|m| m.len()).unwrap_or(0)
    }

    fn evict_stale(&mut self, rule_index: usize, granularity: Granularity, max: usize) {
        let Some(newest) = self.newest_bucket[rule_index] else {
            return;
        };
        let cutoff = newest - granularity.width() * (max.saturating_sub(1) as i32);
        let before = self.windows[rule_index].len();
        self.windows[rule_index].retain(|key, _| key.bucket >= cutoff);
        let evicted = before - self.windows[rule_index].len();
        if evicted > 0 {
            debug!(rule_index, evicted, cutoff = %cutoff, "evicted stale windows");
        }
    }
}
