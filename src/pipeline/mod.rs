//! Run orchestration: batch scans, streaming watches, and the shared
//! run-level accounting both report.

pub mod batch;
pub mod stream;

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::dispatch::DispatchOutcome;

pub use stream::WatchOptions;

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Aborted,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Aborted => "aborted",
        }
    }
}

/// Shared tallies, updated from the ingest path and the dispatch worker.
#[derive(Debug, Default)]
pub struct RunCounters {
    pub events_ingested: AtomicU64,
    pub rows_dropped: AtomicU64,
    pub findings: AtomicU64,
    pub sent: AtomicU64,
    pub suppressed: AtomicU64,
    pub below_threshold: AtomicU64,
    pub failed: AtomicU64,
}

impl RunCounters {
    pub fn record(&self, outcome: &DispatchOutcome) {
        match outcome {
            DispatchOutcome::Dispatched(_) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
            }
            DispatchOutcome::Suppressed => {
                self.suppressed.fetch_add(1, Ordering::Relaxed);
            }
            DispatchOutcome::BelowThreshold => {
                self.below_threshold.fetch_add(1, Ordering::Relaxed);
            }
            DispatchOutcome::Failed(_) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn summarize(&self, state: RunState) -> RunSummary {
        RunSummary {
            state,
            events_ingested: self.events_ingested.load(Ordering::Relaxed),
            rows_dropped: self.rows_dropped.load(Ordering::Relaxed),
            findings: self.findings.load(Ordering::Relaxed),
            alerts_sent: self.sent.load(Ordering::Relaxed),
            alerts_suppressed: self.suppressed.load(Ordering::Relaxed),
            alerts_below_threshold: self.below_threshold.load(Ordering::Relaxed),
            alerts_failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Everything a run reports when it ends.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub state: RunState,
    pub events_ingested: u64,
    pub rows_dropped: u64,
    pub findings: u64,
    pub alerts_sent: u64,
    pub alerts_suppressed: u64,
    pub alerts_below_threshold: u64,
    pub alerts_failed: u64,
}

impl RunSummary {
    /// True when nothing alert-worthy happened.
    pub fn is_quiet(&self) -> bool {
        self.alerts_sent == 0 && self.alerts_failed == 0
    }
}
