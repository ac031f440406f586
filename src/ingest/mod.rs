//! Event sources feeding the pipeline.

pub mod csv_file;
pub mod synthetic;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::Event;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("cannot open event source {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: csv::Error,
    },
    #[error("event source {path} is missing required columns: {missing}")]
    MissingColumns { path: String, missing: String },
    #[error("failed reading event source {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: csv::Error,
    },
}

/// A pull-based source of events.
///
/// `next_event` returns `Ok(None)` once the source is exhausted. Errors are
/// fatal for the run; recoverable per-row problems are handled inside the
/// source, which drops the row and counts it.
#[async_trait]
pub trait EventSource: Send {
    async fn next_event(&mut self) -> Result<Option<Event>, IngestError>;

    /// Rows skipped so far due to per-row parse failures.
    fn rows_dropped(&self) -> u64 {
        0
    }
}
