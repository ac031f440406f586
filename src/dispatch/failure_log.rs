//! Append-only JSONL record of alerts that could not be delivered.
//!
//! One JSON object per line. The file survives process restarts, so an
//! operator can replay or inspect failed alerts after the run.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub timestamp: DateTime<Utc>,
    pub alert_summary: String,
    pub error_reason: String,
}

impl FailureRecord {
    pub fn new(alert_summary: impl Into<String>, error_reason: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            alert_summary: alert_summary.into(),
            error_reason: error_reason.into(),
        }
    }
}

pub struct FailureLog {
    path: PathBuf,
    writer: Mutex<File>,
}

impl FailureLog {
    /// Open (or create) the log in append mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("opening failure log {}", path.display()))?;
        debug!(path = %path.display(), "failure log open");
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(file),
        })
    }

    /// Append one record and flush so the line survives a crash.
    pub async fn append(&self, record: &FailureRecord) -> Result<()> {
        let mut line = serde_json::to_string(record).context("serializing failure record")?;
        line.push('\n');
        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("writing {}", self.path.display()))?;
        writer.flush().await.context("flushing failure log")?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every parseable record. A missing file reads as empty;
    /// unparseable lines are skipped.
    pub fn read_all(path: &Path) -> Result<Vec<FailureRecord>> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        Ok(raw
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}
