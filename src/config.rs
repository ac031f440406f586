//! Layered TOML configuration with environment overrides.
//!
//! Precedence, lowest to highest: compiled-in defaults, an optional TOML
//! file (explicit `--config` path, else the `AUTHSENTRY_CONFIG` variable,
//! else `./authsentry.toml`), then environment variables for the notifier
//! settings. The notifier credential is never part of the file; it is read
//! from `ALERTER_PASSWORD` at notifier construction time.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub rules: RulesConfig,
    pub scoring: ScoringConfig,
    pub dispatch: DispatchConfig,
    pub notifier: NotifierConfig,
    pub stream: StreamConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            rules: RulesConfig::default(),
            scoring: ScoringConfig::default(),
            dispatch: DispatchConfig::default(),
            notifier: NotifierConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve the effective configuration.
    ///
    /// An explicit path must load, otherwise the error propagates. The
    /// `AUTHSENTRY_CONFIG` variable and the local `authsentry.toml` fall
    /// back to defaults with a warning if unreadable. Environment
    /// overrides are applied last in every case.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = explicit {
            Self::load(path)?
        } else if let Ok(env_path) = std::env::var("AUTHSENTRY_CONFIG") {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "AUTHSENTRY_CONFIG set but file could not be loaded, using defaults"
                    );
                    Self::default()
                }
            }
        } else {
            let local = Path::new("authsentry.toml");
            if local.exists() {
                match Self::load(local) {
                    Ok(cfg) => cfg,
                    Err(e) => {
                        warn!(error = %e, "local config file could not be loaded, using defaults");
                        Self::default()
                    }
                }
            } else {
                debug!("no config file found, using compiled-in defaults");
                Self::default()
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Overlay notifier settings from the environment.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(sender) = std::env::var("ALERTER_EMAIL") {
            self.notifier.sender = Some(sender);
        }
        if let Ok(recipient) = std::env::var("ALERTER_TO") {
            self.notifier.recipient = recipient;
        }
        if let Ok(url) = std::env::var("ALERTER_URL") {
            self.notifier.gateway_url = Some(url);
        }
        if let Ok(raw) = std::env::var("ALERT_THRESHOLD") {
            match parse_threshold(&raw) {
                Some(threshold) => self.dispatch.alert_threshold = threshold,
                None => warn!(
                    value = %raw,
                    default = self.dispatch.alert_threshold,
                    "invalid ALERT_THRESHOLD, keeping default"
                ),
            }
        }
    }
}

/// Parse a threshold override; values outside 0..=100 are rejected.
fn parse_threshold(raw: &str) -> Option<u8> {
    raw.trim().parse::<u8>().ok().filter(|t| *t <= 100)
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Paths for the alert database and the dispatch failure log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: PathBuf,
    pub failure_log_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/authsentry.db"),
            failure_log_path: PathBuf::from("data/failed_alerts.jsonl"),
        }
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Thresholds for the built-in detection rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Events from one source address within an hour before the burst
    /// rule fires.
    pub high_frequency_threshold: u64,
    /// Distinct countries for one subject within a day before the travel
    /// rule fires.
    pub impossible_travel_threshold: u64,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            high_frequency_threshold: 3,
            impossible_travel_threshold: 2,
        }
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Risk score weighting per threat category.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Bonus added to the reported confidence, keyed by category. Unknown
    /// categories add nothing.
    pub category_bonus: HashMap<String, u8>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let mut category_bonus = HashMap::new();
        category_bonus.insert("malware".to_string(), 30);
        category_bonus.insert("phishing".to_string(), 15);
        Self { category_bonus }
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Dedup and alerting gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Minimum risk score for raw threat alerts. Window findings bypass
    /// this gate.
    pub alert_threshold: u8,
    /// Seconds before a suppressed key becomes alertable again. `None`
    /// suppresses for the lifetime of the run.
    pub dedup_ttl_secs: Option<u64>,
    /// Depth of the streaming dispatch queue.
    pub queue_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            alert_threshold: 85,
            dedup_ttl_secs: None,
            queue_capacity: 64,
        }
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// Mail-gateway notifier settings. The credential is deliberately absent;
/// it comes from `ALERTER_PASSWORD` only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// HTTP endpoint of the mail gateway.
    pub gateway_url: Option<String>,
    /// Sender address (`ALERTER_EMAIL` overrides).
    pub sender: Option<String>,
    /// Recipient address (`ALERTER_TO` overrides).
    pub recipient: String,
    /// Per-request delivery timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            gateway_url: None,
            sender: None,
            recipient: "boss@company.com".to_string(),
            timeout_secs: 20,
        }
    }
}

// ---------------------------------------------------------------------------
// Stream
// ---------------------------------------------------------------------------

/// Watch-loop cadence and retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Milliseconds between ingestion ticks.
    pub tick_ms: u64,
    /// Live window buckets kept per rule; older buckets are evicted.
    pub max_buckets_per_rule: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1500,
            max_buckets_per_rule: 48,
        }
    }
}
