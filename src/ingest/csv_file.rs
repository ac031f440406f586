//! CSV file event source.
//!
//! The flavor is decided by the header row: files carrying a `threat_type`
//! column are IOC feeds, anything else is a login activity export. Missing
//! required columns fail the run before any event is produced. A row whose
//! timestamp cannot be parsed (or whose address cell is empty) is dropped
//! and counted, and ingestion continues.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use csv::StringRecord;
use tracing::{debug, info};

use crate::model::Event;

use super::{EventSource, IngestError};

/// Timestamp shapes accepted from exporters.
const TIMESTAMP_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsvFlavor {
    Login,
    Ioc,
}

impl CsvFlavor {
    pub fn as_str(&self) -> &'static str {
        match self {
            CsvFlavor::Login => "login",
            CsvFlavor::Ioc => "ioc",
        }
    }
}

/// Header positions resolved at open time.
struct ColumnMap {
    timestamp: usize,
    ip: usize,
    user: Option<usize>,
    country: Option<usize>,
    threat_type: Option<usize>,
    confidence: Option<usize>,
}

pub struct CsvFileSource {
    path: String,
    flavor: CsvFlavor,
    columns: ColumnMap,
    records: csv::StringRecordsIntoIter<std::fs::File>,
    rows_read: u64,
    rows_dropped: u64,
}

impl std::fmt::Debug for CsvFileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvFileSource")
            .field("path", &self.path)
            .field("flavor", &self.flavor)
            .field("rows_read", &self.rows_read)
            .field("rows_dropped", &self.rows_dropped)
            .finish_non_exhaustive()
    }
}

impl CsvFileSource {
    /// Open a CSV file, detect its flavor, and validate the header.
    pub fn open(path: &Path) -> Result<Self, IngestError> {
        let display_path = path.display().to_string();
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| IngestError::Open {
                path: display_path.clone(),
                source: e,
            })?;

        let headers = reader
            .headers()
            .map_err(|e| IngestError::Read {
                path: display_path.clone(),
                source: e,
            })?
            .clone();
        let find = |names: &[&str]| {
            headers
                .iter()
                .position(|h| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
        };

        let timestamp = find(&["timestamp"]);
        let threat_type = find(&["threat_type"]);
        let mut missing: Vec<&str> = Vec::new();
        if timestamp.is_none() {
            missing.push("timestamp");
        }

        let (flavor, ip, user, country, confidence) = if threat_type.is_some() {
            let ip = find(&["ip", "ip_address", "source_ip"]);
            let confidence = find(&["confidence"]);
            if ip.is_none() {
                missing.push("ip");
            }
            if confidence.is_none() {
                missing.push("confidence");
            }
            (CsvFlavor::Ioc, ip, None, None, confidence)
        } else {
            let ip = find(&["ip_address", "source_ip", "ip"]);
            let user = find(&["user_id", "subject_id"]);
            let country = find(&["country"]);
            if ip.is_none() {
                missing.push("ip_address");
            }
            if user.is_none() {
                missing.push("user_id");
            }
            if country.is_none() {
                missing.push("country");
            }
            (CsvFlavor::Login, ip, user, country, None)
        };

        if !missing.is_empty() {
            return Err(IngestError::MissingColumns {
                path: display_path,
                missing: missing.join(", "),
            });
        }

        info!(path = %display_path, flavor = flavor.as_str(), "opened event source");

        Ok(Self {
            path: display_path,
            flavor,
            columns: ColumnMap {
                timestamp: timestamp.unwrap_or_default(),
                ip: ip.unwrap_or_default(),
                user,
                country,
                threat_type,
                confidence,
            },
            records: reader.into_records(),
            rows_read: 0,
            rows_dropped: 0,
        })
    }

    pub fn flavor(&self) -> CsvFlavor {
        self.flavor
    }

    fn event_from_record(&self, record: &StringRecord) -> Option<Event> {
        let timestamp = parse_timestamp(record.get(self.columns.timestamp)?)?;
        let ip = record.get(self.columns.ip).unwrap_or("");
        if ip.is_empty() {
            return None;
        }

        match self.flavor {
            CsvFlavor::Login => {
                let mut event = Event::new(timestamp, ip, "login");
                if let Some(i) = self.columns.user {
                    if let Some(user) = record.get(i).filter(|u| !u.is_empty()) {
                        event = event.with_subject(user);
                    }
                }
                if let Some(i) = self.columns.country {
                    if let Some(country) = record.get(i).filter(|c| !c.is_empty()) {
                        event = event.with_attribute("country", country);
                    }
                }
                Some(event)
            }
            CsvFlavor::Ioc => {
                let category = self
                    .columns
                    .threat_type
                    .and_then(|i| record.get(i))
                    .filter(|t| !t.is_empty())
                    .unwrap_or("unknown");
                let mut event = Event::new(timestamp, ip, category);
                if let Some(i) = self.columns.confidence {
                    if let Some(confidence) = record.get(i).filter(|c| !c.is_empty()) {
                        event = event.with_attribute("confidence", confidence);
                    }
                }
                Some(event)
            }
        }
    }
}

#[async_trait]
impl EventSource for CsvFileSource {
    async fn next_event(&mut self) -> Result<Option<Event>, IngestError> {
        while let Some(next) = self.records.next() {
            let record = match next {
                Ok(record) => record,
                // An unreadable file is fatal; a malformed row is not.
                Err(e) if matches!(e.kind(), csv::ErrorKind::Io(_)) => {
                    return Err(IngestError::Read {
                        path: self.path.clone(),
                        source: e,
                    });
                }
                Err(e) => {
                    self.rows_dropped += 1;
                    debug!(path = %self.path, error = %e, "dropped malformed row");
                    continue;
                }
            };

            self.rows_read += 1;
            match self.event_from_record(&record) {
                Some(event) => return Ok(Some(event)),
                None => {
                    self.rows_dropped += 1;
                    debug!(path = %self.path, row = self.rows_read, "dropped unparseable row");
                }
            }
        }
        Ok(None)
    }

    fn rows_dropped(&self) -> u64 {
        self.rows_dropped
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in TIMESTAMP_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    None
}
