//! Core event vocabulary shared across the pipeline.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single security event flowing through the pipeline.
///
/// Two flavors exist in practice: login events carry a `subject_id` and a
/// `country` attribute, IOC threat events carry a threat `category` and a
/// `confidence` attribute. The attribute map keeps both flavors in one shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub source_ip: String,
    pub subject_id: Option<String>,
    pub category: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl Event {
    pub fn new(
        timestamp: DateTime<Utc>,
        source_ip: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            source_ip: source_ip.into(),
            subject_id: None,
            category: category.into(),
            attributes: HashMap::new(),
        }
    }

    /// Builder-style setter for `subject_id`.
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject_id = Some(subject.into());
        self
    }

    /// Builder-style setter for a single attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Country attribute, when the event carries a non-empty one.
    pub fn country(&self) -> Option<&str> {
        self.attributes
            .get("country")
            .map(String::as_str)
            .filter(|c| !c.is_empty())
    }

    /// Confidence attribute clamped to 0..=100. Absent or unparseable
    /// values read as zero.
    pub fn confidence(&self) -> u8 {
        self.attributes
            .get("confidence")
            .and_then(|v| v.trim().parse::<i64>().ok())
            .map(|v| v.clamp(0, 100) as u8)
            .unwrap_or(0)
    }

    /// Whether the event reports a parseable confidence at all.
    pub fn has_confidence(&self) -> bool {
        self.attributes
            .get("confidence")
            .map(|v| v.trim().parse::<i64>().is_ok())
            .unwrap_or(false)
    }
}

/// Kinds of alert the pipeline can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    HighFrequency,
    ImpossibleTravel,
    Threat,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::HighFrequency => "high_frequency",
            AlertType::ImpossibleTravel => "impossible_travel",
            AlertType::Threat => "threat",
        }
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T10:15:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_builder_sets_subject_and_attributes() {
        let event = Event::new(ts(), "203.0.113.9", "login")
            .with_subject("alice")
            .with_attribute("country", "US");

        assert_eq!(event.subject_id.as_deref(), Some("alice"));
        assert_eq!(event.country(), Some("US"));
        assert_eq!(event.source_ip, "203.0.113.9");
    }

    #[test]
    fn test_empty_country_reads_as_absent() {
        let event = Event::new(ts(), "203.0.113.9", "login").with_attribute("country", "");
        assert_eq!(event.country(), None);
    }

    #[test]
    fn test_confidence_parsing_and_clamping() {
        let event = Event::new(ts(), "185.22.33.4", "malware").with_attribute("confidence", "92");
        assert_eq!(event.confidence(), 92);
        assert!(event.has_confidence());

        let overflow = Event::new(ts(), "185.22.33.4", "malware").with_attribute("confidence", "250");
        assert_eq!(overflow.confidence(), 100);

        let garbage = Event::new(ts(), "185.22.33.4", "malware").with_attribute("confidence", "high");
        assert_eq!(garbage.confidence(), 0);
        assert!(!garbage.has_confidence());

        let absent = Event::new(ts(), "185.22.33.4", "malware");
        assert_eq!(absent.confidence(), 0);
        assert!(!absent.has_confidence());
    }

    #[test]
    fn test_alert_type_strings() {
        assert_eq!(AlertType::HighFrequency.as_str(), "high_frequency");
        assert_eq!(AlertType::ImpossibleTravel.as_str(), "impossible_travel");
        assert_eq!(AlertType::Threat.to_string(), "threat");
    }
}
