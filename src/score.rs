//! Risk scoring.
//!
//! Pure functions of the trigger and configuration, no clock and no I/O, so
//! identical inputs always produce identical scores.

use std::collections::HashMap;

use crate::config::{RulesConfig, ScoringConfig};
use crate::detect::Finding;
use crate::model::{AlertType, Event};

const MAX_SCORE: u8 = 100;
/// Score of a window finding whose metric exactly meets its threshold.
const FINDING_BASE: u16 = 75;
/// Added per unit of metric above the threshold.
const FINDING_STEP: u64 = 5;

pub struct RiskScorer {
    category_bonus: HashMap<String, u8>,
    high_frequency_threshold: u64,
    impossible_travel_threshold: u64,
}

impl RiskScorer {
    pub fn new(scoring: &ScoringConfig, rules: &RulesConfig) -> Self {
        Self {
            category_bonus: scoring.category_bonus.clone(),
            high_frequency_threshold: rules.high_frequency_threshold,
            impossible_travel_threshold: rules.impossible_travel_threshold,
        }
    }

    /// Threat score: reported confidence plus the category bonus, capped.
    pub fn score_event(&self, event: &Event) -> u8 {
        let bonus = self
            .category_bonus
            .get(event.category.as_str())
            .copied()
            .unwrap_or(0);
        saturate(event.confidence() as u16 + bonus as u16)
    }

    /// Finding score: anchored at the rule threshold, rising with overshoot.
    pub fn score_finding(&self, finding: &Finding) -> u8 {
        let threshold = match finding.alert_type {
            AlertType::HighFrequency => self.high_frequency_threshold,
            AlertType::ImpossibleTravel => self.impossible_travel_threshold,
            AlertType::Threat => 0,
        };
        let overshoot = finding.metric.saturating_sub(threshold);
        let ramp = (overshoot * FINDING_STEP).min(u64::from(MAX_SCORE)) as u16;
        saturate(FINDING_BASE + ramp)
    }
}

fn saturate(raw: u16) -> u8 {
    raw.min(MAX_SCORE as u16) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::window::WindowKey;
    use chrono::{DateTime, Utc};

    fn scorer() -> RiskScorer {
        RiskScorer::new(&ScoringConfig::default(), &RulesConfig::default())
    }

    fn ts(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }

    fn threat(category: &str, confidence: &str) -> Event {
        Event::new(ts("2024-03-01T10:00:00Z"), "185.22.33.4", category)
            .with_attribute("confidence", confidence)
    }

    fn finding(alert_type: AlertType, metric: u64) -> Finding {
        let rule_id = alert_type.as_str();
        let key = WindowKey::new("203.0.113.9", ts("2024-03-01T10:00:00Z"));
        Finding::new(rule_id, alert_type, key, metric)
    }

    #[test]
    fn test_event_score_saturates_at_100() {
        assert_eq!(scorer().score_event(&threat("malware", "90")), 100);
    }

    #[test]
    fn test_unknown_category_gets_no_bonus() {
        assert_eq!(scorer().score_event(&threat("normal", "50")), 50);
        assert_eq!(scorer().score_event(&threat("brute_force", "80")), 80);
    }

    #[test]
    fn test_known_categories_add_their_bonus() {
        assert_eq!(scorer().score_event(&threat("phishing", "60")), 75);
        assert_eq!(scorer().score_event(&threat("malware", "40")), 70);
    }

    #[test]
    fn test_event_score_is_deterministic() {
        let event = threat("malware", "72");
        let s = scorer();
        assert_eq!(s.score_event(&event), s.score_event(&event));
    }

    #[test]
    fn test_finding_score_anchored_at_threshold() {
        let s = scorer();
        assert_eq!(s.score_finding(&finding(AlertType::HighFrequency, 3)), 75);
        assert_eq!(s.score_finding(&finding(AlertType::HighFrequency, 5)), 85);
        assert_eq!(s.score_finding(&finding(AlertType::ImpossibleTravel, 2)), 75);
        assert_eq!(s.score_finding(&finding(AlertType::ImpossibleTravel, 4)), 85);
    }

    #[test]
    fn test_finding_score_caps_at_100() {
        let s = scorer();
        assert_eq!(s.score_finding(&finding(AlertType::HighFrequency, 60)), 100);
    }
}
