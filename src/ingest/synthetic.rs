//! Synthetic IOC feed for watch-mode demos and soak runs.
//!
//! Mirrors the live feed's shape: mostly internal addresses with a 30%
//! chance of a known-bad external range, a threat type drawn from a fixed
//! set, and a uniform confidence in 5..=99.

use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::model::Event;

use super::{EventSource, IngestError};

const THREAT_TYPES: [&str; 4] = ["malware", "brute_force", "phishing", "normal"];

pub struct SyntheticSource {
    rng: StdRng,
}

impl SyntheticSource {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic source for tests.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn next_ip(&mut self) -> String {
        if self.rng.gen_bool(0.3) {
            format!("185.22.33.{}", self.rng.gen_range(1..=255))
        } else {
            format!("192.168.1.{}", self.rng.gen_range(1..=255))
        }
    }
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSource for SyntheticSource {
    async fn next_event(&mut self) -> Result<Option<Event>, IngestError> {
        let category = THREAT_TYPES.choose(&mut self.rng).copied().unwrap_or("normal");
        let confidence: u8 = self.rng.gen_range(5..=99);
        let event = Event::new(Utc::now(), self.next_ip(), category)
            .with_attribute("confidence", confidence.to_string());
        Ok(Some(event))
    }
}
