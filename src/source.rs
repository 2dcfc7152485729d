use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::pollutant::{PollutantLevels, PollutantTable};

/// Recent readings for one pollutant, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadingSeries {
    #[serde(default)]
    pub values: Vec<f64>,
    #[serde(default)]
    pub times: Vec<DateTime<FixedOffset>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl ReadingSeries {
    pub fn latest(&self) -> Option<f64> {
        self.values
            .last()
            .copied()
            .filter(|value| value.is_finite() && *value >= 0.0)
    }

    pub fn latest_time(&self) -> Option<DateTime<FixedOffset>> {
        self.times.last().copied()
    }
}

pub type PollutantReadings = PollutantTable<ReadingSeries>;

impl Default for PollutantReadings {
    fn default() -> Self {
        PollutantTable::from_fn(|_| ReadingSeries::default())
    }
}

impl PollutantReadings {
    /// Latest value per pollutant, falling back where a series has none.
    pub fn latest_or(&self, fallback: &PollutantLevels) -> PollutantLevels {
        fallback.map(|p, default| match self.get(p).latest() {
            Some(value) => value,
            None => {
                warn!(pollutant = %p, fallback = *default, "no usable reading, using fallback");
                *default
            }
        })
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("unknown city '{0}'")]
    UnknownCity(String),
}

/// Where pollutant readings come from.
pub trait PollutantSource {
    fn cities(&self) -> Vec<String>;
    fn readings(&self, city: &str) -> Result<PollutantReadings, SourceError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CityEntry {
    pub name: String,
    #[serde(default)]
    pub readings: PollutantReadings,
}

/// In-memory city catalog, usually loaded from a scenario file.
#[derive(Debug, Clone, Default)]
pub struct CatalogSource {
    entries: Vec<CityEntry>,
}

impl CatalogSource {
    pub fn new(entries: Vec<CityEntry>) -> Self {
        Self { entries }
    }
}

impl PollutantSource for CatalogSource {
    fn cities(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.name.clone()).collect()
    }

    fn readings(&self, city: &str) -> Result<PollutantReadings, SourceError> {
        self.entries
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(city))
            .map(|entry| entry.readings.clone())
            .ok_or_else(|| SourceError::UnknownCity(city.to_string()))
    }
}

/// Seed levels for grid generation. Never fails: source errors and missing
/// series degrade to `fallback`.
pub fn seed_levels(
    source: &dyn PollutantSource,
    city: &str,
    fallback: &PollutantLevels,
) -> PollutantLevels {
    match source.readings(city) {
        Ok(readings) => readings.latest_or(fallback),
        Err(err) => {
            warn!(city, error = %err, "pollutant source failed, using fallback levels");
            *fallback
        }
    }
}
