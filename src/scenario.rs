use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Deserializer};

use crate::{
    engine::{Engine, EngineBuilder, EngineSettings},
    grid::GridParams,
    pollutant::{ParamsOverride, PollutantParams, PollutantTable},
    session::SessionRules,
    source::{CatalogSource, CityEntry},
    systems::{AdoptionSystem, CountdownSystem, ScoringSystem},
};

fn default_log_level() -> String {
    "info".to_string()
}

fn pollutant_params<'de, D>(deserializer: D) -> Result<PollutantTable<PollutantParams>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(PollutantTable::<ParamsOverride>::deserialize(deserializer)?.resolve())
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub description: Option<String>,
    pub seed: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub grid: GridParams,
    #[serde(default)]
    pub session: SessionRules,
    #[serde(default, deserialize_with = "pollutant_params")]
    pub pollutants: PollutantTable<PollutantParams>,
    #[serde(default)]
    pub cities: Vec<CityEntry>,
}

pub struct ScenarioLoader {
    base_dir: PathBuf,
}

impl ScenarioLoader {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn load(&self, file: impl AsRef<Path>) -> Result<Scenario> {
        let path = self.base_dir.join(file);
        let data = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
        let scenario = Scenario::from_yaml(&data)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(scenario)
    }
}

impl Scenario {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let scenario: Scenario = serde_yaml::from_str(text)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.grid.rows > 0 && self.grid.cols > 0,
            "grid must have at least one row and one column"
        );
        ensure!(
            self.grid.fill_min <= self.grid.fill_max,
            "grid fill_min ({}) exceeds fill_max ({})",
            self.grid.fill_min,
            self.grid.fill_max
        );
        for (pollutant, params) in self.pollutants.iter() {
            ensure!(
                params.reference_max > 0.0,
                "{pollutant} reference_max must be positive"
            );
            ensure!(params.floor > 0.0, "{pollutant} floor must be positive");
            ensure!(
                params.noise_band >= 0.0,
                "{pollutant} noise_band must not be negative"
            );
        }
        let mut seen = Vec::new();
        for city in &self.cities {
            let key = city.name.to_ascii_lowercase();
            ensure!(!seen.contains(&key), "city '{}' listed more than once", city.name);
            seen.push(key);
        }
        Ok(())
    }

    pub fn catalog(&self) -> CatalogSource {
        CatalogSource::new(self.cities.clone())
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            scenario_name: self.name.clone(),
            seed: self.seed,
            grid: self.grid.clone(),
            pollutants: self.pollutants,
            rules: self.session.clone(),
        }
    }

    /// Engine with the standard systems: adoption, scoring, then countdown.
    pub fn build_engine(&self) -> Engine {
        EngineBuilder::new(self.engine_settings())
            .with_system(AdoptionSystem::new())
            .with_system(ScoringSystem::new())
            .with_system(CountdownSystem::new())
            .build()
    }
}
