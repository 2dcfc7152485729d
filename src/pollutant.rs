use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pollutant {
    Co,
    No2,
    So2,
    Pm25,
}

impl Pollutant {
    pub const ALL: [Pollutant; 4] = [Pollutant::Co, Pollutant::No2, Pollutant::So2, Pollutant::Pm25];

    pub fn key(self) -> &'static str {
        match self {
            Pollutant::Co => "co",
            Pollutant::No2 => "no2",
            Pollutant::So2 => "so2",
            Pollutant::Pm25 => "pm25",
        }
    }
}

impl fmt::Display for Pollutant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// One value per pollutant, serialized with the pollutant keys as field names.
/// Missing keys deserialize to `T::default()`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PollutantTable<T> {
    #[serde(default)]
    pub co: T,
    #[serde(default)]
    pub no2: T,
    #[serde(default)]
    pub so2: T,
    #[serde(default)]
    pub pm25: T,
}

pub type PollutantLevels = PollutantTable<f64>;

impl<T> PollutantTable<T> {
    pub fn from_fn(mut f: impl FnMut(Pollutant) -> T) -> Self {
        Self {
            co: f(Pollutant::Co),
            no2: f(Pollutant::No2),
            so2: f(Pollutant::So2),
            pm25: f(Pollutant::Pm25),
        }
    }

    pub fn get(&self, pollutant: Pollutant) -> &T {
        match pollutant {
            Pollutant::Co => &self.co,
            Pollutant::No2 => &self.no2,
            Pollutant::So2 => &self.so2,
            Pollutant::Pm25 => &self.pm25,
        }
    }

    pub fn get_mut(&mut self, pollutant: Pollutant) -> &mut T {
        match pollutant {
            Pollutant::Co => &mut self.co,
            Pollutant::No2 => &mut self.no2,
            Pollutant::So2 => &mut self.so2,
            Pollutant::Pm25 => &mut self.pm25,
        }
    }

    pub fn map<U>(&self, mut f: impl FnMut(Pollutant, &T) -> U) -> PollutantTable<U> {
        PollutantTable::from_fn(|p| f(p, self.get(p)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Pollutant, &T)> {
        Pollutant::ALL.into_iter().map(move |p| (p, self.get(p)))
    }
}

impl PollutantLevels {
    pub fn new(co: f64, no2: f64, so2: f64, pm25: f64) -> Self {
        Self { co, no2, so2, pm25 }
    }
}

/// Generation and classification parameters for a single pollutant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PollutantParams {
    /// Value that maps to 100 on the normalized scale.
    pub reference_max: f64,
    /// Subtracted per unit of Manhattan distance from the source.
    pub decay_per_cell: f64,
    /// Added per unit of downwind offset from the source.
    pub wind_per_cell: f64,
    pub noise_band: f64,
    pub floor: f64,
    /// Seed value used when the source has no usable reading.
    pub fallback: f64,
}

impl PollutantParams {
    pub fn defaults_for(pollutant: Pollutant) -> Self {
        match pollutant {
            Pollutant::Co => Self {
                reference_max: 10.0,
                decay_per_cell: 0.15,
                wind_per_cell: 0.1,
                noise_band: 0.3,
                floor: 0.1,
                fallback: 1.5,
            },
            Pollutant::No2 => Self {
                reference_max: 40.0,
                decay_per_cell: 1.2,
                wind_per_cell: 0.8,
                noise_band: 1.5,
                floor: 1.0,
                fallback: 25.0,
            },
            Pollutant::So2 => Self {
                reference_max: 20.0,
                decay_per_cell: 0.4,
                wind_per_cell: 0.3,
                noise_band: 0.5,
                floor: 0.5,
                fallback: 8.0,
            },
            Pollutant::Pm25 => Self {
                reference_max: 50.0,
                decay_per_cell: 2.5,
                wind_per_cell: 1.5,
                noise_band: 3.0,
                floor: 2.0,
                fallback: 35.0,
            },
        }
    }
}

/// `PollutantParams` as written in a scenario file. Unset fields keep the
/// pollutant's own defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamsOverride {
    pub reference_max: Option<f64>,
    pub decay_per_cell: Option<f64>,
    pub wind_per_cell: Option<f64>,
    pub noise_band: Option<f64>,
    pub floor: Option<f64>,
    pub fallback: Option<f64>,
}

impl ParamsOverride {
    pub fn resolve(&self, pollutant: Pollutant) -> PollutantParams {
        let base = PollutantParams::defaults_for(pollutant);
        PollutantParams {
            reference_max: self.reference_max.unwrap_or(base.reference_max),
            decay_per_cell: self.decay_per_cell.unwrap_or(base.decay_per_cell),
            wind_per_cell: self.wind_per_cell.unwrap_or(base.wind_per_cell),
            noise_band: self.noise_band.unwrap_or(base.noise_band),
            floor: self.floor.unwrap_or(base.floor),
            fallback: self.fallback.unwrap_or(base.fallback),
        }
    }
}

impl PollutantTable<ParamsOverride> {
    pub fn resolve(&self) -> PollutantTable<PollutantParams> {
        self.map(|p, overrides| overrides.resolve(p))
    }
}

impl Default for PollutantTable<PollutantParams> {
    fn default() -> Self {
        PollutantTable::from_fn(PollutantParams::defaults_for)
    }
}

impl PollutantTable<PollutantParams> {
    pub fn fallbacks(&self) -> PollutantLevels {
        self.map(|_, params| params.fallback)
    }

    /// Worst-pollutant-wins severity on a 0-100 scale.
    pub fn composite(&self, levels: &PollutantLevels) -> f64 {
        levels
            .iter()
            .map(|(p, value)| normalize(*value, self.get(p).reference_max))
            .fold(0.0, f64::max)
    }
}

pub fn normalize(value: f64, reference_max: f64) -> f64 {
    if reference_max <= 0.0 {
        return 0.0;
    }
    (value / reference_max * 100.0).clamp(0.0, 100.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Good,
    Moderate,
    Unhealthy,
}

impl Category {
    pub const UNHEALTHY_ABOVE: f64 = 70.0;
    pub const MODERATE_FROM: f64 = 40.0;

    pub fn classify(composite: f64) -> Self {
        if composite > Self::UNHEALTHY_ABOVE {
            Category::Unhealthy
        } else if composite >= Self::MODERATE_FROM {
            Category::Moderate
        } else {
            Category::Good
        }
    }

    pub fn glyph(self) -> char {
        match self {
            Category::Good => 'g',
            Category::Moderate => 'm',
            Category::Unhealthy => 'U',
        }
    }
}
