use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::grid::{CellPos, Grid};
use crate::pollutant::{PollutantLevels, PollutantTable};

/// Mitigation parameters shared by every placement of one tool kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToolSpec {
    pub cost: u32,
    /// Side length of the square neighbourhood the tool affects.
    pub area: usize,
    /// Amount subtracted per pollutant at full strength.
    pub reductions: PollutantLevels,
    pub ramp_secs: u32,
}

const TRANSIT: ToolSpec = ToolSpec {
    cost: 15,
    area: 3,
    reductions: PollutantTable {
        co: 1.0,
        no2: 4.0,
        so2: 0.5,
        pm25: 5.0,
    },
    ramp_secs: 8,
};

const RENEWABLE: ToolSpec = ToolSpec {
    cost: 25,
    area: 5,
    reductions: PollutantTable {
        co: 0.5,
        no2: 2.0,
        so2: 2.5,
        pm25: 3.0,
    },
    ramp_secs: 12,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Transit,
    Renewable,
}

impl ToolKind {
    pub fn spec(self) -> &'static ToolSpec {
        match self {
            ToolKind::Transit => &TRANSIT,
            ToolKind::Renewable => &RENEWABLE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ToolKind::Transit => "transit",
            ToolKind::Renewable => "renewable",
        }
    }

    /// Half of the removal price comes back, rounded up.
    pub fn refund(self) -> u32 {
        self.spec().cost.div_ceil(2)
    }

    pub fn glyph(self) -> char {
        match self {
            ToolKind::Transit => 'T',
            ToolKind::Renewable => 'R',
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown tool kind '{0}' (expected transit or renewable)")]
pub struct UnknownTool(pub String);

impl FromStr for ToolKind {
    type Err = UnknownTool;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "transit" | "bus" => Ok(ToolKind::Transit),
            "renewable" | "windmill" => Ok(ToolKind::Renewable),
            _ => Err(UnknownTool(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlacementKey {
    pub pos: CellPos,
    pub tool: ToolKind,
}

/// Elapsed-time tracker for one placement; strength is derived from it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Adoption {
    elapsed_secs: u32,
}

impl Adoption {
    pub fn advance(&mut self, secs: u32) {
        self.elapsed_secs = self.elapsed_secs.saturating_add(secs);
    }

    pub fn elapsed_secs(&self) -> u32 {
        self.elapsed_secs
    }

    pub fn strength(&self, tool: ToolKind) -> f64 {
        let ramp = tool.spec().ramp_secs;
        if ramp == 0 {
            return 1.0;
        }
        (f64::from(self.elapsed_secs) / f64::from(ramp)).min(1.0)
    }
}

pub type Adoptions = BTreeMap<PlacementKey, Adoption>;

fn within_reach(tool: ToolKind, at: CellPos, query: CellPos) -> bool {
    let reach = tool.spec().area / 2;
    at.row.abs_diff(query.row) <= reach && at.col.abs_diff(query.col) <= reach
}

/// Post-mitigation levels for the cell at `query`, or `None` for an unfilled
/// position. Overlapping tools stack, each subtraction clamped at zero.
pub fn effective_levels(grid: &Grid, adoptions: &Adoptions, query: CellPos) -> Option<PollutantLevels> {
    let mut levels = *grid.cell(query)?.levels();
    for placed in grid.cells() {
        let Some(tool) = placed.tool() else {
            continue;
        };
        if !within_reach(tool, placed.pos(), query) {
            continue;
        }
        let strength = adoptions
            .get(&PlacementKey {
                pos: placed.pos(),
                tool,
            })
            .map(|adoption| adoption.strength(tool))
            .unwrap_or(0.0);
        let reductions = &tool.spec().reductions;
        levels = levels.map(|p, value| (value - reductions.get(p) * strength).max(0.0));
    }
    Some(levels)
}
