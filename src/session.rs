use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::grid::{CellPos, Grid};
use crate::pollutant::PollutantLevels;
use crate::systems::ScoreReport;
use crate::tools::{effective_levels, Adoption, Adoptions, PlacementKey, ToolKind};

fn default_starting_balance() -> u32 {
    50
}

fn default_timer_secs() -> u32 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRules {
    #[serde(default = "default_starting_balance")]
    pub starting_balance: u32,
    #[serde(default = "default_timer_secs")]
    pub timer_secs: u32,
}

impl Default for SessionRules {
    fn default() -> Self {
        Self {
            starting_balance: default_starting_balance(),
            timer_secs: default_timer_secs(),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("the game is over")]
    GameOver,
    #[error("no cell at {0}")]
    NoCell(CellPos),
    #[error("cell {pos} already holds a {tool} tool")]
    Occupied { pos: CellPos, tool: ToolKind },
    #[error("not enough eco points: {tool} costs {cost}, balance is {balance}")]
    InsufficientFunds {
        tool: ToolKind,
        cost: u32,
        balance: u32,
    },
}

/// All mutable state for one grid activation.
#[derive(Debug, Clone)]
pub struct Session {
    city: String,
    grid: Grid,
    adoptions: Adoptions,
    balance: u32,
    timer_secs: u32,
    game_over: bool,
    tick: u64,
    last_score: Option<ScoreReport>,
}

impl Session {
    pub fn new(city: impl Into<String>, grid: Grid, rules: &SessionRules) -> Self {
        Self {
            city: city.into(),
            grid,
            adoptions: Adoptions::new(),
            balance: rules.starting_balance,
            timer_secs: rules.timer_secs,
            game_over: rules.timer_secs == 0,
            tick: 0,
            last_score: None,
        }
    }

    pub fn city(&self) -> &str {
        &self.city
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn adoptions(&self) -> &Adoptions {
        &self.adoptions
    }

    pub fn balance(&self) -> u32 {
        self.balance
    }

    pub fn timer_secs(&self) -> u32 {
        self.timer_secs
    }

    pub fn is_over(&self) -> bool {
        self.game_over
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn last_score(&self) -> Option<&ScoreReport> {
        self.last_score.as_ref()
    }

    pub fn strength_at(&self, pos: CellPos) -> Option<f64> {
        let tool = self.grid.cell(pos)?.tool()?;
        let adoption = self.adoptions.get(&PlacementKey { pos, tool })?;
        Some(adoption.strength(tool))
    }

    pub fn effective_levels(&self, pos: CellPos) -> Option<PollutantLevels> {
        effective_levels(&self.grid, &self.adoptions, pos)
    }

    pub fn place(&mut self, pos: CellPos, tool: ToolKind) -> Result<(), SessionError> {
        if self.game_over {
            return Err(SessionError::GameOver);
        }
        let cell = self.grid.cell(pos).ok_or(SessionError::NoCell(pos))?;
        if let Some(existing) = cell.tool() {
            return Err(SessionError::Occupied {
                pos,
                tool: existing,
            });
        }
        let cost = tool.spec().cost;
        if self.balance < cost {
            warn!(%pos, %tool, cost, balance = self.balance, "placement rejected");
            return Err(SessionError::InsufficientFunds {
                tool,
                cost,
                balance: self.balance,
            });
        }
        self.balance -= cost;
        self.grid.set_tool(pos, Some(tool));
        self.adoptions
            .insert(PlacementKey { pos, tool }, Adoption::default());
        info!(%pos, %tool, balance = self.balance, "tool placed");
        Ok(())
    }

    /// Removes the tool at `pos`, returning the refund. `Ok(None)` when there
    /// is nothing to remove.
    pub fn remove(&mut self, pos: CellPos) -> Result<Option<u32>, SessionError> {
        if self.game_over {
            return Err(SessionError::GameOver);
        }
        let Some(tool) = self.grid.cell(pos).and_then(|cell| cell.tool()) else {
            return Ok(None);
        };
        let refund = tool.refund();
        self.balance = self.balance.saturating_add(refund);
        self.grid.set_tool(pos, None);
        self.adoptions.remove(&PlacementKey { pos, tool });
        info!(%pos, %tool, refund, balance = self.balance, "tool removed");
        Ok(Some(refund))
    }

    pub(crate) fn advance_tick(&mut self) {
        self.tick += 1;
    }

    /// Returns true when this call ended the game.
    pub(crate) fn count_down(&mut self, secs: u32) -> bool {
        if self.game_over {
            return false;
        }
        self.timer_secs = self.timer_secs.saturating_sub(secs);
        if self.timer_secs == 0 {
            self.game_over = true;
        }
        self.game_over
    }

    pub(crate) fn advance_adoptions(&mut self, secs: u32) {
        for adoption in self.adoptions.values_mut() {
            adoption.advance(secs);
        }
    }

    pub(crate) fn award(&mut self, report: ScoreReport) {
        self.balance = self.balance.saturating_add(report.points);
        self.last_score = Some(report);
    }
}
