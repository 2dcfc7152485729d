use serde::{Deserialize, Serialize};

use crate::{
    grid::{CellPos, Wind},
    pollutant::{Category, PollutantLevels, PollutantParams, PollutantTable},
    session::Session,
    systems::ScoreReport,
    tools::ToolKind,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellSnapshot {
    pub row: usize,
    pub col: usize,
    /// Levels at generation time.
    pub levels: PollutantLevels,
    pub effective: PollutantLevels,
    /// Classification of the generated levels.
    pub composite: f64,
    pub category: Category,
    /// Classification of the post-mitigation levels.
    pub effective_composite: f64,
    pub effective_category: Category,
    pub tool: Option<ToolKind>,
    pub strength: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub scenario: String,
    pub city: String,
    pub tick: u64,
    pub balance: u32,
    pub timer_secs: u32,
    pub game_over: bool,
    pub rows: usize,
    pub cols: usize,
    pub source: CellPos,
    pub wind: Wind,
    pub cells: Vec<CellSnapshot>,
    pub score: Option<ScoreReport>,
}

impl SessionSnapshot {
    pub fn capture(
        scenario: &str,
        session: &Session,
        pollutants: &PollutantTable<PollutantParams>,
    ) -> Self {
        let grid = session.grid();
        let cells = grid
            .cells()
            .map(|cell| {
                let pos = cell.pos();
                let effective = session.effective_levels(pos).unwrap_or(*cell.levels());
                let effective_composite = pollutants.composite(&effective);
                CellSnapshot {
                    row: pos.row,
                    col: pos.col,
                    levels: *cell.levels(),
                    effective,
                    composite: cell.composite(),
                    category: cell.category(),
                    effective_composite,
                    effective_category: Category::classify(effective_composite),
                    tool: cell.tool(),
                    strength: session.strength_at(pos),
                }
            })
            .collect();
        Self {
            scenario: scenario.to_string(),
            city: session.city().to_string(),
            tick: session.tick(),
            balance: session.balance(),
            timer_secs: session.timer_secs(),
            game_over: session.is_over(),
            rows: grid.rows(),
            cols: grid.cols(),
            source: grid.source(),
            wind: grid.wind(),
            cells,
            score: session.last_score().copied(),
        }
    }

    pub fn cell(&self, pos: CellPos) -> Option<&CellSnapshot> {
        self.cells
            .iter()
            .find(|cell| cell.row == pos.row && cell.col == pos.col)
    }

    /// Text map: tool glyph where a tool stands, category glyph otherwise,
    /// '.' for unfilled positions.
    pub fn render_map(&self) -> String {
        let mut out = String::with_capacity((self.cols + 1) * self.rows);
        for row in 0..self.rows {
            for col in 0..self.cols {
                let glyph = match self.cell(CellPos::new(row, col)) {
                    Some(cell) => cell
                        .tool
                        .map(ToolKind::glyph)
                        .unwrap_or_else(|| cell.effective_category.glyph()),
                    None => '.',
                };
                out.push(glyph);
            }
            out.push('\n');
        }
        out
    }
}
