use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    engine::{System, SystemContext},
    grid::Grid,
    pollutant::Pollutant,
    session::Session,
    tools::{effective_levels, Adoptions},
};

/// Cells improving by this percentage or less are ignored.
const NOISE_FLOOR_PCT: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    /// Mean improvement percentage over qualifying cells.
    pub improvement: f64,
    pub qualifying_cells: usize,
    pub points: u32,
}

/// Compares effective levels against the generation baseline.
pub fn score(grid: &Grid, adoptions: &Adoptions) -> ScoreReport {
    let mut total = 0.0;
    let mut qualifying_cells = 0;
    for cell in grid.cells() {
        let pos = cell.pos();
        let (Some(baseline), Some(effective)) =
            (grid.baseline(pos), effective_levels(grid, adoptions, pos))
        else {
            continue;
        };
        let per_pollutant: f64 = Pollutant::ALL
            .iter()
            .map(|&p| {
                let base = *baseline.get(p);
                if base <= 0.0 {
                    return 0.0;
                }
                ((base - effective.get(p)) / base * 100.0).max(0.0)
            })
            .sum();
        let cell_improvement = per_pollutant / Pollutant::ALL.len() as f64;
        if cell_improvement > NOISE_FLOOR_PCT {
            total += cell_improvement;
            qualifying_cells += 1;
        }
    }

    let improvement = if qualifying_cells > 0 {
        total / qualifying_cells as f64
    } else {
        0.0
    };
    ScoreReport {
        improvement,
        qualifying_cells,
        points: points_for(improvement),
    }
}

pub fn points_for(improvement: f64) -> u32 {
    if !improvement.is_finite() || improvement <= 0.0 {
        return 0;
    }
    let base = (improvement / 10.0).floor() as u32;
    let bonus = if improvement >= 50.0 {
        10
    } else if improvement >= 30.0 {
        5
    } else {
        0
    };
    base + bonus
}

pub struct ScoringSystem;

impl ScoringSystem {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ScoringSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl System for ScoringSystem {
    fn name(&self) -> &str {
        "scoring"
    }

    fn run(&mut self, ctx: &SystemContext, session: &mut Session) -> Result<()> {
        let report = score(session.grid(), session.adoptions());
        debug!(
            tick = ctx.tick,
            improvement = report.improvement,
            cells = report.qualifying_cells,
            points = report.points,
            "scored"
        );
        session.award(report);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        grid::{CellPos, Wind},
        pollutant::{PollutantLevels, PollutantParams, PollutantTable},
        session::SessionRules,
        tools::ToolKind,
    };

    fn session_with(cells: &[(CellPos, PollutantLevels)]) -> Session {
        let grid = Grid::from_levels(
            7,
            9,
            cells[0].0,
            Wind::Down,
            cells.iter().copied(),
            &PollutantTable::<PollutantParams>::default(),
        );
        Session::new("Mumbai", grid, &SessionRules::default())
    }

    #[test]
    fn points_table() {
        assert_eq!(points_for(0.0), 0);
        assert_eq!(points_for(9.9), 0);
        assert_eq!(points_for(15.6), 1);
        assert_eq!(points_for(29.9), 2);
        assert_eq!(points_for(30.0), 8);
        assert_eq!(points_for(49.0), 9);
        assert_eq!(points_for(50.0), 15);
        assert_eq!(points_for(100.0), 20);
    }

    #[test]
    fn untouched_grid_scores_nothing() {
        let session = session_with(&[(CellPos::new(3, 4), PollutantLevels::new(5.0, 20.0, 5.0, 40.0))]);
        let report = score(session.grid(), session.adoptions());
        assert_eq!(report.qualifying_cells, 0);
        assert_eq!(report.improvement, 0.0);
        assert_eq!(report.points, 0);
    }

    #[test]
    fn full_strength_transit_averages_pollutant_improvement() {
        let pos = CellPos::new(3, 4);
        let mut session = session_with(&[(pos, PollutantLevels::new(5.0, 20.0, 5.0, 40.0))]);
        session.place(pos, ToolKind::Transit).unwrap();
        session.advance_adoptions(8);

        let report = score(session.grid(), session.adoptions());
        // co 20 %, no2 20 %, so2 10 %, pm25 12.5 %
        assert!((report.improvement - 15.625).abs() < 1e-9);
        assert_eq!(report.qualifying_cells, 1);
        assert_eq!(report.points, 1);
    }

    #[test]
    fn cells_below_noise_floor_are_excluded_from_mean() {
        let near = CellPos::new(3, 4);
        let far = CellPos::new(3, 5);
        let mut session = session_with(&[
            (near, PollutantLevels::new(5.0, 20.0, 5.0, 40.0)),
            (far, PollutantLevels::new(5.0, 20.0, 5.0, 40.0)),
            (CellPos::new(0, 0), PollutantLevels::new(5.0, 20.0, 5.0, 40.0)),
        ]);
        session.place(near, ToolKind::Transit).unwrap();
        session.advance_adoptions(8);

        let report = score(session.grid(), session.adoptions());
        assert_eq!(report.qualifying_cells, 2);
        assert!((report.improvement - 15.625).abs() < 1e-9);
    }

    #[test]
    fn cell_exactly_at_noise_floor_is_excluded() {
        let pos = CellPos::new(3, 4);
        // transit takes exactly 5 % off every pollutant here
        let mut session = session_with(&[(pos, PollutantLevels::new(20.0, 80.0, 10.0, 100.0))]);
        session.place(pos, ToolKind::Transit).unwrap();
        session.advance_adoptions(8);
        assert_eq!(report_for(&session).qualifying_cells, 0);

        let neighbour = CellPos::new(3, 5);
        let mut session = session_with(&[
            (pos, PollutantLevels::new(5.0, 20.0, 5.0, 40.0)),
            (neighbour, PollutantLevels::new(20.0, 80.0, 10.0, 100.0)),
        ]);
        session.place(pos, ToolKind::Transit).unwrap();
        session.advance_adoptions(8);
        let report = report_for(&session);
        assert_eq!(report.qualifying_cells, 1);
        assert!((report.improvement - 15.625).abs() < 1e-9);
    }

    fn report_for(session: &Session) -> ScoreReport {
        score(session.grid(), session.adoptions())
    }

    #[test]
    fn awarded_points_accumulate_into_balance() {
        let pos = CellPos::new(3, 4);
        let mut session = session_with(&[(pos, PollutantLevels::new(5.0, 20.0, 5.0, 40.0))]);
        session.place(pos, ToolKind::Transit).unwrap();
        session.advance_adoptions(8);

        let mut system = ScoringSystem::new();
        let ctx = SystemContext {
            tick: 1,
            tick_secs: 1,
            scenario_name: "test",
        };
        system.run(&ctx, &mut session).unwrap();
        system.run(&ctx, &mut session).unwrap();
        assert_eq!(session.balance(), 37);
        assert_eq!(session.last_score().map(|r| r.points), Some(1));
    }
}
