use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::pollutant::{Category, PollutantLevels, PollutantParams, PollutantTable};
use crate::tools::ToolKind;

fn default_rows() -> usize {
    7
}

fn default_cols() -> usize {
    9
}

fn default_fill_min() -> usize {
    40
}

fn default_fill_max() -> usize {
    63
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridParams {
    #[serde(default = "default_rows")]
    pub rows: usize,
    #[serde(default = "default_cols")]
    pub cols: usize,
    #[serde(default = "default_fill_min")]
    pub fill_min: usize,
    #[serde(default = "default_fill_max")]
    pub fill_max: usize,
}

impl Default for GridParams {
    fn default() -> Self {
        Self {
            rows: default_rows(),
            cols: default_cols(),
            fill_min: default_fill_min(),
            fill_max: default_fill_max(),
        }
    }
}

impl GridParams {
    /// Fill bounds clamped to what the grid can actually hold.
    pub fn fill_range(&self) -> (usize, usize) {
        let capacity = (self.rows * self.cols).max(1);
        let max = self.fill_max.clamp(1, capacity);
        let min = self.fill_min.clamp(1, max);
        (min, max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellPos {
    pub row: usize,
    pub col: usize,
}

impl CellPos {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    pub fn manhattan(self, other: CellPos) -> usize {
        self.row.abs_diff(other.row) + self.col.abs_diff(other.col)
    }
}

impl fmt::Display for CellPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Wind {
    Up,
    Down,
    Left,
    Right,
}

impl Wind {
    pub const ALL: [Wind; 4] = [Wind::Up, Wind::Down, Wind::Left, Wind::Right];

    /// Signed offset of `pos` from `source` along the wind axis, positive downwind.
    pub fn bias(self, source: CellPos, pos: CellPos) -> f64 {
        let (from, to) = match self {
            Wind::Up => (pos.row, source.row),
            Wind::Down => (source.row, pos.row),
            Wind::Left => (pos.col, source.col),
            Wind::Right => (source.col, pos.col),
        };
        to as f64 - from as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    pos: CellPos,
    levels: PollutantLevels,
    composite: f64,
    category: Category,
    tool: Option<ToolKind>,
}

impl Cell {
    fn new(pos: CellPos, levels: PollutantLevels, params: &PollutantTable<PollutantParams>) -> Self {
        let composite = params.composite(&levels);
        Self {
            pos,
            levels,
            composite,
            category: Category::classify(composite),
            tool: None,
        }
    }

    pub fn pos(&self) -> CellPos {
        self.pos
    }

    /// Levels as generated, before any tool effect.
    pub fn levels(&self) -> &PollutantLevels {
        &self.levels
    }

    pub fn composite(&self) -> f64 {
        self.composite
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn tool(&self) -> Option<ToolKind> {
        self.tool
    }
}

/// Sparse pollution field. Positions never reached during generation hold no cell.
#[derive(Debug, Clone)]
pub struct Grid {
    rows: usize,
    cols: usize,
    source: CellPos,
    wind: Wind,
    cells: Vec<Option<Cell>>,
    baseline: Vec<Option<PollutantLevels>>,
}

impl Grid {
    /// Builds a grid from explicit per-cell levels. Baselines are captured from
    /// the given levels; positions outside the grid are ignored.
    pub fn from_levels(
        rows: usize,
        cols: usize,
        source: CellPos,
        wind: Wind,
        levels: impl IntoIterator<Item = (CellPos, PollutantLevels)>,
        params: &PollutantTable<PollutantParams>,
    ) -> Self {
        let mut cells = vec![None; rows * cols];
        for (pos, value) in levels {
            if pos.row < rows && pos.col < cols {
                cells[pos.row * cols + pos.col] = Some(Cell::new(pos, value, params));
            }
        }
        let baseline = cells
            .iter()
            .map(|cell| cell.as_ref().map(|c| c.levels))
            .collect();
        Self {
            rows,
            cols,
            source,
            wind,
            cells,
            baseline,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn source(&self) -> CellPos {
        self.source
    }

    pub fn wind(&self) -> Wind {
        self.wind
    }

    fn index(&self, pos: CellPos) -> Option<usize> {
        (pos.row < self.rows && pos.col < self.cols).then(|| pos.row * self.cols + pos.col)
    }

    pub fn cell(&self, pos: CellPos) -> Option<&Cell> {
        self.index(pos).and_then(|idx| self.cells[idx].as_ref())
    }

    pub fn baseline(&self, pos: CellPos) -> Option<&PollutantLevels> {
        self.index(pos).and_then(|idx| self.baseline[idx].as_ref())
    }

    /// Filled cells in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.iter().flatten()
    }

    pub fn filled_count(&self) -> usize {
        self.cells().count()
    }

    pub fn is_filled(&self, pos: CellPos) -> bool {
        self.cell(pos).is_some()
    }

    pub(crate) fn set_tool(&mut self, pos: CellPos, tool: Option<ToolKind>) {
        if let Some(cell) = self.index(pos).and_then(|idx| self.cells[idx].as_mut()) {
            cell.tool = tool;
        }
    }
}

pub struct GridGenerator<'a> {
    params: &'a GridParams,
    pollutants: &'a PollutantTable<PollutantParams>,
}

impl<'a> GridGenerator<'a> {
    pub fn new(params: &'a GridParams, pollutants: &'a PollutantTable<PollutantParams>) -> Self {
        Self { params, pollutants }
    }

    pub fn generate<R: Rng + ?Sized>(&self, seed: &PollutantLevels, rng: &mut R) -> Grid {
        let rows = self.params.rows.max(1);
        let cols = self.params.cols.max(1);
        let source = CellPos::new(interior(rows, rng), interior(cols, rng));
        let (fill_min, fill_max) = self.params.fill_range();
        let target = rng.gen_range(fill_min..=fill_max);

        let filled = spread(rows, cols, source, target, rng);
        let wind = Wind::ALL[rng.gen_range(0..Wind::ALL.len())];

        let mut levels = Vec::with_capacity(filled.len());
        for pos in filled {
            let distance = pos.manhattan(source) as f64;
            let bias = wind.bias(source, pos);
            let estimate = PollutantTable::from_fn(|p| {
                let params = self.pollutants.get(p);
                let noise = if params.noise_band > 0.0 {
                    rng.gen_range(-params.noise_band..=params.noise_band)
                } else {
                    0.0
                };
                let value = seed.get(p) - params.decay_per_cell * distance
                    + params.wind_per_cell * bias
                    + noise;
                value.max(params.floor)
            });
            levels.push((pos, estimate));
        }

        Grid::from_levels(rows, cols, source, wind, levels, self.pollutants)
    }
}

fn interior<R: Rng + ?Sized>(len: usize, rng: &mut R) -> usize {
    if len >= 3 {
        rng.gen_range(1..len - 1)
    } else {
        rng.gen_range(0..len)
    }
}

/// Randomized contagion from `source` until `target` cells are filled or the
/// frontier is exhausted. Returns filled positions in fill order.
fn spread<R: Rng + ?Sized>(
    rows: usize,
    cols: usize,
    source: CellPos,
    target: usize,
    rng: &mut R,
) -> Vec<CellPos> {
    let mut occupied = vec![false; rows * cols];
    occupied[source.row * cols + source.col] = true;
    let mut filled = vec![source];
    let mut frontier = vec![source];

    while filled.len() < target && !frontier.is_empty() {
        let pick = rng.gen_range(0..frontier.len());
        let from = frontier[pick];
        let open: Vec<CellPos> = neighbours(from, rows, cols)
            .filter(|pos| !occupied[pos.row * cols + pos.col])
            .collect();
        if open.is_empty() {
            frontier.swap_remove(pick);
            continue;
        }
        let next = open[rng.gen_range(0..open.len())];
        occupied[next.row * cols + next.col] = true;
        filled.push(next);
        frontier.push(next);
    }
    filled
}

fn neighbours(pos: CellPos, rows: usize, cols: usize) -> impl Iterator<Item = CellPos> {
    let up = pos.row.checked_sub(1).map(|row| CellPos::new(row, pos.col));
    let down = (pos.row + 1 < rows).then(|| CellPos::new(pos.row + 1, pos.col));
    let left = pos.col.checked_sub(1).map(|col| CellPos::new(pos.row, col));
    let right = (pos.col + 1 < cols).then(|| CellPos::new(pos.row, pos.col + 1));
    [up, down, left, right].into_iter().flatten()
}

#[cfg(test)]
mod tests {
    use std::collections::{HashSet, VecDeque};

    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::pollutant::Pollutant;

    fn quiet_pollutants() -> PollutantTable<PollutantParams> {
        PollutantTable::<PollutantParams>::default().map(|_, params| PollutantParams {
            noise_band: 0.0,
            ..*params
        })
    }

    fn is_connected(grid: &Grid) -> bool {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([grid.source()]);
        seen.insert(grid.source());
        while let Some(pos) = queue.pop_front() {
            for next in neighbours(pos, grid.rows(), grid.cols()) {
                if grid.is_filled(next) && seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        seen.len() == grid.filled_count()
    }

    #[test]
    fn generated_grid_is_connected_and_within_fill_range() {
        let params = GridParams::default();
        let pollutants = PollutantTable::<PollutantParams>::default();
        let seed = pollutants.fallbacks();
        for s in 0..20 {
            let mut rng = ChaCha8Rng::seed_from_u64(s);
            let grid = GridGenerator::new(&params, &pollutants).generate(&seed, &mut rng);
            let source = grid.source();
            assert!(source.row >= 1 && source.row <= 5, "source row {source}");
            assert!(source.col >= 1 && source.col <= 7, "source col {source}");
            assert!(grid.is_filled(source));
            assert!(grid.filled_count() >= 40 && grid.filled_count() <= 63);
            assert!(is_connected(&grid), "seed {s} produced a split grid");
        }
    }

    #[test]
    fn levels_respect_floors_and_classification() {
        let params = GridParams::default();
        let pollutants = PollutantTable::<PollutantParams>::default();
        let seed = PollutantLevels::new(0.0, 0.0, 0.0, 0.0);
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let grid = GridGenerator::new(&params, &pollutants).generate(&seed, &mut rng);
        for cell in grid.cells() {
            for (p, value) in cell.levels().iter() {
                assert!(*value >= pollutants.get(p).floor, "{p} below floor");
            }
            assert_eq!(cell.category(), Category::classify(cell.composite()));
            assert_eq!(grid.baseline(cell.pos()), Some(cell.levels()));
        }
    }

    #[test]
    fn single_cell_grid_keeps_source_readings() {
        let params = GridParams {
            fill_min: 1,
            fill_max: 1,
            ..GridParams::default()
        };
        let pollutants = quiet_pollutants();
        let seed = PollutantLevels::new(5.0, 20.0, 5.0, 40.0);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let grid = GridGenerator::new(&params, &pollutants).generate(&seed, &mut rng);

        assert_eq!(grid.filled_count(), 1);
        let cell = grid.cell(grid.source()).expect("source cell filled");
        assert_eq!(*cell.levels(), seed);
        assert!((cell.composite() - 80.0).abs() < 1e-9);
        assert_eq!(cell.category(), Category::Unhealthy);
    }

    #[test]
    fn estimates_follow_distance_and_wind() {
        let params = GridParams {
            rows: 3,
            cols: 3,
            fill_min: 9,
            fill_max: 9,
        };
        let pollutants = quiet_pollutants();
        let seed = PollutantLevels::new(8.0, 35.0, 15.0, 45.0);
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let grid = GridGenerator::new(&params, &pollutants).generate(&seed, &mut rng);

        assert_eq!(grid.filled_count(), 9);
        assert_eq!(grid.source(), CellPos::new(1, 1));
        for cell in grid.cells() {
            let distance = cell.pos().manhattan(grid.source()) as f64;
            let bias = grid.wind().bias(grid.source(), cell.pos());
            let pm = pollutants.get(Pollutant::Pm25);
            let expected = (45.0 - pm.decay_per_cell * distance + pm.wind_per_cell * bias).max(pm.floor);
            assert!((cell.levels().pm25 - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn exhausted_frontier_accepts_smaller_grid() {
        let params = GridParams {
            rows: 2,
            cols: 2,
            fill_min: 10,
            fill_max: 20,
        };
        let pollutants = PollutantTable::<PollutantParams>::default();
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let grid =
            GridGenerator::new(&params, &pollutants).generate(&pollutants.fallbacks(), &mut rng);
        assert_eq!(grid.filled_count(), 4);
    }

    #[test]
    fn spread_stops_when_frontier_runs_dry() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let filled = spread(1, 3, CellPos::new(0, 1), 50, &mut rng);
        assert_eq!(filled.len(), 3);
    }

    #[test]
    fn wind_bias_is_positive_downwind() {
        let source = CellPos::new(3, 4);
        assert_eq!(Wind::Up.bias(source, CellPos::new(1, 4)), 2.0);
        assert_eq!(Wind::Down.bias(source, CellPos::new(1, 4)), -2.0);
        assert_eq!(Wind::Left.bias(source, CellPos::new(3, 6)), -2.0);
        assert_eq!(Wind::Right.bias(source, CellPos::new(3, 6)), 2.0);
        assert_eq!(Wind::Right.bias(source, CellPos::new(0, 4)), 0.0);
    }
}
