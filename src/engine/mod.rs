use anyhow::Result;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use crate::{
    grid::{GridGenerator, GridParams},
    pollutant::{PollutantLevels, PollutantParams, PollutantTable},
    session::{Session, SessionRules},
    snapshot::SessionSnapshot,
    systems::ScoreReport,
};

/// Every tick models one second of play.
pub const TICK_SECS: u32 = 1;

pub struct EngineSettings {
    pub scenario_name: String,
    pub seed: u64,
    pub grid: GridParams,
    pub pollutants: PollutantTable<PollutantParams>,
    pub rules: SessionRules,
}

pub struct EngineBuilder {
    settings: EngineSettings,
    systems: Vec<Box<dyn System + Send>>,
}

impl EngineBuilder {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            systems: Vec::new(),
        }
    }

    pub fn with_system(mut self, system: impl System + Send + 'static) -> Self {
        self.systems.push(Box::new(system));
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            rng: ChaCha8Rng::seed_from_u64(self.settings.seed),
            systems: self.systems,
            settings: self.settings,
        }
    }
}

pub struct Engine {
    /// One stream for every grid this engine generates.
    rng: ChaCha8Rng,
    systems: Vec<Box<dyn System + Send>>,
    settings: EngineSettings,
}

impl Engine {
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Generates a fresh grid from `seed` and opens a session on it.
    pub fn new_session(&mut self, city: &str, seed: &PollutantLevels) -> Session {
        let generator = GridGenerator::new(&self.settings.grid, &self.settings.pollutants);
        let grid = generator.generate(seed, &mut self.rng);
        info!(
            scenario = %self.settings.scenario_name,
            city,
            source = %grid.source(),
            wind = ?grid.wind(),
            cells = grid.filled_count(),
            "grid generated"
        );
        Session::new(city, grid, &self.settings.rules)
    }

    /// Runs one tick. Systems stop as soon as the session is over, and a tick
    /// on a finished session does nothing.
    pub fn tick(&mut self, session: &mut Session) -> Result<TickSummary> {
        if !session.is_over() {
            session.advance_tick();
            for system in &mut self.systems {
                if session.is_over() {
                    break;
                }
                let ctx = SystemContext {
                    tick: session.tick(),
                    tick_secs: TICK_SECS,
                    scenario_name: &self.settings.scenario_name,
                };
                system.run(&ctx, session)?;
            }
            debug!(
                tick = session.tick(),
                timer = session.timer_secs(),
                balance = session.balance(),
                "tick complete"
            );
        }
        Ok(TickSummary {
            tick: session.tick(),
            balance: session.balance(),
            timer_secs: session.timer_secs(),
            game_over: session.is_over(),
            score: session.last_score().copied(),
        })
    }

    pub fn run(&mut self, session: &mut Session, ticks: u64) -> Result<()> {
        self.run_with_hook(session, ticks, |_| {})
    }

    pub fn run_with_hook<F>(&mut self, session: &mut Session, ticks: u64, mut hook: F) -> Result<()>
    where
        F: FnMut(SessionSnapshot),
    {
        for _ in 0..ticks {
            if session.is_over() {
                break;
            }
            self.tick(session)?;
            hook(SessionSnapshot::capture(&self.settings.scenario_name, session, &self.settings.pollutants));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct TickSummary {
    pub tick: u64,
    pub balance: u32,
    pub timer_secs: u32,
    pub game_over: bool,
    pub score: Option<ScoreReport>,
}

pub struct SystemContext<'a> {
    pub tick: u64,
    pub tick_secs: u32,
    pub scenario_name: &'a str,
}

pub trait System {
    fn name(&self) -> &str;
    fn run(&mut self, ctx: &SystemContext, session: &mut Session) -> Result<()>;
}
