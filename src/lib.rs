pub mod engine;
pub mod grid;
pub mod pollutant;
pub mod scenario;
pub mod session;
pub mod snapshot;
pub mod source;
pub mod systems;
pub mod tools;
pub mod web;

pub use engine::{Engine, EngineBuilder, EngineSettings, TickSummary};
pub use grid::{CellPos, Grid};
pub use scenario::{Scenario, ScenarioLoader};
pub use session::{Session, SessionError};
pub use tools::ToolKind;
