mod adoption;
mod countdown;
mod scoring;

pub use adoption::AdoptionSystem;
pub use countdown::CountdownSystem;
pub use scoring::{points_for, score, ScoreReport, ScoringSystem};
