use anyhow::Result;
use tracing::debug;

use crate::{
    engine::{System, SystemContext},
    session::Session,
};

/// Advances every placement's adoption by one tick.
pub struct AdoptionSystem;

impl AdoptionSystem {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AdoptionSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl System for AdoptionSystem {
    fn name(&self) -> &str {
        "adoption"
    }

    fn run(&mut self, ctx: &SystemContext, session: &mut Session) -> Result<()> {
        session.advance_adoptions(ctx.tick_secs);
        debug!(
            tick = ctx.tick,
            placements = session.adoptions().len(),
            "adoption advanced"
        );
        Ok(())
    }
}
