use anyhow::Result;
use tracing::info;

use crate::{
    engine::{System, SystemContext},
    session::Session,
};

pub struct CountdownSystem;

impl CountdownSystem {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CountdownSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl System for CountdownSystem {
    fn name(&self) -> &str {
        "countdown"
    }

    fn run(&mut self, ctx: &SystemContext, session: &mut Session) -> Result<()> {
        if session.count_down(ctx.tick_secs) {
            info!(
                scenario = ctx.scenario_name,
                city = session.city(),
                tick = ctx.tick,
                balance = session.balance(),
                "timer expired, game over"
            );
        }
        Ok(())
    }
}
