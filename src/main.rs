use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use airgrid::{
    grid::CellPos,
    scenario::{Scenario, ScenarioLoader},
    snapshot::SessionSnapshot,
    source::{seed_levels, PollutantSource},
    tools::ToolKind,
    web::{self, WebServerConfig},
};

#[derive(Debug, Parser)]
#[command(author, version, about = "Air quality grid game")]
struct Cli {
    /// Path to the scenario YAML file
    #[arg(long, default_value = "scenarios/kolkata_region.yaml")]
    scenario: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the cities in the scenario catalog
    Cities,
    /// Run a headless session and print the resulting grid
    Play {
        #[arg(long)]
        city: String,

        /// Ticks to simulate (capped by the session timer)
        #[arg(long, default_value_t = 60)]
        ticks: u64,

        /// Tool placements as ROW,COL,TOOL applied before the first tick
        #[arg(long = "place", value_parser = parse_placement)]
        placements: Vec<(CellPos, ToolKind)>,
    },
    /// Serve the game over HTTP
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

fn parse_placement(value: &str) -> Result<(CellPos, ToolKind)> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    let [row, col, tool] = parts.as_slice() else {
        bail!("expected ROW,COL,TOOL but got '{value}'");
    };
    let row = row.parse().with_context(|| format!("invalid row '{row}'"))?;
    let col = col.parse().with_context(|| format!("invalid column '{col}'"))?;
    Ok((CellPos::new(row, col), tool.parse()?))
}

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let loader = ScenarioLoader::new(".");
    let scenario = loader.load(&cli.scenario)?;
    init_tracing(&scenario.log_level);

    match cli.command {
        Command::Cities => {
            for city in scenario.catalog().cities() {
                println!("{city}");
            }
            Ok(())
        }
        Command::Play {
            city,
            ticks,
            placements,
        } => play(&scenario, &city, ticks, &placements),
        Command::Serve { host, port } => {
            let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
            runtime.block_on(web::run(WebServerConfig {
                scenario,
                host,
                port,
            }))
        }
    }
}

fn play(
    scenario: &Scenario,
    city: &str,
    ticks: u64,
    placements: &[(CellPos, ToolKind)],
) -> Result<()> {
    let catalog = scenario.catalog();
    let mut engine = scenario.build_engine();
    let fallback = engine.settings().pollutants.fallbacks();
    let seed = seed_levels(&catalog, city, &fallback);
    let mut session = engine.new_session(city, &seed);

    for &(pos, tool) in placements {
        if let Err(err) = session.place(pos, tool) {
            warn!(%pos, %tool, error = %err, "skipping placement");
        }
    }

    engine.run(&mut session, ticks)?;
    let snapshot = SessionSnapshot::capture(&scenario.name, &session, &engine.settings().pollutants);
    info!(
        city,
        tick = snapshot.tick,
        balance = snapshot.balance,
        "session finished"
    );

    print!("{}", snapshot.render_map());
    println!(
        "City '{}' after {} ticks: {} eco points, {}s left{}",
        city,
        snapshot.tick,
        snapshot.balance,
        snapshot.timer_secs,
        if snapshot.game_over { " (game over)" } else { "" }
    );
    if let Some(score) = snapshot.score {
        println!(
            "Improvement {:.1}% across {} cells",
            score.improvement, score.qualifying_cells
        );
    }
    Ok(())
}
