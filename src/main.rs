mod analysis;
mod bite_index;
mod cohort;
mod config;
mod engine;
mod feeding;
mod genetics;
mod genome;
mod host;
mod ids;
mod manager;
mod model;
mod modifiers;
mod random;
mod stats;
mod vector;

use crate::manager::Manager;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Stochastic simulation of malaria parasite genetics in mosquito vectors.
#[derive(Debug, Parser)]
#[command(version, about)]
struct CLI {
    /// Simulation directory holding `config.toml` and the runs.
    #[arg(long)]
    sim_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a new run.
    Create,

    /// Extend an existing run from its checkpoint.
    Resume {
        #[arg(long)]
        run_idx: usize,
    },

    /// Summarize the trajectories of every run.
    Analyze,

    /// Delete every run.
    Clean,
}

fn main() {
    env_logger::Builder::new()
        .format_timestamp_millis()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    if let Err(error) = run_cli() {
        log::error!("{error:#?}");
        std::process::exit(1);
    }
}

fn run_cli() -> Result<()> {
    let args = CLI::parse();
    log::info!("{args:#?}");

    let mgr = Manager::new(args.sim_dir).context("failed to construct mgr")?;

    match args.command {
        Command::Create => mgr.create_run().context("failed to create run")?,
        Command::Resume { run_idx } => mgr
            .resume_run(run_idx)
            .with_context(|| format!("failed to resume run {run_idx}"))?,
        Command::Analyze => mgr.run_analysis().context("failed to analyze runs")?,
        Command::Clean => mgr.clean_runs().context("failed to clean runs")?,
    }

    Ok(())
}
