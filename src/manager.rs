use crate::analysis::Analyzer;
use crate::config::Config;
use crate::engine::Engine;
use anyhow::{Context, Result, ensure};
use glob::glob;
use std::{
    fs,
    path::{Path, PathBuf},
};

const CONFIG_FILE: &str = "config.toml";
const RUN_PREFIX: &str = "run-";

/// Files of one simulation run.
#[derive(Debug, PartialEq)]
struct RunDir {
    idx: usize,
    path: PathBuf,
}

impl RunDir {
    fn new(sim_dir: &Path, idx: usize) -> Self {
        Self {
            idx,
            path: sim_dir.join(format!("{RUN_PREFIX}{idx:04}")),
        }
    }

    /// Run index encoded in a directory name such as `run-0003`.
    fn parse_idx(path: &Path) -> Option<usize> {
        path.file_name()?
            .to_str()?
            .strip_prefix(RUN_PREFIX)?
            .parse()
            .ok()
    }

    fn checkpoint(&self) -> PathBuf {
        self.path.join("checkpoint.msgpack")
    }

    fn trajectory(&self, file_idx: usize) -> PathBuf {
        self.path.join(format!("trajectory-{file_idx:04}.msgpack"))
    }

    fn results(&self) -> PathBuf {
        self.path.join("results.msgpack")
    }

    fn n_trajectories(&self) -> Result<usize> {
        let pattern = self.path.join("trajectory-*.msgpack");
        let pattern = pattern.to_str().context("pattern is not valid UTF-8")?;
        let count = glob(pattern)
            .context("failed to glob trajectory files")?
            .filter_map(Result::ok)
            .count();
        Ok(count)
    }
}

/// Simulation directory holding `config.toml` and one directory per run.
pub struct Manager {
    sim_dir: PathBuf,
    cfg: Config,
}

impl Manager {
    pub fn new<P: AsRef<Path>>(sim_dir: P) -> Result<Self> {
        let sim_dir = sim_dir.as_ref().to_path_buf();

        let cfg = Config::from_file(sim_dir.join(CONFIG_FILE)).context("failed to load config")?;
        log::info!(
            "{} hosts, {} vector species, {} initial genomes, {} drug-resistance loci",
            cfg.hosts.count,
            cfg.vectors.species.len(),
            cfg.init.barcodes.len(),
            cfg.genetics.drug_resistant_genome_locations.len()
        );
        log::debug!("{cfg:#?}");

        Ok(Self { sim_dir, cfg })
    }

    /// Start a run after the highest existing one.
    pub fn create_run(&self) -> Result<()> {
        let idx = self
            .run_dirs()
            .context("failed to list runs")?
            .last()
            .map_or(0, |run| run.idx + 1);
        let run = RunDir::new(&self.sim_dir, idx);
        fs::create_dir_all(&run.path)
            .with_context(|| format!("failed to create {:?}", run.path))?;
        log::info!("created run {idx} in {:?}", run.path);

        let engine = Engine::generate_initial_condition(self.cfg.clone())
            .context("failed to generate initial condition")?;
        self.extend_run(&run, 0, engine)
    }

    /// Continue a run from its checkpoint into a new trajectory file.
    pub fn resume_run(&self, idx: usize) -> Result<()> {
        let run = RunDir::new(&self.sim_dir, idx);
        ensure!(run.path.is_dir(), "run {idx} does not exist in {:?}", self.sim_dir);

        let file_idx = run
            .n_trajectories()
            .context("failed to count trajectory files")?;
        let checkpoint = run.checkpoint();
        let engine = Engine::load_checkpoint(&checkpoint)
            .with_context(|| format!("failed to load {checkpoint:?}"))?;
        ensure!(
            engine.cfg() == &self.cfg,
            "run {idx} was created with a different {CONFIG_FILE}"
        );
        log::info!("resuming run {idx} at day {}", engine.state().day);

        self.extend_run(&run, file_idx, engine)
    }

    fn extend_run(&self, run: &RunDir, file_idx: usize, mut engine: Engine) -> Result<()> {
        engine
            .run_simulation(run.trajectory(file_idx))
            .context("failed to run simulation")?;
        engine
            .save_checkpoint(run.checkpoint())
            .context("failed to save checkpoint")?;
        log::info!("run {} reached day {}", run.idx, engine.state().day);
        Ok(())
    }

    /// Summarize the trajectories of every run into its results file.
    pub fn run_analysis(&self) -> Result<()> {
        for run in self.run_dirs().context("failed to list runs")? {
            let mut analyzer = Analyzer::new(self.cfg.clone());

            let n_files = run
                .n_trajectories()
                .context("failed to count trajectory files")?;
            for file_idx in 0..n_files {
                analyzer
                    .add_file(run.trajectory(file_idx))
                    .with_context(|| format!("failed to add trajectory {file_idx}"))?;
            }

            let results = run.results();
            analyzer
                .save_results(&results)
                .context("failed to save results")?;
            log::info!("analyzed {n_files} trajectory files of run {} into {results:?}", run.idx);
        }
        Ok(())
    }

    /// Remove every run directory, keeping the configuration.
    pub fn clean_runs(&self) -> Result<()> {
        for run in self.run_dirs().context("failed to list runs")? {
            fs::remove_dir_all(&run.path)
                .with_context(|| format!("failed to remove {:?}", run.path))?;
            log::info!("removed run {}", run.idx);
        }
        Ok(())
    }

    /// Existing runs ordered by index.
    fn run_dirs(&self) -> Result<Vec<RunDir>> {
        let pattern = self.sim_dir.join(format!("{RUN_PREFIX}*"));
        let pattern = pattern.to_str().context("pattern is not valid UTF-8")?;
        let mut runs: Vec<_> = glob(pattern)
            .context("failed to glob run dirs")?
            .filter_map(Result::ok)
            .filter(|path| path.is_dir())
            .filter_map(|path| RunDir::parse_idx(&path).map(|idx| RunDir { idx, path }))
            .collect();
        runs.sort_by_key(|run| run.idx);
        Ok(runs)
    }
}
