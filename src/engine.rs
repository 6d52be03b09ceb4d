use crate::bite_index::{FeedingRoute, NodeBiteIndex, VectorEffects};
use crate::config::Config;
use crate::feeding::{FeedingContext, FeedingProbabilities, FeedingVector, feed_vector};
use crate::genetics::ParasiteGenetics;
use crate::host::{Host, vector_effects};
use crate::ids::IdGenerator;
use crate::model::{Record, State, Tally, VectorCohort};
use crate::modifiers::VectorGenome;
use crate::random::smart_draw;
use anyhow::{Context, Result};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rand_distr::weighted::WeightedIndex;
use rmp_serde::{decode, encode};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// Length of a simulation step (days).
const DT: f64 = 1.0;

/// Simulation engine.
///
/// Holds the configuration, parasite genetics, current state, and random
/// number generator, and provides methods to initialize, run, save, and load
/// simulations.
#[derive(Serialize, Deserialize)]
pub struct Engine {
    cfg: Config,
    genetics: ParasiteGenetics,
    state: State,
    rng: ChaCha12Rng,
}

/// Per-run working storage rebuilt from the configuration.
struct Scratch {
    index: NodeBiteIndex,
    effects: VectorEffects,
    feeding: Vec<FeedingProbabilities>,
    genome_dists: Vec<WeightedIndex<f64>>,
    i_dead: Vec<usize>,
}

impl Scratch {
    fn new(cfg: &Config) -> Result<Self> {
        let mut feeding = Vec::with_capacity(cfg.vectors.species.len());
        let mut genome_dists = Vec::with_capacity(cfg.vectors.species.len());
        for sp in &cfg.vectors.species {
            feeding.push(FeedingProbabilities {
                die_before_feeding: sp.die_before_feeding,
                not_available: sp.not_available,
                outdoor_returning_mortality: sp.outdoor_returning_mortality,
                infectious_feeding_mortality_factor: sp.infectious_feeding_mortality_factor,
            });
            genome_dists.push(
                WeightedIndex::new(&sp.genome_weights)
                    .with_context(|| format!("invalid genome weights of species {:?}", sp.name))?,
            );
        }

        Ok(Self {
            index: NodeBiteIndex::new(),
            effects: vector_effects(&cfg.hosts),
            feeding,
            genome_dists,
            i_dead: Vec::new(),
        })
    }
}

impl Engine {
    /// Create a new `Engine` with the given configuration and initial infections.
    pub fn generate_initial_condition(cfg: Config) -> Result<Self> {
        let mut rng = match cfg.init.seed {
            Some(seed) => ChaCha12Rng::seed_from_u64(seed),
            None => ChaCha12Rng::try_from_os_rng()?,
        };

        let genetics =
            ParasiteGenetics::new(&cfg.genetics).context("failed to construct parasite genetics")?;

        let genomes = cfg
            .init
            .genomes(genetics.layout())
            .context("failed to build initial genomes")?;

        // Initial infections already carry mature gametocytes.
        let mut hosts: Vec<_> = (0..cfg.hosts.count as u64).map(Host::new).collect();
        for (host, genome) in hosts
            .iter_mut()
            .take(cfg.init.infected_hosts)
            .zip(genomes.iter().cycle())
        {
            host.infect(genome.clone(), cfg.hosts.gametocyte_delay);
        }

        let mut ids = IdGenerator::new();
        let mut vectors = Vec::new();
        for (i_sp, sp) in cfg.vectors.species.iter().enumerate() {
            let genome_dist = WeightedIndex::new(&sp.genome_weights)?;
            for _ in 0..sp.population {
                let genome = VectorGenome(genome_dist.sample(&mut rng) as u32);
                vectors.push(VectorCohort::new(ids.next_vector_id(), i_sp, genome));
            }
        }

        let state = State {
            day: 0,
            hosts,
            vectors,
            ids,
        };

        Ok(Self {
            cfg,
            genetics,
            state,
            rng,
        })
    }

    pub fn cfg(&self) -> &Config {
        &self.cfg
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// Run the simulation and save the resulting records to a binary file.
    pub fn run_simulation<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);

        let mut scratch = Scratch::new(&self.cfg).context("failed to construct scratch")?;

        for i_save in 0..self.cfg.output.saves_per_file {
            let mut tally = Tally::new(self.cfg.vectors.species.len());
            for _ in 0..self.cfg.output.steps_per_save {
                self.perform_step(&mut scratch, &mut tally)
                    .with_context(|| format!("failed to perform step of day {}", self.state.day))?;
            }

            let n_bites: u64 = tally.bites.iter().map(|bites| bites.total()).sum();
            let record = Record::new(&self.state, tally);
            encode::write(&mut writer, &record).context("failed to serialize record")?;

            let progress = 100.0 * (i_save + 1) as f64 / self.cfg.output.saves_per_file as f64;
            log::info!("completed {progress:06.2}% (day {}, {n_bites} bites)", self.state.day);
        }

        writer.flush().context("failed to flush writer stream")?;

        Ok(())
    }

    /// Save a checkpoint of the entire engine state.
    ///
    /// Can be used to resume the simulation later.
    pub fn save_checkpoint<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        encode::write_named(&mut writer, &self).context("failed to serialize engine")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }

    /// Load a previously saved engine checkpoint.
    pub fn load_checkpoint<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);
        let engine = decode::from_read(&mut reader).context("failed to deserialize engine")?;
        Ok(engine)
    }

    fn perform_step(&mut self, scratch: &mut Scratch, tally: &mut Tally) -> Result<()> {
        // Index the hosts with today's gametocytes.
        self.build_bite_index(scratch)
            .context("failed to build bite index")?;

        // Age vectors, resolve their feeds and develop their parasites.
        self.update_vectors(scratch, tally)
            .context("failed to update vectors")?;

        // Remove deceased vectors.
        let n_dead = scratch.i_dead.len();
        tally.n_vector_deaths += n_dead as u64;
        self.remove_deceased(&mut scratch.i_dead);
        log::debug!(
            "day {}: {} vectors survived, {n_dead} died",
            self.state.day,
            self.state.vectors.len()
        );

        // Restore species populations with newly emerged adults.
        self.emerge_vectors(scratch);

        // Challenge hosts with the delivered sporozoites.
        self.update_hosts(scratch, tally)
            .context("failed to update hosts")?;

        self.state.day += 1;

        Ok(())
    }

    fn build_bite_index(&mut self, scratch: &mut Scratch) -> Result<()> {
        scratch.index.reset(self.state.hosts.len());
        for host in &self.state.hosts {
            let entry = host.bite_entry(&mut self.state.ids, &self.cfg.hosts, &scratch.effects);
            scratch.index.add_host(entry)?;
        }
        log::debug!("day {}: indexed {} hosts", self.state.day, scratch.index.len());
        Ok(())
    }

    fn update_vectors(&mut self, scratch: &mut Scratch, tally: &mut Tally) -> Result<()> {
        let Self {
            cfg,
            genetics,
            state,
            rng,
        } = self;

        scratch.i_dead.clear();

        for (i_vec, vector) in state.vectors.iter_mut().enumerate() {
            let i_sp = vector.species();
            let sp = &cfg.vectors.species[i_sp];

            if smart_draw(rng, 1.0 - (-DT / sp.life_expectancy).exp()) {
                scratch.i_dead.push(i_vec);
                continue;
            }
            vector.grow_older(DT);

            let (vector_id, genome) = (vector.id(), vector.genome());

            // Feeds see the parasites the vector started the day with.
            if smart_draw(rng, DT / sp.days_between_feeds) {
                let route = if smart_draw(rng, sp.indoor_feeding_fraction) {
                    FeedingRoute::Indoor
                } else {
                    FeedingRoute::Outdoor
                };

                let mut ctx = FeedingContext {
                    index: &mut scratch.index,
                    ids: &mut state.ids,
                    genetics,
                };
                let report = feed_vector(
                    rng,
                    &mut ctx,
                    FeedingVector {
                        id: vector_id,
                        species: i_sp,
                        genome,
                        parasites: vector.parasites_mut(),
                    },
                    &scratch.feeding[i_sp],
                    route,
                    &mut tally.bites[i_sp],
                )?;

                log::trace!("vector {vector_id} feeding: {report:?}");
                tally.n_vector_infections += u64::from(report.infected);
                if report.outcome.vector_dies() {
                    scratch.i_dead.push(i_vec);
                    continue;
                }
            }

            let parasites = vector.parasites_mut();
            parasites
                .update(rng, &mut state.ids, genetics, genome, DT, DT / sp.oocyst_duration)
                .with_context(|| format!("failed to update parasites of vector {vector_id}"))?;
            tally.add_vector_update(parasites);
        }

        Ok(())
    }

    fn remove_deceased(&mut self, i_dead: &mut Vec<usize>) {
        // Sort in reverse to safely remove by index.
        i_dead.sort_by(|a, b| b.cmp(a));
        for &i_vec in i_dead.iter() {
            self.state.vectors.swap_remove(i_vec);
        }
    }

    fn emerge_vectors(&mut self, scratch: &Scratch) {
        let mut n_alive = vec![0; self.cfg.vectors.species.len()];
        for vector in &self.state.vectors {
            n_alive[vector.species()] += 1;
        }

        for (i_sp, sp) in self.cfg.vectors.species.iter().enumerate() {
            for _ in n_alive[i_sp]..sp.population {
                let genome = VectorGenome(scratch.genome_dists[i_sp].sample(&mut self.rng) as u32);
                let id = self.state.ids.next_vector_id();
                self.state.vectors.push(VectorCohort::new(id, i_sp, genome));
            }
        }
    }

    fn update_hosts(&mut self, scratch: &mut Scratch, tally: &mut Tally) -> Result<()> {
        for (host_id, delivered, n_bites) in scratch.index.take_delivered() {
            if delivered.is_empty() {
                continue;
            }
            let host = self
                .state
                .hosts
                .get_mut(host_id as usize)
                .with_context(|| format!("host {host_id} does not exist"))?;
            let n_new = host.receive(&mut self.rng, &delivered, &self.cfg.hosts);
            log::debug!(
                "host {host_id} received {n_bites} infectious bites, {n_new} new infections"
            );
            tally.n_host_infections += n_new as u64;
        }

        for host in &mut self.state.hosts {
            host.update(DT, &self.cfg.hosts);
        }

        Ok(())
    }
}
