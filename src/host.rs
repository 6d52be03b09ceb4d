//! Minimal host model feeding the vector side of transmission.
//!
//! Hosts carry a list of clonal infections. Each infection produces a fixed
//! number of mature gametocytes once it is old enough and is cleared after a
//! fixed duration.

use crate::bite_index::{FeedingRoute, GametocytePools, HostEntry, RouteEffects, VectorEffects};
use crate::cohort::{ParasiteCohort, ParasiteState};
use crate::config::HostsConfig;
use crate::genome::ParasiteGenome;
use crate::ids::IdGenerator;
use crate::modifiers::{GeneticProbability, VectorGenome};
use crate::random::smart_draw;
use rand::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Infection {
    genome: ParasiteGenome,
    age: f64,
}

impl Infection {
    pub fn genome(&self) -> &ParasiteGenome {
        &self.genome
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Host {
    id: u64,
    infections: Vec<Infection>,
}

impl Host {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            infections: Vec::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn infections(&self) -> &[Infection] {
        &self.infections
    }

    pub fn is_infected(&self) -> bool {
        !self.infections.is_empty()
    }

    /// Start a new infection with `genome` and the given age.
    pub fn infect(&mut self, genome: ParasiteGenome, age: f64) {
        self.infections.push(Infection { genome, age });
    }

    /// Mature gametocytes currently circulating in the host.
    pub fn gametocyte_pools(&self, ids: &mut IdGenerator, cfg: &HostsConfig) -> GametocytePools {
        let mut pools = GametocytePools {
            host_id: self.id,
            inv_microliters_blood: 1.0 / cfg.microliters_blood,
            ..Default::default()
        };

        let mut n_female = 0;
        for infection in &self.infections {
            if infection.age < cfg.gametocyte_delay {
                continue;
            }
            if cfg.female_gametocytes_per_infection > 0 {
                pools.female.push(ParasiteCohort::new(
                    ids.next_parasite_id(),
                    ParasiteState::GametocyteFemale,
                    infection.genome.clone(),
                    cfg.female_gametocytes_per_infection,
                ));
                n_female += u64::from(cfg.female_gametocytes_per_infection);
            }
            if cfg.male_gametocytes_per_infection > 0 {
                pools.male.push(ParasiteCohort::new(
                    ids.next_parasite_id(),
                    ParasiteState::GametocyteMale,
                    infection.genome.clone(),
                    cfg.male_gametocytes_per_infection,
                ));
            }
        }

        if n_female > 0 {
            let density = n_female as f64 * pools.inv_microliters_blood;
            pools.infectiousness = 1.0 - (-cfg.infectiousness_rate * density).exp();
        }
        pools
    }

    /// Entry describing the host to today's bite index.
    pub fn bite_entry(
        &self,
        ids: &mut IdGenerator,
        cfg: &HostsConfig,
        effects: &VectorEffects,
    ) -> HostEntry {
        HostEntry {
            host_id: self.id,
            indoor_probability: GeneticProbability::new(cfg.indoor_weight),
            outdoor_probability: GeneticProbability::new(cfg.outdoor_weight),
            effects: effects.clone(),
            gametocytes: self.gametocyte_pools(ids, cfg),
        }
    }

    /// Challenge the host with the sporozoites delivered today.
    ///
    /// Each sporozoite establishes an infection independently; a cohort
    /// succeeds if at least one of its members does. Returns the number of
    /// new infections.
    pub fn receive<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        sporozoites: &[ParasiteCohort],
        cfg: &HostsConfig,
    ) -> usize {
        let mut n_new = 0;
        for cohort in sporozoites {
            let p_escape =
                (1.0 - cfg.infection_probability_per_bite).powf(cohort.population() as f64);
            if smart_draw(rng, 1.0 - p_escape) {
                log::debug!(
                    "host {} infected with genome {} from bite {:?}",
                    self.id,
                    cohort.genome(),
                    cohort.bite_id()
                );
                self.infect(cohort.genome().clone(), 0.0);
                n_new += 1;
            }
        }
        n_new
    }

    /// Age every infection and clear the expired ones.
    pub fn update(&mut self, dt: f64, cfg: &HostsConfig) {
        for infection in &mut self.infections {
            infection.age += dt;
        }
        self.infections
            .retain(|infection| infection.age < cfg.infection_duration);
    }
}

/// Feeding mortality every host imposes, with per-genome overrides.
pub fn vector_effects(cfg: &HostsConfig) -> VectorEffects {
    let mut effects = VectorEffects {
        indoor: RouteEffects {
            die_during_feeding: GeneticProbability::new(cfg.indoor.die_during_feeding),
            die_after_feeding: GeneticProbability::new(cfg.indoor.die_after_feeding),
        },
        outdoor: RouteEffects {
            die_during_feeding: GeneticProbability::new(cfg.outdoor.die_during_feeding),
            die_after_feeding: GeneticProbability::new(cfg.outdoor.die_after_feeding),
        },
    };

    for o in &cfg.effect_overrides {
        let route = match o.route {
            FeedingRoute::Indoor => &mut effects.indoor,
            FeedingRoute::Outdoor => &mut effects.outdoor,
        };
        let genome = VectorGenome(o.vector_genome);
        route.die_during_feeding = std::mem::take(&mut route.die_during_feeding)
            .with_override(o.species, genome, o.die_during_feeding);
        route.die_after_feeding = std::mem::take(&mut route.die_after_feeding)
            .with_override(o.species, genome, o.die_after_feeding);
    }
    effects
}
