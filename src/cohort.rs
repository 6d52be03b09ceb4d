//! Cohorts of genetically identical parasites.

use crate::genetics::ParasiteGenetics;
use crate::genome::ParasiteGenome;
use crate::ids::IdGenerator;
use crate::random;
use anyhow::{Result, bail, ensure};
use rand::prelude::*;
use serde::{Deserialize, Serialize};

/// Life stage of a parasite cohort.
///
/// Stages only move forward: gametocyte, oocyst, sporozoite.
#[derive(Debug, PartialEq, Eq, Clone, Copy, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ParasiteState {
    GametocyteMale,
    GametocyteFemale,
    Oocyst,
    Sporozoite,
}

/// Parasites sharing genome, life stage and age, tracked as one counted unit.
///
/// Cohorts are moved, never cloned: a cohort merged into another or split out
/// of one is consumed by the operation.
#[derive(Debug, Serialize, Deserialize)]
pub struct ParasiteCohort {
    id: u64,
    state: ParasiteState,
    genome: ParasiteGenome,
    male_genome: Option<ParasiteGenome>,
    age: f64,
    progress: f64,
    oocyst_duration: f64,
    population: u32,
    bite_id: Option<u64>,
}

impl ParasiteCohort {
    pub fn new(id: u64, state: ParasiteState, genome: ParasiteGenome, population: u32) -> Self {
        Self {
            id,
            state,
            genome,
            male_genome: None,
            age: 0.0,
            progress: 0.0,
            oocyst_duration: 0.0,
            population,
            bite_id: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ParasiteState {
        self.state
    }

    pub fn genome(&self) -> &ParasiteGenome {
        &self.genome
    }

    pub fn male_genome(&self) -> Option<&ParasiteGenome> {
        self.male_genome.as_ref()
    }

    pub fn age(&self) -> f64 {
        self.age
    }

    pub fn oocyst_duration(&self) -> f64 {
        self.oocyst_duration
    }

    pub fn population(&self) -> u32 {
        self.population
    }

    pub fn is_empty(&self) -> bool {
        self.population == 0
    }

    pub fn bite_id(&self) -> Option<u64> {
        self.bite_id
    }

    pub fn set_bite_id(&mut self, bite_id: u64) {
        self.bite_id = Some(bite_id);
    }

    /// Advance the cohort by `dt` days.
    ///
    /// An oocyst cohort bursts into sporozoites once its accumulated progress
    /// reaches one; sporozoite cohorts lose parasites to mortality. A
    /// population of zero afterwards means the caller must drop the cohort.
    pub fn update<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        dt: f64,
        progress: f64,
        mortality_modifier: f64,
        genetics: &ParasiteGenetics,
    ) -> Result<()> {
        self.age += dt;

        match self.state {
            ParasiteState::Oocyst => {
                self.oocyst_duration += dt;
                self.progress += progress;
                if self.progress >= 1.0 {
                    self.state = ParasiteState::Sporozoite;
                    self.population =
                        genetics.convert_oocysts_to_sporozoites(rng, self.population)?;
                }
            }
            ParasiteState::Sporozoite => {
                self.population = genetics.reduce_sporozoites_due_to_death(
                    rng,
                    dt,
                    self.population,
                    mortality_modifier,
                )?;
            }
            ParasiteState::GametocyteMale | ParasiteState::GametocyteFemale => {}
        }

        Ok(())
    }

    fn can_merge(&self, other: &ParasiteCohort, genetics: &ParasiteGenetics) -> bool {
        if genetics.is_base_model() {
            return self.state == other.state && self.age == other.age;
        }
        self.state == other.state
            && self.genome == other.genome
            && self.male_genome == other.male_genome
    }

    /// Absorb `other` when it has the same state and genomes.
    ///
    /// A rejected cohort is handed back untouched.
    pub fn merge(
        &mut self,
        other: ParasiteCohort,
        genetics: &ParasiteGenetics,
    ) -> Result<(), ParasiteCohort> {
        if !self.can_merge(&other, genetics) {
            return Err(other);
        }
        self.population += other.population;
        Ok(())
    }

    /// Fertilize a single female gametocyte, turning it into an oocyst.
    pub fn mate(&mut self, male: &ParasiteCohort) -> Result<()> {
        ensure!(
            self.state == ParasiteState::GametocyteFemale,
            "cohort {} cannot mate in state {:?}",
            self.id,
            self.state
        );
        ensure!(
            self.population == 1,
            "cohort {} must hold a single gametocyte to mate, but holds {}",
            self.id,
            self.population
        );
        ensure!(
            male.state == ParasiteState::GametocyteMale,
            "cohort {} cannot fertilize cohort {} in state {:?}",
            male.id,
            self.id,
            male.state
        );

        self.state = ParasiteState::Oocyst;
        self.male_genome = Some(male.genome.clone());
        Ok(())
    }

    /// Recombine the genomes of a freshly matured oocyst.
    ///
    /// This cohort keeps the first meiotic product; the others are pushed onto
    /// `new_cohorts` with fresh ids. The population is split evenly at random
    /// among the products, so some of them may end up empty.
    pub fn recombination<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        ids: &mut IdGenerator,
        genetics: &ParasiteGenetics,
        new_cohorts: &mut Vec<ParasiteCohort>,
    ) -> Result<()> {
        if self.state != ParasiteState::Sporozoite {
            bail!("cohort {} cannot recombine in state {:?}", self.id, self.state);
        }
        let Some(male_genome) = self.male_genome.take() else {
            bail!("cohort {} has no male gametocyte genome to recombine with", self.id);
        };

        let genomes = genetics.recombine(rng, &self.genome, &male_genome)?;
        if genomes.len() == 1 {
            log::trace!("cohort {} matured without recombination", self.id);
            return Ok(());
        }

        let weights = vec![1.0; genomes.len()];
        let counts = random::multinomial(rng, u64::from(self.population), &weights)?;

        let mut products = genomes.into_iter().zip(counts);
        if let Some((genome, count)) = products.next() {
            self.genome = genome;
            self.population = count as u32;
        }
        for (genome, count) in products {
            log::trace!(
                "cohort {} produced {count} sporozoites with genome {genome}",
                self.id
            );
            new_cohorts.push(ParasiteCohort {
                id: ids.next_parasite_id(),
                state: self.state,
                genome,
                male_genome: None,
                age: self.age,
                progress: self.progress,
                oocyst_duration: self.oocyst_duration,
                population: count as u32,
                bite_id: None,
            });
        }

        Ok(())
    }

    /// Move `count` parasites into a new cohort with the same identity.
    pub fn split(&mut self, new_id: u64, count: u32) -> Result<ParasiteCohort> {
        if count == 0 || count > self.population {
            bail!(
                "cannot split {count} parasites from cohort {} with population {}",
                self.id,
                self.population
            );
        }
        self.population -= count;

        Ok(ParasiteCohort {
            id: new_id,
            state: self.state,
            genome: self.genome.clone(),
            male_genome: self.male_genome.clone(),
            age: self.age,
            progress: self.progress,
            oocyst_duration: self.oocyst_duration,
            population: count,
            bite_id: self.bite_id,
        })
    }
}

/// Merge `cohort` into the first compatible cohort of `cohorts`, or append it.
pub fn merge_or_push(
    cohorts: &mut Vec<ParasiteCohort>,
    mut cohort: ParasiteCohort,
    genetics: &ParasiteGenetics,
) {
    for existing in cohorts.iter_mut() {
        match existing.merge(cohort, genetics) {
            Ok(()) => return,
            Err(rejected) => cohort = rejected,
        }
    }
    cohorts.push(cohort);
}
