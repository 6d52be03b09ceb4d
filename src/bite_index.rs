//! Per-day index of the hosts a vector can bite.
//!
//! The index is rebuilt at the start of every day and queried by every feeding
//! vector. Host entries are addressed by [`HostSlot`], a stable position in a
//! store whose capacity is fixed by [`NodeBiteIndex::reset`]; adding more hosts
//! than announced is an error instead of a reallocation.

use crate::cohort::ParasiteCohort;
use crate::ids::IdGenerator;
use crate::modifiers::{GeneticProbability, VectorGenome};
use anyhow::{Context, Result, bail, ensure};
use rand::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Where a feed takes place.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedingRoute {
    Indoor,
    Outdoor,
}

/// Stable handle of a host entry for the current day.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct HostSlot(usize);

/// Feeding mortality a host imposes on vectors through one route.
#[derive(Debug, Clone, Default)]
pub struct RouteEffects {
    pub die_during_feeding: GeneticProbability,
    pub die_after_feeding: GeneticProbability,
}

/// Effects of a host's interventions on the vectors that bite it.
#[derive(Debug, Clone, Default)]
pub struct VectorEffects {
    pub indoor: RouteEffects,
    pub outdoor: RouteEffects,
}

impl VectorEffects {
    pub fn route(&self, route: FeedingRoute) -> &RouteEffects {
        match route {
            FeedingRoute::Indoor => &self.indoor,
            FeedingRoute::Outdoor => &self.outdoor,
        }
    }
}

/// Mature gametocytes in a host's blood.
#[derive(Debug, Default)]
pub struct GametocytePools {
    pub host_id: u64,
    pub female: Vec<ParasiteCohort>,
    pub male: Vec<ParasiteCohort>,
    pub infectiousness: f64,
    pub inv_microliters_blood: f64,
}

/// Everything the index needs to know about a host.
#[derive(Debug)]
pub struct HostEntry {
    pub host_id: u64,
    pub indoor_probability: GeneticProbability,
    pub outdoor_probability: GeneticProbability,
    pub effects: VectorEffects,
    pub gametocytes: GametocytePools,
}

#[derive(Debug)]
struct Slot {
    host_id: u64,
    cum_indoor: GeneticProbability,
    cum_outdoor: GeneticProbability,
    effects: VectorEffects,
    gametocytes: GametocytePools,
    n_infectious_bites: u32,
    delivered: Vec<ParasiteCohort>,
}

#[derive(Debug, Default)]
pub struct NodeBiteIndex {
    slots: Vec<Slot>,
    capacity: usize,
    slot_of_host: FxHashMap<u64, usize>,
    total_indoor: GeneticProbability,
    total_outdoor: GeneticProbability,
}

impl NodeBiteIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the index and fix the number of hosts it accepts today.
    pub fn reset(&mut self, expected_hosts: usize) {
        self.slots.clear();
        self.slots.reserve_exact(expected_hosts);
        self.capacity = expected_hosts;
        self.slot_of_host.clear();
        self.total_indoor = GeneticProbability::default();
        self.total_outdoor = GeneticProbability::default();
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn add_host(&mut self, entry: HostEntry) -> Result<HostSlot> {
        let HostEntry {
            host_id,
            indoor_probability,
            outdoor_probability,
            effects,
            gametocytes,
        } = entry;

        if self.slots.len() >= self.capacity {
            bail!(
                "cannot add host {host_id}: bite index was reset for {} hosts",
                self.capacity
            );
        }
        if self.slot_of_host.contains_key(&host_id) {
            bail!("host {host_id} is already in the bite index");
        }

        self.total_indoor += &indoor_probability;
        self.total_outdoor += &outdoor_probability;

        let i_slot = self.slots.len();
        self.slots.push(Slot {
            host_id,
            cum_indoor: self.total_indoor.clone(),
            cum_outdoor: self.total_outdoor.clone(),
            effects,
            gametocytes,
            n_infectious_bites: 0,
            delivered: Vec::new(),
        });
        self.slot_of_host.insert(host_id, i_slot);

        Ok(HostSlot(i_slot))
    }

    /// Total probability of being bitten through a route.
    pub fn total_probability(
        &self,
        species: usize,
        genome: VectorGenome,
        route: FeedingRoute,
    ) -> f64 {
        match route {
            FeedingRoute::Indoor => self.total_indoor.value(species, genome),
            FeedingRoute::Outdoor => self.total_outdoor.value(species, genome),
        }
    }

    /// Pick the host bitten by a vector, weighted by bite probability.
    pub fn select_host<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        species: usize,
        genome: VectorGenome,
        route: FeedingRoute,
    ) -> Result<HostSlot> {
        ensure!(!self.slots.is_empty(), "cannot select a host from an empty bite index");
        let total = self.total_probability(species, genome, route);
        ensure!(
            total > 0.0,
            "no host can be bitten {route:?} by species {species} with genome {genome}"
        );
        let draw = rng.random::<f64>() * total;
        self.slot_for_draw(draw, species, genome, route)
    }

    /// Slot whose cumulative range `[previous total, own total)` contains `draw`.
    pub fn slot_for_draw(
        &self,
        draw: f64,
        species: usize,
        genome: VectorGenome,
        route: FeedingRoute,
    ) -> Result<HostSlot> {
        ensure!(!self.slots.is_empty(), "cannot select a host from an empty bite index");
        let total = self.total_probability(species, genome, route);
        ensure!(
            (0.0..=total).contains(&draw),
            "draw {draw} is outside the total bite probability {total}"
        );

        let cum = |slot: &Slot| match route {
            FeedingRoute::Indoor => slot.cum_indoor.value(species, genome),
            FeedingRoute::Outdoor => slot.cum_outdoor.value(species, genome),
        };

        let mut i_slot = self.slots.partition_point(|slot| cum(slot) <= draw);
        if i_slot == self.slots.len() {
            // A draw equal to the total belongs to the last host with a non-empty range.
            i_slot = self.slots.partition_point(|slot| cum(slot) < draw);
        }
        ensure!(i_slot < self.slots.len(), "draw {draw} selected no host");

        Ok(HostSlot(i_slot))
    }

    pub fn host_id(&self, slot: HostSlot) -> u64 {
        self.slots[slot.0].host_id
    }

    pub fn effects(&self, slot: HostSlot) -> &VectorEffects {
        &self.slots[slot.0].effects
    }

    fn slot_mut(&mut self, host_id: u64) -> Result<&mut Slot> {
        let &i_slot = self
            .slot_of_host
            .get(&host_id)
            .with_context(|| format!("host {host_id} is not in the bite index"))?;
        Ok(&mut self.slots[i_slot])
    }

    /// Record the sporozoites delivered to a host by one bite.
    ///
    /// Returns the host's gametocytes so the caller can infect the vector.
    pub fn record_bite(
        &mut self,
        host_id: u64,
        vector_id: u64,
        sporozoites: Vec<ParasiteCohort>,
        ids: &mut IdGenerator,
    ) -> Result<&mut GametocytePools> {
        let slot = self
            .slot_mut(host_id)
            .with_context(|| format!("failed to record bite of vector {vector_id}"))?;

        if !sporozoites.is_empty() {
            slot.n_infectious_bites += 1;
            let bite_id = ids.next_bite_id();
            for mut cohort in sporozoites {
                log::trace!(
                    "vector {vector_id} delivered {} sporozoites of genome {} \
                     to host {host_id} in bite {bite_id}",
                    cohort.population(),
                    cohort.genome()
                );
                cohort.set_bite_id(bite_id);
                slot.delivered.push(cohort);
            }
        }

        Ok(&mut slot.gametocytes)
    }

    /// Sporozoite cohorts and infectious bites a host received today.
    pub fn delivered(&self, host_id: u64) -> Result<(&[ParasiteCohort], u32)> {
        let &i_slot = self
            .slot_of_host
            .get(&host_id)
            .with_context(|| format!("host {host_id} is not in the bite index"))?;
        let slot = &self.slots[i_slot];
        Ok((&slot.delivered, slot.n_infectious_bites))
    }

    /// Hand over the sporozoites delivered to every host, emptying the index.
    pub fn take_delivered(&mut self) -> Vec<(u64, Vec<ParasiteCohort>, u32)> {
        self.slots
            .iter_mut()
            .map(|slot| {
                (
                    slot.host_id,
                    std::mem::take(&mut slot.delivered),
                    std::mem::take(&mut slot.n_infectious_bites),
                )
            })
            .collect()
    }
}
