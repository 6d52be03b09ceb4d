//! Resolution of one feeding attempt of a vector.
//!
//! A single uniform draw decides the outcome of the attempt. Its range is cut
//! into consecutive intervals: die before feeding, host not available, then
//! the host-specific die during feeding, die after feeding and success. The
//! host-specific intervals are rescaled to fill what remains of the unit range
//! once the bitten host is known.

use crate::bite_index::{FeedingRoute, NodeBiteIndex, RouteEffects};
use crate::genetics::ParasiteGenetics;
use crate::ids::IdGenerator;
use crate::modifiers::{VectorGenome, VectorTrait};
use crate::random::smart_draw;
use crate::vector::{VectorParasiteState, VectorState};
use anyhow::{Context, Result};
use rand::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum FeedingOutcome {
    DiedBeforeFeeding,
    NotAvailable,
    DiedDuringFeeding,
    DiedAfterFeeding,
    Fed,
}

impl FeedingOutcome {
    pub fn vector_dies(self) -> bool {
        matches!(
            self,
            Self::DiedBeforeFeeding | Self::DiedDuringFeeding | Self::DiedAfterFeeding
        )
    }
}

/// Population-level feeding probabilities of a species.
#[derive(Debug, Clone)]
pub struct FeedingProbabilities {
    pub die_before_feeding: f64,
    pub not_available: f64,
    pub outdoor_returning_mortality: f64,
    pub infectious_feeding_mortality_factor: f64,
}

impl FeedingProbabilities {
    /// Outcome decided before a host is chosen, if any.
    fn population_outcome(&self, draw: f64) -> Option<FeedingOutcome> {
        if draw < self.die_before_feeding {
            Some(FeedingOutcome::DiedBeforeFeeding)
        } else if draw < self.die_before_feeding + self.not_available {
            Some(FeedingOutcome::NotAvailable)
        } else {
            None
        }
    }
}

/// Feeding probabilities imposed by the bitten host.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct HostFeedProbabilities {
    pub die_during_feeding: f64,
    pub die_after_feeding: f64,
    pub successful_feed: f64,
}

impl HostFeedProbabilities {
    pub fn new(
        effects: &RouteEffects,
        probs: &FeedingProbabilities,
        species: usize,
        genome: VectorGenome,
        route: FeedingRoute,
        state: VectorState,
    ) -> Self {
        let mut die_during = effects.die_during_feeding.value(species, genome);
        let mut die_after = effects.die_after_feeding.value(species, genome);
        let mut success = (1.0 - die_during - die_after).max(0.0);

        if route == FeedingRoute::Outdoor {
            die_after += success * probs.outdoor_returning_mortality;
            success *= 1.0 - probs.outdoor_returning_mortality;
        }

        if state == VectorState::Infectious {
            let boosted = (die_during * probs.infectious_feeding_mortality_factor).min(1.0);
            let correction = if die_during < 1.0 {
                (1.0 - boosted) / (1.0 - die_during)
            } else {
                1.0
            };
            die_during = boosted;
            die_after *= correction;
            success *= correction;
        }

        Self {
            die_during_feeding: die_during,
            die_after_feeding: die_after,
            successful_feed: success,
        }
    }

    /// Outcome of a draw that fell past the population-level intervals.
    fn outcome(&self, draw: f64, start: f64) -> FeedingOutcome {
        let sum = self.die_during_feeding + self.die_after_feeding + self.successful_feed;
        if sum <= 0.0 {
            return FeedingOutcome::Fed;
        }
        let scale = (1.0 - start) / sum;
        let during = start + self.die_during_feeding * scale;
        let after = during + self.die_after_feeding * scale;
        if draw < during {
            FeedingOutcome::DiedDuringFeeding
        } else if draw < after {
            FeedingOutcome::DiedAfterFeeding
        } else {
            FeedingOutcome::Fed
        }
    }
}

/// Bites of a species by the state of the biting vector.
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
pub struct BiteCounters {
    pub adult: u64,
    pub infected: u64,
    pub infectious: u64,
}

impl BiteCounters {
    pub fn count(&mut self, state: VectorState) {
        match state {
            VectorState::Adult => self.adult += 1,
            VectorState::Infected => self.infected += 1,
            VectorState::Infectious => self.infectious += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.adult + self.infected + self.infectious
    }
}

/// Node collaborators used while resolving feeds.
pub struct FeedingContext<'a> {
    pub index: &'a mut NodeBiteIndex,
    pub ids: &'a mut IdGenerator,
    pub genetics: &'a ParasiteGenetics,
}

/// The vector attempting to feed.
pub struct FeedingVector<'a> {
    pub id: u64,
    pub species: usize,
    pub genome: VectorGenome,
    pub parasites: &'a mut VectorParasiteState,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub struct FeedingReport {
    pub outcome: FeedingOutcome,
    pub host_id: Option<u64>,
    pub n_sporozoites: u64,
    pub infected: bool,
}

/// Resolve one feeding attempt through `route`.
pub fn feed_vector<R: Rng + ?Sized>(
    rng: &mut R,
    ctx: &mut FeedingContext<'_>,
    vector: FeedingVector<'_>,
    probs: &FeedingProbabilities,
    route: FeedingRoute,
    counters: &mut BiteCounters,
) -> Result<FeedingReport> {
    let FeedingVector {
        id: vector_id,
        species,
        genome,
        parasites,
    } = vector;
    let state = parasites.state();

    let draw = rng.random::<f64>();
    if let Some(outcome) = probs.population_outcome(draw) {
        return Ok(FeedingReport {
            outcome,
            host_id: None,
            n_sporozoites: 0,
            infected: false,
        });
    }

    let slot = ctx
        .index
        .select_host(rng, species, genome, route)
        .with_context(|| format!("vector {vector_id} failed to select a host"))?;
    let host_id = ctx.index.host_id(slot);

    let host_probs = HostFeedProbabilities::new(
        ctx.index.effects(slot).route(route),
        probs,
        species,
        genome,
        route,
        state,
    );
    let outcome = host_probs.outcome(draw, probs.die_before_feeding + probs.not_available);
    counters.count(state);

    let modifiers = ctx.genetics.trait_modifiers();
    let sporozoites = if state == VectorState::Infectious {
        let modifier = modifiers.vector_modifier(VectorTrait::TransmissionToHuman, genome);
        parasites
            .get_sporozoites_for_bite(rng, ctx.ids, ctx.genetics, modifier)
            .with_context(|| format!("failed to sample sporozoites of vector {vector_id}"))?
    } else {
        Vec::new()
    };
    let n_sporozoites = sporozoites
        .iter()
        .map(|cohort| u64::from(cohort.population()))
        .sum();

    let pools = ctx
        .index
        .record_bite(host_id, vector_id, sporozoites, ctx.ids)?;

    // Without genetics only uninfected vectors acquire new infections.
    let allowed = !ctx.genetics.is_base_model() || state == VectorState::Adult;

    let mut infected = false;
    if outcome == FeedingOutcome::Fed && pools.infectiousness > 0.0 && allowed {
        let modifier = modifiers.vector_modifier(VectorTrait::InfectedByHuman, genome);
        if smart_draw(rng, pools.infectiousness * modifier) {
            infected = parasites
                .extract_gametocytes(rng, ctx.ids, ctx.genetics, pools)
                .with_context(|| {
                    format!("failed to infect vector {vector_id} from host {host_id}")
                })?;
        }
    }

    Ok(FeedingReport {
        outcome,
        host_id: Some(host_id),
        n_sporozoites,
        infected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bite_index::{GametocytePools, HostEntry, VectorEffects};
    use crate::cohort::{ParasiteCohort, ParasiteState};
    use crate::genetics::test_genetics;
    use crate::genome::ParasiteGenome;
    use crate::modifiers::GeneticProbability;
    use rand_chacha::ChaCha12Rng;

    const VG: VectorGenome = VectorGenome(0);

    fn probs(die_before: f64, not_available: f64) -> FeedingProbabilities {
        FeedingProbabilities {
            die_before_feeding: die_before,
            not_available,
            outdoor_returning_mortality: 0.5,
            infectious_feeding_mortality_factor: 2.0,
        }
    }

    fn effects(die_during: f64, die_after: f64) -> RouteEffects {
        RouteEffects {
            die_during_feeding: GeneticProbability::new(die_during),
            die_after_feeding: GeneticProbability::new(die_after),
        }
    }

    fn host(
        genetics: &ParasiteGenetics,
        ids: &mut IdGenerator,
        host_id: u64,
        infectious: bool,
    ) -> HostEntry {
        let genome = |barcode| ParasiteGenome::from_barcode(barcode, genetics.layout()).unwrap();
        let mut gametocytes = GametocytePools {
            host_id,
            inv_microliters_blood: 5.0,
            ..Default::default()
        };
        if infectious {
            let (f_id, m_id) = (ids.next_parasite_id(), ids.next_parasite_id());
            let female =
                ParasiteCohort::new(f_id, ParasiteState::GametocyteFemale, genome("AAAAA"), 100);
            let male =
                ParasiteCohort::new(m_id, ParasiteState::GametocyteMale, genome("CCCCC"), 100);
            gametocytes.female = vec![female];
            gametocytes.male = vec![male];
            gametocytes.infectiousness = 1.0;
        }
        HostEntry {
            host_id,
            indoor_probability: GeneticProbability::new(1.0),
            outdoor_probability: GeneticProbability::new(1.0),
            effects: VectorEffects::default(),
            gametocytes,
        }
    }

    #[test]
    fn population_intervals_come_first() {
        let probs = probs(0.1, 0.2);
        assert_eq!(probs.population_outcome(0.05), Some(FeedingOutcome::DiedBeforeFeeding));
        assert_eq!(probs.population_outcome(0.1), Some(FeedingOutcome::NotAvailable));
        assert_eq!(probs.population_outcome(0.29), Some(FeedingOutcome::NotAvailable));
        assert_eq!(probs.population_outcome(0.3), None);
    }

    #[test]
    fn host_intervals_fill_the_remaining_range() {
        let probs = probs(0.1, 0.2);
        let host = HostFeedProbabilities::new(
            &effects(0.2, 0.3),
            &probs,
            0,
            VG,
            FeedingRoute::Indoor,
            VectorState::Adult,
        );
        assert_eq!(host.successful_feed, 0.5);

        // The remaining range [0.3, 1) is split 0.2 : 0.3 : 0.5.
        assert_eq!(host.outcome(0.3, 0.3), FeedingOutcome::DiedDuringFeeding);
        assert_eq!(host.outcome(0.43, 0.3), FeedingOutcome::DiedDuringFeeding);
        assert_eq!(host.outcome(0.45, 0.3), FeedingOutcome::DiedAfterFeeding);
        assert_eq!(host.outcome(0.64, 0.3), FeedingOutcome::DiedAfterFeeding);
        assert_eq!(host.outcome(0.66, 0.3), FeedingOutcome::Fed);
        assert_eq!(host.outcome(0.999, 0.3), FeedingOutcome::Fed);
    }

    #[test]
    fn outdoor_and_infectious_feeds_are_riskier() {
        let probs = probs(0.0, 0.0);
        let outdoor = HostFeedProbabilities::new(
            &effects(0.2, 0.0),
            &probs,
            0,
            VG,
            FeedingRoute::Outdoor,
            VectorState::Adult,
        );
        assert_eq!(outdoor.die_after_feeding, 0.4);
        assert_eq!(outdoor.successful_feed, 0.4);

        let infectious = HostFeedProbabilities::new(
            &effects(0.2, 0.0),
            &probs,
            0,
            VG,
            FeedingRoute::Indoor,
            VectorState::Infectious,
        );
        assert_eq!(infectious.die_during_feeding, 0.4);
        let sum = infectious.die_during_feeding
            + infectious.die_after_feeding
            + infectious.successful_feed;
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn infectious_vector_delivers_sporozoites() {
        let genetics = test_genetics(false);
        let mut ids = IdGenerator::new();
        let mut rng = ChaCha12Rng::seed_from_u64(6);
        let mut index = NodeBiteIndex::new();
        index.reset(1);
        index.add_host(host(&genetics, &mut ids, 7, false)).unwrap();

        // Infect the vector from a separate host and let the oocysts mature.
        let mut parasites = VectorParasiteState::new();
        let mut source = host(&genetics, &mut ids, 99, true).gametocytes;
        assert!(
            parasites
                .extract_gametocytes(&mut rng, &mut ids, &genetics, &mut source)
                .unwrap()
        );
        for _ in 0..2 {
            parasites
                .update(&mut rng, &mut ids, &genetics, VG, 1.0, 1.0)
                .unwrap();
        }
        assert_eq!(parasites.state(), VectorState::Infectious);

        let mut counters = BiteCounters::default();
        let mut ctx = FeedingContext {
            index: &mut index,
            ids: &mut ids,
            genetics: &genetics,
        };
        let vector = FeedingVector {
            id: 3,
            species: 0,
            genome: VG,
            parasites: &mut parasites,
        };
        let report = feed_vector(
            &mut rng,
            &mut ctx,
            vector,
            &probs(0.0, 0.0),
            FeedingRoute::Indoor,
            &mut counters,
        )
        .unwrap();

        assert_eq!(report.outcome, FeedingOutcome::Fed);
        assert_eq!(report.host_id, Some(7));
        assert!(report.n_sporozoites > 0);
        assert!(!report.infected);
        assert_eq!(counters.infectious, 1);
        assert_eq!(counters.total(), 1);

        let (delivered, n_bites) = index.delivered(7).unwrap();
        assert_eq!(n_bites, 1);
        let delivered_total: u64 = delivered.iter().map(|c| u64::from(c.population())).sum();
        assert_eq!(delivered_total, report.n_sporozoites);
    }

    #[test]
    fn adult_vector_is_infected_by_infectious_host() {
        let genetics = test_genetics(false);
        let mut ids = IdGenerator::new();
        let mut rng = ChaCha12Rng::seed_from_u64(10);
        let mut index = NodeBiteIndex::new();
        index.reset(1);
        index.add_host(host(&genetics, &mut ids, 1, true)).unwrap();

        let mut parasites = VectorParasiteState::new();
        let mut counters = BiteCounters::default();
        let mut ctx = FeedingContext {
            index: &mut index,
            ids: &mut ids,
            genetics: &genetics,
        };
        let vector = FeedingVector {
            id: 3,
            species: 0,
            genome: VG,
            parasites: &mut parasites,
        };
        let report = feed_vector(
            &mut rng,
            &mut ctx,
            vector,
            &probs(0.0, 0.0),
            FeedingRoute::Indoor,
            &mut counters,
        )
        .unwrap();

        assert_eq!(report.outcome, FeedingOutcome::Fed);
        assert!(report.infected);
        assert_eq!(counters.adult, 1);
        assert!(!parasites.new_oocyst_cohorts().is_empty());
        assert_eq!(parasites.state(), VectorState::Adult);
    }

    #[test]
    fn unavailable_host_skips_host_selection() {
        let genetics = test_genetics(false);
        let mut ids = IdGenerator::new();
        let mut rng = ChaCha12Rng::seed_from_u64(10);
        // An empty index would fail if a host were selected.
        let mut index = NodeBiteIndex::new();
        index.reset(0);

        let mut parasites = VectorParasiteState::new();
        let mut counters = BiteCounters::default();
        let mut ctx = FeedingContext {
            index: &mut index,
            ids: &mut ids,
            genetics: &genetics,
        };
        let vector = FeedingVector {
            id: 3,
            species: 0,
            genome: VG,
            parasites: &mut parasites,
        };
        let report = feed_vector(
            &mut rng,
            &mut ctx,
            vector,
            &probs(0.0, 1.0),
            FeedingRoute::Indoor,
            &mut counters,
        )
        .unwrap();
        assert_eq!(report.outcome, FeedingOutcome::NotAvailable);
        assert_eq!(counters.total(), 0);
    }

    #[test]
    fn feeding_from_empty_index_fails() {
        let genetics = test_genetics(false);
        let mut ids = IdGenerator::new();
        let mut rng = ChaCha12Rng::seed_from_u64(10);
        let mut index = NodeBiteIndex::new();
        index.reset(0);

        let mut parasites = VectorParasiteState::new();
        let mut ctx = FeedingContext {
            index: &mut index,
            ids: &mut ids,
            genetics: &genetics,
        };
        let vector = FeedingVector {
            id: 3,
            species: 0,
            genome: VG,
            parasites: &mut parasites,
        };
        let error = feed_vector(
            &mut rng,
            &mut ctx,
            vector,
            &probs(0.0, 0.0),
            FeedingRoute::Indoor,
            &mut BiteCounters::default(),
        )
        .unwrap_err();
        assert!(format!("{error:#}").contains("vector 3"));
    }
}
