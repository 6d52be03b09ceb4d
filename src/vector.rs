//! Parasites carried by a single vector.

use crate::bite_index::GametocytePools;
use crate::cohort::{ParasiteCohort, ParasiteState, merge_or_push};
use crate::genetics::ParasiteGenetics;
use crate::ids::IdGenerator;
use crate::modifiers::{VectorGenome, VectorTrait};
use crate::random;
use anyhow::{Context, Result, ensure};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::mem;

/// Infection status of a vector.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
pub enum VectorState {
    #[default]
    Adult,
    Infected,
    Infectious,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct VectorParasiteState {
    oocysts: Vec<ParasiteCohort>,
    sporozoites: Vec<ParasiteCohort>,
    /// Oocysts formed by a feed and not yet through an update.
    new_oocysts: Vec<ParasiteCohort>,
    state: VectorState,

    #[serde(skip)]
    infectious_to_adult: bool,
    #[serde(skip)]
    infectious_to_infected: bool,
    #[serde(skip)]
    n_maturing_oocysts: u32,
    #[serde(skip)]
    sum_oocyst_duration: f64,
}

impl VectorParasiteState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> VectorState {
        self.state
    }

    /// Advance every parasite cohort by one step and refresh the vector state.
    pub fn update<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        ids: &mut IdGenerator,
        genetics: &ParasiteGenetics,
        vector_genome: VectorGenome,
        dt: f64,
        progress: f64,
    ) -> Result<()> {
        self.update_sporozoites(rng, genetics, vector_genome, dt, progress)
            .context("failed to update sporozoites")?;
        self.update_oocysts(rng, ids, genetics, vector_genome, dt, progress)
            .context("failed to update oocysts")?;
        self.update_vector_state();
        Ok(())
    }

    pub fn update_sporozoites<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        genetics: &ParasiteGenetics,
        vector_genome: VectorGenome,
        dt: f64,
        progress: f64,
    ) -> Result<()> {
        let modifiers = genetics.trait_modifiers();
        for cohort in &mut self.sporozoites {
            let mortality_modifier = modifiers.modifier(
                VectorTrait::SporozoiteMortality,
                vector_genome,
                cohort.genome().barcode_hashcode(),
                None,
            );
            cohort.update(rng, dt, progress, mortality_modifier, genetics)?;
        }
        self.sporozoites.retain(|cohort| !cohort.is_empty());
        Ok(())
    }

    pub fn update_oocysts<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        ids: &mut IdGenerator,
        genetics: &ParasiteGenetics,
        vector_genome: VectorGenome,
        dt: f64,
        progress: f64,
    ) -> Result<()> {
        self.n_maturing_oocysts = 0;
        self.sum_oocyst_duration = 0.0;

        let staged = mem::take(&mut self.new_oocysts);

        let modifiers = genetics.trait_modifiers();
        for mut cohort in mem::take(&mut self.oocysts) {
            let progress_modifier = modifiers.modifier(
                VectorTrait::OocystProgression,
                vector_genome,
                cohort.genome().barcode_hashcode(),
                cohort.male_genome().map(|genome| genome.barcode_hashcode()),
            );
            cohort.update(rng, dt, progress * progress_modifier, 1.0, genetics)?;

            if cohort.is_empty() {
                continue;
            }
            if cohort.state() == ParasiteState::Oocyst {
                self.oocysts.push(cohort);
                continue;
            }

            self.n_maturing_oocysts += 1;
            self.sum_oocyst_duration += cohort.oocyst_duration();

            let mut products = Vec::new();
            cohort.recombination(rng, ids, genetics, &mut products)?;
            for product in std::iter::once(cohort).chain(products) {
                if !product.is_empty() {
                    merge_or_push(&mut self.sporozoites, product, genetics);
                }
            }
        }

        // Oocysts formed today start developing tomorrow.
        for oocyst in staged {
            merge_or_push(&mut self.oocysts, oocyst, genetics);
        }

        Ok(())
    }

    /// Recompute the state from the cohorts held and flag the transitions out of infectious.
    pub fn update_vector_state(&mut self) {
        let prev_state = self.state;
        self.state = if !self.sporozoites.is_empty() {
            VectorState::Infectious
        } else if !self.oocysts.is_empty() {
            VectorState::Infected
        } else {
            VectorState::Adult
        };

        self.infectious_to_adult =
            prev_state == VectorState::Infectious && self.state == VectorState::Adult;
        self.infectious_to_infected =
            prev_state == VectorState::Infectious && self.state == VectorState::Infected;
    }

    /// Carve out the sporozoites injected by one bite.
    ///
    /// The requested amount is clamped to the sporozoites available and shared
    /// among cohorts in proportion to their populations.
    pub fn get_sporozoites_for_bite<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        ids: &mut IdGenerator,
        genetics: &ParasiteGenetics,
        transmission_modifier: f64,
    ) -> Result<Vec<ParasiteCohort>> {
        if self.sporozoites.is_empty() {
            return Ok(Vec::new());
        }

        let requested = genetics.num_sporozoites_in_bite(rng)?;
        let requested = (f64::from(requested) * transmission_modifier).round().max(0.0) as u64;

        let pops: Vec<u64> = self
            .sporozoites
            .iter()
            .map(|cohort| u64::from(cohort.population()))
            .collect();
        let n_in_bite = requested.min(pops.iter().sum());
        if n_in_bite == 0 {
            return Ok(Vec::new());
        }

        let weights: Vec<f64> = pops.iter().map(|&pop| pop as f64).collect();
        let mut counts = random::multinomial(rng, n_in_bite, &weights)?;
        move_excess(&mut counts, &pops);

        let mut in_bite = Vec::new();
        for (cohort, &count) in self.sporozoites.iter_mut().zip(&counts) {
            if count > 0 {
                in_bite.push(cohort.split(ids.next_parasite_id(), count as u32)?);
            }
        }
        self.sporozoites.retain(|cohort| !cohort.is_empty());

        Ok(in_bite)
    }

    /// Try to infect the vector with gametocytes ingested from a host.
    ///
    /// Returns `false`, leaving the vector untouched, when the blood meal lacks
    /// gametocytes of either sex.
    pub fn extract_gametocytes<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        ids: &mut IdGenerator,
        genetics: &ParasiteGenetics,
        pools: &mut GametocytePools,
    ) -> Result<bool> {
        self.extract_gametocytes_with(rng, ids, genetics, pools, |rng| {
            genetics.num_oocysts_from_bite(rng)
        })
    }

    fn extract_gametocytes_with<R, F>(
        &mut self,
        rng: &mut R,
        ids: &mut IdGenerator,
        genetics: &ParasiteGenetics,
        pools: &mut GametocytePools,
        num_oocysts: F,
    ) -> Result<bool>
    where
        R: Rng + ?Sized,
        F: FnOnce(&mut R) -> Result<u32>,
    {
        ensure!(
            (!pools.female.is_empty() || !pools.male.is_empty()) && pools.infectiousness > 0.0,
            "host {} has no gametocytes to transmit",
            pools.host_id
        );

        let n_female_cohorts = pools.female.len();
        let pops: Vec<u64> = pools
            .female
            .iter()
            .chain(&pools.male)
            .map(|cohort| u64::from(cohort.population()))
            .collect();
        let total: u64 = pops.iter().sum();

        let n_ingested = ((genetics.microliters_per_bloodmeal() * pools.inv_microliters_blood
            * total as f64) as u64)
            .max(2);
        let weights: Vec<f64> = pops.iter().map(|&pop| pop as f64).collect();
        let mut ingested = random::multinomial(rng, n_ingested, &weights)?;
        for (count, &pop) in ingested.iter_mut().zip(&pops) {
            *count = (*count).min(pop);
        }
        let (female_ingested, male_ingested) = ingested.split_at(n_female_cohorts);

        if female_ingested.iter().sum::<u64>() == 0 || male_ingested.iter().sum::<u64>() == 0 {
            return Ok(false);
        }

        let n_oocysts = u64::from(num_oocysts(rng)?);
        let female_mating = random::multivariate_hypergeometric(rng, female_ingested, n_oocysts)?;
        let male_mating = random::multivariate_hypergeometric(rng, male_ingested, n_oocysts)?;

        let mut females = pairing_list(&female_mating);
        let males = pairing_list(&male_mating);
        females.shuffle(rng);

        let n_pairs = females.len().min(males.len());
        for (&i_female, &i_male) in females.iter().zip(&males) {
            let mut oocyst = pools.female[i_female].split(ids.next_parasite_id(), 1)?;
            oocyst.mate(&pools.male[i_male])?;
            log::trace!(
                "oocyst {} formed from female {} and male {}",
                oocyst.id(),
                oocyst.genome(),
                pools.male[i_male].genome()
            );
            merge_or_push(&mut self.new_oocysts, oocyst, genetics);
        }
        pools.female.retain(|cohort| !cohort.is_empty());

        Ok(n_pairs > 0)
    }

    pub fn oocyst_cohorts(&self) -> &[ParasiteCohort] {
        &self.oocysts
    }

    pub fn new_oocyst_cohorts(&self) -> &[ParasiteCohort] {
        &self.new_oocysts
    }

    pub fn sporozoite_cohorts(&self) -> &[ParasiteCohort] {
        &self.sporozoites
    }

    pub fn n_oocysts(&self) -> u64 {
        self.oocysts
            .iter()
            .chain(&self.new_oocysts)
            .map(|cohort| u64::from(cohort.population()))
            .sum()
    }

    pub fn n_sporozoites(&self) -> u64 {
        self.sporozoites
            .iter()
            .map(|cohort| u64::from(cohort.population()))
            .sum()
    }

    pub fn infectious_to_adult(&self) -> bool {
        self.infectious_to_adult
    }

    pub fn infectious_to_infected(&self) -> bool {
        self.infectious_to_infected
    }

    pub fn n_maturing_oocysts(&self) -> u32 {
        self.n_maturing_oocysts
    }

    pub fn sum_oocyst_duration(&self) -> f64 {
        self.sum_oocyst_duration
    }
}

/// Cap each count at its pool, moving the excess to pools with room left.
fn move_excess(counts: &mut [u64], pools: &[u64]) {
    let mut excess = 0;
    for (count, &pool) in counts.iter_mut().zip(pools) {
        if *count > pool {
            excess += *count - pool;
            *count = pool;
        }
    }
    for (count, &pool) in counts.iter_mut().zip(pools) {
        if excess == 0 {
            break;
        }
        let moved = (pool - *count).min(excess);
        *count += moved;
        excess -= moved;
    }
}

/// One entry per individual, holding the index of its cohort.
fn pairing_list(counts: &[u64]) -> Vec<usize> {
    counts
        .iter()
        .enumerate()
        .flat_map(|(i_cohort, &count)| std::iter::repeat_n(i_cohort, count as usize))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cohort::ParasiteState;
    use crate::genetics::test_genetics;
    use crate::genome::ParasiteGenome;
    use rand_chacha::ChaCha12Rng;

    const VG: VectorGenome = VectorGenome(0);
    const SPOROZOITES_PER_OOCYST: f64 = 250.0;

    /// Genetics whose oocysts always burst into the same number of sporozoites.
    fn constant_burst_genetics(base_model: bool) -> ParasiteGenetics {
        let mut cfg = crate::config::Config::example().genetics;
        cfg.enable_fpg_similarity_to_base = base_model;
        cfg.sporozoites_per_oocyst = random::ValueDistribution::Constant {
            value: SPOROZOITES_PER_OOCYST,
        };
        ParasiteGenetics::new(&cfg).unwrap()
    }

    fn genome(genetics: &ParasiteGenetics, barcode: &str) -> ParasiteGenome {
        ParasiteGenome::from_barcode(barcode, genetics.layout()).unwrap()
    }

    fn cohort(
        genetics: &ParasiteGenetics,
        ids: &mut IdGenerator,
        state: ParasiteState,
        barcode: &str,
        pop: u32,
    ) -> ParasiteCohort {
        ParasiteCohort::new(ids.next_parasite_id(), state, genome(genetics, barcode), pop)
    }

    fn pools(
        genetics: &ParasiteGenetics,
        ids: &mut IdGenerator,
        female: &[(&str, u32)],
        male: &[(&str, u32)],
    ) -> GametocytePools {
        GametocytePools {
            host_id: 42,
            female: female
                .iter()
                .map(|&(barcode, pop)| {
                    cohort(genetics, ids, ParasiteState::GametocyteFemale, barcode, pop)
                })
                .collect(),
            male: male
                .iter()
                .map(|&(barcode, pop)| {
                    cohort(genetics, ids, ParasiteState::GametocyteMale, barcode, pop)
                })
                .collect(),
            infectiousness: 1.0,
            // A bloodmeal ten times the host's blood volume ingests every gametocyte.
            inv_microliters_blood: 5.0,
        }
    }

    #[test]
    fn move_excess_preserves_total() {
        let mut counts = vec![5, 0, 1];
        move_excess(&mut counts, &[2, 3, 4]);
        assert_eq!(counts, vec![2, 3, 1]);
        assert_eq!(pairing_list(&[2, 0, 1]), vec![0, 0, 2]);
    }

    #[test]
    fn bite_from_single_cohort_keeps_genome() {
        let genetics = test_genetics(false);
        let mut ids = IdGenerator::new();
        let mut rng = ChaCha12Rng::seed_from_u64(5);

        for _ in 0..50 {
            let mut vps = VectorParasiteState::new();
            vps.sporozoites
                .push(cohort(&genetics, &mut ids, ParasiteState::Sporozoite, "GATTA", 50));
            let in_bite = vps
                .get_sporozoites_for_bite(&mut rng, &mut ids, &genetics, 1.0)
                .unwrap();

            assert_eq!(in_bite.len(), 1);
            let bite = &in_bite[0];
            assert!(bite.population() >= 1 && bite.population() <= 50);
            assert_eq!(bite.genome(), &genome(&genetics, "GATTA"));
            assert_eq!(bite.population() as u64 + vps.n_sporozoites(), 50);
        }
    }

    #[test]
    fn bite_total_is_clamped_to_available_sporozoites() {
        let genetics = test_genetics(false);
        let mut ids = IdGenerator::new();
        let mut rng = ChaCha12Rng::seed_from_u64(8);

        for _ in 0..50 {
            let mut vps = VectorParasiteState::new();
            for (barcode, pop) in [("AAAAA", 1), ("CCCCC", 2), ("GGGGG", 1)] {
                vps.sporozoites
                    .push(cohort(&genetics, &mut ids, ParasiteState::Sporozoite, barcode, pop));
            }
            // A large modifier always requests more than the four sporozoites held.
            let in_bite = vps
                .get_sporozoites_for_bite(&mut rng, &mut ids, &genetics, 100.0)
                .unwrap();
            let total: u32 = in_bite.iter().map(|c| c.population()).sum();
            assert_eq!(total, 4);
            assert!(vps.sporozoite_cohorts().is_empty());
        }
    }

    #[test]
    fn bite_total_matches_request_when_available() {
        let genetics = test_genetics(false);
        let mut ids = IdGenerator::new();
        let mut rng = ChaCha12Rng::seed_from_u64(9);

        let mut vps = VectorParasiteState::new();
        for (barcode, pop) in [("AAAAA", 10_000), ("CCCCC", 20_000)] {
            vps.sporozoites
                .push(cohort(&genetics, &mut ids, ParasiteState::Sporozoite, barcode, pop));
        }
        for _ in 0..20 {
            let before = vps.n_sporozoites();
            let in_bite = vps
                .get_sporozoites_for_bite(&mut rng, &mut ids, &genetics, 1.0)
                .unwrap();
            let total: u64 = in_bite.iter().map(|c| u64::from(c.population())).sum();
            assert!(total > 0);
            assert_eq!(before - vps.n_sporozoites(), total);
        }
    }

    #[test]
    fn zero_transmission_modifier_delivers_nothing() {
        let genetics = test_genetics(false);
        let mut ids = IdGenerator::new();
        let mut rng = ChaCha12Rng::seed_from_u64(9);
        let mut vps = VectorParasiteState::new();
        vps.sporozoites
            .push(cohort(&genetics, &mut ids, ParasiteState::Sporozoite, "AAAAA", 30));
        let in_bite = vps
            .get_sporozoites_for_bite(&mut rng, &mut ids, &genetics, 0.0)
            .unwrap();
        assert!(in_bite.is_empty());
        assert_eq!(vps.n_sporozoites(), 30);
    }

    #[test]
    fn extraction_without_males_does_not_infect() {
        let genetics = test_genetics(false);
        let mut ids = IdGenerator::new();
        let mut rng = ChaCha12Rng::seed_from_u64(3);
        let mut pools = pools(&genetics, &mut ids, &[("AAAAA", 1_000), ("CCCCC", 5)], &[]);

        let mut vps = VectorParasiteState::new();
        let infected = vps
            .extract_gametocytes(&mut rng, &mut ids, &genetics, &mut pools)
            .unwrap();
        assert!(!infected);
        assert!(vps.new_oocyst_cohorts().is_empty());
        assert_eq!(pools.female[0].population(), 1_000);
    }

    #[test]
    fn extraction_from_empty_host_is_a_contract_violation() {
        let genetics = test_genetics(false);
        let mut ids = IdGenerator::new();
        let mut rng = ChaCha12Rng::seed_from_u64(3);
        let mut pools = pools(&genetics, &mut ids, &[], &[]);

        let mut vps = VectorParasiteState::new();
        let error = vps
            .extract_gametocytes(&mut rng, &mut ids, &genetics, &mut pools)
            .unwrap_err();
        assert!(error.to_string().contains("host 42"));
    }

    #[test]
    fn extraction_pairs_females_with_the_single_male() {
        let genetics = test_genetics(false);
        let mut ids = IdGenerator::new();
        let female = [("AAAAA", 10), ("CCCCC", 20), ("GGGGG", 30)];
        let female_genomes: Vec<_> = female.iter().map(|&(b, _)| genome(&genetics, b)).collect();
        let male_genome = genome(&genetics, "TTTTT");

        for seed in 0..20 {
            let mut rng = ChaCha12Rng::seed_from_u64(seed);
            let mut pools = pools(&genetics, &mut ids, &female, &[("TTTTT", 5)]);
            let mut vps = VectorParasiteState::new();

            let infected = vps
                .extract_gametocytes_with(&mut rng, &mut ids, &genetics, &mut pools, |_| Ok(2))
                .unwrap();
            assert!(infected);

            let staged = vps.new_oocyst_cohorts();
            let total: u32 = staged.iter().map(|c| c.population()).sum();
            assert_eq!(total, 2);
            for oocyst in staged {
                assert_eq!(oocyst.state(), ParasiteState::Oocyst);
                assert!(female_genomes.contains(oocyst.genome()));
                assert_eq!(oocyst.male_genome(), Some(&male_genome));
            }
            let remaining: u32 = pools.female.iter().map(|c| c.population()).sum();
            assert_eq!(remaining, 58);

            // Staged oocysts are not active until the next update.
            assert_eq!(vps.state(), VectorState::Adult);
            assert!(vps.oocyst_cohorts().is_empty());
        }
    }

    #[test]
    fn staged_oocysts_join_without_developing() {
        let genetics = test_genetics(false);
        let mut ids = IdGenerator::new();
        let mut rng = ChaCha12Rng::seed_from_u64(12);

        let mut vps = VectorParasiteState::new();
        let mut female = cohort(&genetics, &mut ids, ParasiteState::GametocyteFemale, "AAAAA", 1);
        let male = cohort(&genetics, &mut ids, ParasiteState::GametocyteMale, "CCCCC", 1);
        female.mate(&male).unwrap();
        vps.new_oocysts.push(female);

        vps.update(&mut rng, &mut ids, &genetics, VG, 1.0, 0.5).unwrap();
        assert_eq!(vps.state(), VectorState::Infected);
        assert_eq!(vps.oocyst_cohorts()[0].age(), 0.0);
        assert!(vps.new_oocyst_cohorts().is_empty());

        vps.update(&mut rng, &mut ids, &genetics, VG, 1.0, 0.5).unwrap();
        assert_eq!(vps.oocyst_cohorts()[0].age(), 1.0);
        assert_eq!(vps.oocyst_cohorts()[0].oocyst_duration(), 1.0);
    }

    #[test]
    fn matching_oocysts_merge_into_one_sporozoite_cohort() {
        // Base model mode skips recombination so each oocyst yields one product.
        let genetics = constant_burst_genetics(true);
        let mut ids = IdGenerator::new();
        let mut rng = ChaCha12Rng::seed_from_u64(30);

        let mut vps = VectorParasiteState::new();
        for _ in 0..2 {
            let mut female =
                cohort(&genetics, &mut ids, ParasiteState::GametocyteFemale, "AAAAA", 1);
            let male = cohort(&genetics, &mut ids, ParasiteState::GametocyteMale, "AAAAA", 1);
            female.mate(&male).unwrap();
            vps.oocysts.push(female);
        }

        vps.update(&mut rng, &mut ids, &genetics, VG, 1.0, 1.0).unwrap();

        assert_eq!(vps.state(), VectorState::Infectious);
        assert_eq!(vps.n_maturing_oocysts(), 2);
        assert_eq!(vps.sum_oocyst_duration(), 2.0);
        assert_eq!(vps.sporozoite_cohorts().len(), 1);
        assert_eq!(
            vps.sporozoite_cohorts()[0].population(),
            2 * SPOROZOITES_PER_OOCYST as u32
        );
        assert_eq!(vps.n_sporozoites(), 2 * SPOROZOITES_PER_OOCYST as u64);
    }

    #[test]
    fn selfed_oocysts_merge_into_one_sporozoite_cohort() {
        let genetics = constant_burst_genetics(false);
        let mut ids = IdGenerator::new();
        let mut rng = ChaCha12Rng::seed_from_u64(31);

        let mut vps = VectorParasiteState::new();
        for _ in 0..2 {
            let mut female =
                cohort(&genetics, &mut ids, ParasiteState::GametocyteFemale, "ACGTA", 1);
            let male = cohort(&genetics, &mut ids, ParasiteState::GametocyteMale, "ACGTA", 1);
            female.mate(&male).unwrap();
            vps.oocysts.push(female);
        }

        vps.update(&mut rng, &mut ids, &genetics, VG, 1.0, 1.0).unwrap();

        let sporozoites = vps.sporozoite_cohorts();
        assert_eq!(sporozoites.len(), 1);
        assert_eq!(sporozoites[0].genome(), &genome(&genetics, "ACGTA"));
        assert_eq!(sporozoites[0].population(), 2 * SPOROZOITES_PER_OOCYST as u32);
        assert_eq!(sporozoites[0].male_genome(), None);
    }

    #[test]
    fn clearing_sporozoites_flags_transition() {
        let genetics = test_genetics(false);
        let mut ids = IdGenerator::new();
        let mut rng = ChaCha12Rng::seed_from_u64(2);

        let mut vps = VectorParasiteState::new();
        vps.sporozoites
            .push(cohort(&genetics, &mut ids, ParasiteState::Sporozoite, "AAAAA", 1));
        vps.update_vector_state();
        assert_eq!(vps.state(), VectorState::Infectious);

        let in_bite = vps
            .get_sporozoites_for_bite(&mut rng, &mut ids, &genetics, 1.0)
            .unwrap();
        assert_eq!(in_bite.len(), 1);

        vps.update(&mut rng, &mut ids, &genetics, VG, 1.0, 0.1).unwrap();
        assert_eq!(vps.state(), VectorState::Adult);
        assert!(vps.infectious_to_adult());
        assert!(!vps.infectious_to_infected());
    }
}
