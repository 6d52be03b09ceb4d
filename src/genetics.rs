//! Parasite-level genetics parameters shared by every vector of a node.

use crate::config::GeneticsConfig;
use crate::genome::{self, CrossoverParams, GenomeLayout, ParasiteGenome};
use crate::modifiers::TraitModifiers;
use crate::random::{self, ValueDistribution};
use anyhow::{Context, Result};
use rand::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct ParasiteGenetics {
    layout: GenomeLayout,
    trait_modifiers: TraitModifiers,

    sporozoite_mortality_rate: f64,
    num_sporozoites_in_bite_fail: f64,
    probability_sporozoite_in_bite_fails: f64,
    num_oocyst_from_bite_fail: f64,
    probability_oocyst_from_bite_fails: f64,
    sporozoites_per_oocyst: ValueDistribution,
    crossover: CrossoverParams,
    microliters_per_bloodmeal: f64,

    base_model: bool,
}

impl ParasiteGenetics {
    pub fn new(cfg: &GeneticsConfig) -> Result<Self> {
        let layout = cfg.layout().context("failed to construct genome layout")?;
        let trait_modifiers = TraitModifiers::new(&cfg.trait_modifiers, &layout)
            .context("failed to construct trait modifiers")?;

        Ok(Self {
            layout,
            trait_modifiers,
            sporozoite_mortality_rate: 1.0 / cfg.sporozoite_life_expectancy,
            num_sporozoites_in_bite_fail: cfg.num_sporozoites_in_bite_fail,
            probability_sporozoite_in_bite_fails: cfg.probability_sporozoite_in_bite_fails,
            num_oocyst_from_bite_fail: cfg.num_oocyst_from_bite_fail,
            probability_oocyst_from_bite_fails: cfg.probability_oocyst_from_bite_fails,
            sporozoites_per_oocyst: cfg.sporozoites_per_oocyst.clone(),
            crossover: CrossoverParams {
                gamma_k: cfg.crossover_gamma_k,
                gamma_theta: cfg.crossover_gamma_theta,
            },
            microliters_per_bloodmeal: cfg.microliters_per_bloodmeal,
            base_model: cfg.enable_fpg_similarity_to_base,
        })
    }

    pub fn layout(&self) -> &GenomeLayout {
        &self.layout
    }

    pub fn trait_modifiers(&self) -> &TraitModifiers {
        &self.trait_modifiers
    }

    /// Whether the dynamics mimic the model without parasite genetics.
    pub fn is_base_model(&self) -> bool {
        self.base_model
    }

    pub fn microliters_per_bloodmeal(&self) -> f64 {
        self.microliters_per_bloodmeal
    }

    /// Sporozoites that survive `dt` days.
    pub fn reduce_sporozoites_due_to_death<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        dt: f64,
        n_sporozoites: u32,
        mortality_modifier: f64,
    ) -> Result<u32> {
        if self.base_model {
            return Ok(n_sporozoites);
        }
        let prob = (1.0 - (-dt * self.sporozoite_mortality_rate).exp()) * mortality_modifier;
        let n_dead = random::binomial(rng, u64::from(n_sporozoites), prob)? as u32;
        Ok(n_sporozoites.saturating_sub(n_dead))
    }

    pub fn convert_oocysts_to_sporozoites<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        n_oocysts: u32,
    ) -> Result<u32> {
        let per_oocyst = self.sporozoites_per_oocyst.sample(rng)?;
        Ok((f64::from(n_oocysts) * per_oocyst).min(f64::from(u32::MAX)) as u32)
    }

    /// Sporozoites injected by one bite (never zero).
    pub fn num_sporozoites_in_bite<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<u32> {
        nonzero_negative_binomial(
            rng,
            self.num_sporozoites_in_bite_fail,
            self.probability_sporozoite_in_bite_fails,
        )
    }

    /// Oocysts formed by one infectious feed (never zero).
    pub fn num_oocysts_from_bite<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<u32> {
        nonzero_negative_binomial(
            rng,
            self.num_oocyst_from_bite_fail,
            self.probability_oocyst_from_bite_fails,
        )
    }

    /// Meiotic products of a cross, or the female genome alone in base-model mode.
    pub fn recombine<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        female: &ParasiteGenome,
        male: &ParasiteGenome,
    ) -> Result<Vec<ParasiteGenome>> {
        if self.base_model {
            return Ok(vec![female.clone()]);
        }
        genome::recombine(rng, &self.layout, self.crossover, female, male)
    }
}

fn nonzero_negative_binomial<R: Rng + ?Sized>(
    rng: &mut R,
    successes: f64,
    prob: f64,
) -> Result<u32> {
    loop {
        let val = random::negative_binomial(rng, successes, prob)?;
        if val > 0 {
            return Ok(val.min(u64::from(u32::MAX)) as u32);
        }
    }
}

#[cfg(test)]
pub fn test_genetics(base_model: bool) -> ParasiteGenetics {
    let mut cfg = crate::config::Config::example().genetics;
    cfg.enable_fpg_similarity_to_base = base_model;
    ParasiteGenetics::new(&cfg).unwrap()
}
