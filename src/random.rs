//! Sampling primitives shared by the parasite genetics engine.
//!
//! Every function draws from the caller's generator so that a node owns a
//! single reproducible stream. Draw order matters for reproducibility.

use anyhow::{Context, Result, bail, ensure};
use rand::prelude::*;
use rand_distr::{Binomial, Gamma, Hypergeometric, Normal, Poisson};
use serde::{Deserialize, Serialize};

/// Return `true` with probability `prob`, skipping the draw when the outcome is certain.
pub fn smart_draw<R: Rng + ?Sized>(rng: &mut R, prob: f64) -> bool {
    if prob <= 0.0 {
        false
    } else if prob >= 1.0 {
        true
    } else {
        rng.random::<f64>() < prob
    }
}

pub fn binomial<R: Rng + ?Sized>(rng: &mut R, n: u64, prob: f64) -> Result<u64> {
    if n == 0 || prob <= 0.0 {
        return Ok(0);
    }
    if prob >= 1.0 {
        return Ok(n);
    }
    let dist = Binomial::new(n, prob).context("failed to construct binomial distribution")?;
    Ok(dist.sample(rng))
}

pub fn poisson<R: Rng + ?Sized>(rng: &mut R, mean: f64) -> Result<u64> {
    if mean <= 0.0 {
        return Ok(0);
    }
    let dist = Poisson::new(mean).context("failed to construct poisson distribution")?;
    let val: f64 = dist.sample(rng);
    Ok(val as u64)
}

/// Number of failures before `successes` successes with success probability `prob`.
///
/// Drawn as a gamma-poisson mixture so that `successes` may be fractional.
pub fn negative_binomial<R: Rng + ?Sized>(rng: &mut R, successes: f64, prob: f64) -> Result<u64> {
    ensure!(
        successes > 0.0 && prob > 0.0 && prob <= 1.0,
        "negative binomial needs positive successes and probability in (0, 1], \
         got {successes} and {prob}"
    );
    let scale = (1.0 - prob) / prob;
    if scale <= 0.0 {
        return Ok(0);
    }
    let gamma = Gamma::new(successes, scale).context("failed to construct gamma distribution")?;
    let mean = gamma.sample(rng);
    poisson(rng, mean)
}

/// Distribute `n` trials over categories with the given (unnormalized) weights.
///
/// Implemented as a chain of conditional binomial draws. The counts always sum to `n`.
pub fn multinomial<R: Rng + ?Sized>(rng: &mut R, n: u64, weights: &[f64]) -> Result<Vec<u64>> {
    if weights.iter().any(|&w| !w.is_finite() || w < 0.0) {
        bail!("multinomial weights must be finite and non-negative, got {weights:?}");
    }
    let mut counts = vec![0; weights.len()];
    if n == 0 {
        return Ok(counts);
    }

    let total_mass: f64 = weights.iter().sum();
    let last_positive = weights
        .iter()
        .rposition(|&w| w > 0.0)
        .with_context(|| format!("cannot distribute {n} trials over zero total weight"))?;

    let mut remaining_n = n;
    let mut remaining_mass = total_mass;
    for (i_cat, &weight) in weights.iter().enumerate() {
        if remaining_n == 0 {
            break;
        }
        if i_cat == last_positive {
            counts[i_cat] = remaining_n;
            remaining_n = 0;
            break;
        }
        if weight <= 0.0 {
            continue;
        }
        let prob = (weight / remaining_mass).clamp(0.0, 1.0);
        let count = binomial(rng, remaining_n, prob)?;
        counts[i_cat] = count;
        remaining_n -= count;
        remaining_mass -= weight;
    }

    Ok(counts)
}

/// Draw `draws` items without replacement from pools of the given sizes.
///
/// Requests larger than the combined pool are clamped to the pool.
pub fn multivariate_hypergeometric<R: Rng + ?Sized>(
    rng: &mut R,
    pool_sizes: &[u64],
    draws: u64,
) -> Result<Vec<u64>> {
    let mut counts = vec![0; pool_sizes.len()];
    let mut remaining_total: u64 = pool_sizes.iter().sum();
    let mut remaining_draws = draws.min(remaining_total);

    for (i_pool, &size) in pool_sizes.iter().enumerate() {
        if remaining_draws == 0 {
            break;
        }
        let count = if size == 0 {
            0
        } else if size == remaining_total {
            remaining_draws
        } else {
            let dist = Hypergeometric::new(remaining_total, size, remaining_draws)
                .context("failed to construct hypergeometric distribution")?;
            dist.sample(rng)
        };
        counts[i_pool] = count;
        remaining_draws -= count;
        remaining_total -= size;
    }

    Ok(counts)
}

/// Configurable distribution of a non-negative quantity.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueDistribution {
    Constant { value: f64 },
    Gaussian { mean: f64, std_dev: f64 },
    Poisson { mean: f64 },
    Uniform { min: f64, max: f64 },
}

impl ValueDistribution {
    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::Constant { value } => ensure!(value >= 0.0, "value must be non-negative"),
            Self::Gaussian { mean, std_dev } => {
                ensure!(mean >= 0.0, "mean must be non-negative");
                ensure!(std_dev >= 0.0, "standard deviation must be non-negative");
            }
            Self::Poisson { mean } => ensure!(mean >= 0.0, "mean must be non-negative"),
            Self::Uniform { min, max } => {
                ensure!(min >= 0.0, "minimum must be non-negative");
                ensure!(min <= max, "minimum {min} must not exceed maximum {max}");
            }
        }
        Ok(())
    }

    /// Draw a value, truncated at zero.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<f64> {
        let val = match *self {
            Self::Constant { value } => value,
            Self::Gaussian { mean, std_dev } => {
                if std_dev == 0.0 {
                    mean
                } else {
                    Normal::new(mean, std_dev)
                        .context("failed to construct gaussian distribution")?
                        .sample(rng)
                }
            }
            Self::Poisson { mean } => poisson(rng, mean)? as f64,
            Self::Uniform { min, max } => {
                if min == max {
                    min
                } else {
                    rng.random_range(min..max)
                }
            }
        };
        Ok(val.max(0.0))
    }
}
