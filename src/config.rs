use crate::bite_index::FeedingRoute;
use crate::genome::{GenomeLayout, ParasiteGenome};
use crate::modifiers::{TraitModifierConfig, TraitModifiers};
use crate::random::ValueDistribution;
use anyhow::{Context, Result, bail, ensure};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, fs, ops::RangeBounds, path::Path};

/// Simulation configuration parameters.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Config {
    pub genetics: GeneticsConfig,
    pub vectors: VectorsConfig,
    pub hosts: HostsConfig,
    pub init: InitConfig,
    pub output: OutputConfig,
}

/// Parasite genetics parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct GeneticsConfig {
    /// Genome locations (1-based base pairs) that make up a barcode.
    pub barcode_genome_locations: Vec<u32>,

    /// Genome locations whose non-`A` alleles confer drug resistance.
    #[serde(default)]
    pub drug_resistant_genome_locations: Vec<u32>,

    /// Mean sporozoite lifetime inside the vector (days).
    pub sporozoite_life_expectancy: f64,

    /// Negative binomial successes and probability for sporozoites per bite.
    pub num_sporozoites_in_bite_fail: f64,
    pub probability_sporozoite_in_bite_fails: f64,

    /// Negative binomial successes and probability for oocysts per infectious feed.
    pub num_oocyst_from_bite_fail: f64,
    pub probability_oocyst_from_bite_fails: f64,

    /// Sporozoites released by each maturing oocyst.
    pub sporozoites_per_oocyst: ValueDistribution,

    /// Shape and scale of the secondary crossover distance (centimorgans).
    pub crossover_gamma_k: f64,
    pub crossover_gamma_theta: f64,

    /// Blood volume ingested by one feed (microliters).
    pub microliters_per_bloodmeal: f64,

    /// Reproduce the dynamics of the model without parasite genetics.
    #[serde(default)]
    pub enable_fpg_similarity_to_base: bool,

    #[serde(default)]
    pub trait_modifiers: Vec<TraitModifierConfig>,
}

/// How vectors are represented in the population.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorSamplingType {
    TrackAllVectors,
    SampleIndividualVectors,
    VectorCompartmentsNumber,
    VectorCompartmentsPercent,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct VectorsConfig {
    pub sampling_type: VectorSamplingType,
    pub species: Vec<SpeciesConfig>,
}

/// Parameters of one vector species.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SpeciesConfig {
    pub name: String,

    /// Adult vectors maintained by daily emergence.
    pub population: usize,
    /// Mean adult lifetime (days).
    pub life_expectancy: f64,
    /// Mean interval between feeding attempts (days).
    pub days_between_feeds: f64,
    /// Days needed by an oocyst to mature into sporozoites.
    pub oocyst_duration: f64,

    pub indoor_feeding_fraction: f64,
    pub die_before_feeding: f64,
    pub not_available: f64,
    pub outdoor_returning_mortality: f64,
    /// Multiplier of the die-during-feeding probability of infectious vectors.
    pub infectious_feeding_mortality_factor: f64,

    /// Relative frequency of each vector genome among emerging adults.
    pub genome_weights: Vec<f64>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct HostsConfig {
    pub count: usize,

    /// Seeding infections through initial prevalence bypasses parasite genomes.
    #[serde(default)]
    pub enable_initial_prevalence: bool,

    /// Relative attractiveness of a host for indoor and outdoor feeds.
    pub indoor_weight: f64,
    pub outdoor_weight: f64,

    pub indoor: RouteEffectsConfig,
    pub outdoor: RouteEffectsConfig,
    #[serde(default)]
    pub effect_overrides: Vec<EffectOverrideConfig>,

    /// Mature gametocytes of each sex carried per infection.
    pub female_gametocytes_per_infection: u32,
    pub male_gametocytes_per_infection: u32,
    /// Days between infection and the appearance of mature gametocytes.
    pub gametocyte_delay: f64,
    /// Rate `k` of infectiousness `1 - exp(-k * female gametocytes / microliter)`.
    pub infectiousness_rate: f64,
    pub microliters_blood: f64,

    pub infection_probability_per_bite: f64,
    pub infection_duration: f64,
}

/// Feeding mortality caused by host interventions.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct RouteEffectsConfig {
    pub die_during_feeding: f64,
    pub die_after_feeding: f64,
}

/// Mortality for a specific vector genome (e.g. insecticide resistance).
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct EffectOverrideConfig {
    pub species: usize,
    pub vector_genome: u32,
    pub route: FeedingRoute,
    pub die_during_feeding: f64,
    pub die_after_feeding: f64,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct InitConfig {
    #[serde(default)]
    pub seed: Option<u64>,
    pub infected_hosts: usize,
    pub barcodes: Vec<String>,
    /// Drug-resistance alleles paired with each barcode, wild type when empty.
    #[serde(default)]
    pub drug_resistant_strings: Vec<String>,
}

impl InitConfig {
    /// Genomes of the initial infections, cycled over the infected hosts.
    pub fn genomes(&self, layout: &GenomeLayout) -> Result<Vec<ParasiteGenome>> {
        if self.drug_resistant_strings.is_empty() {
            return self
                .barcodes
                .iter()
                .map(|barcode| ParasiteGenome::from_barcode(barcode, layout))
                .collect();
        }
        ensure!(
            self.drug_resistant_strings.len() == self.barcodes.len(),
            "{} drug-resistant strings given for {} barcodes",
            self.drug_resistant_strings.len(),
            self.barcodes.len()
        );
        self.barcodes
            .iter()
            .zip(&self.drug_resistant_strings)
            .map(|(barcode, drug)| {
                ParasiteGenome::from_strings(barcode, Some(drug.as_str()), layout)
            })
            .collect()
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Number of days between saved records.
    pub steps_per_save: usize,
    /// Number of records written per trajectory file.
    pub saves_per_file: usize,
}

impl Config {
    /// Load a [`Config`] from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.genetics
            .validate()
            .context("invalid genetics parameters")?;
        self.vectors.validate().context("invalid vector parameters")?;
        self.hosts
            .validate(self.vectors.species.len())
            .context("invalid host parameters")?;

        check_num(self.init.infected_hosts, 0..=self.hosts.count)
            .context("invalid number of initially infected hosts")?;
        if self.init.infected_hosts > 0 && self.init.barcodes.is_empty() {
            bail!("initially infected hosts require at least one barcode");
        }
        let layout = self.genetics.layout()?;
        self.init
            .genomes(&layout)
            .context("invalid initial genomes")?;

        check_num(self.output.steps_per_save, 1..10_000)
            .context("invalid number of steps per save")?;
        check_num(self.output.saves_per_file, 1..10_000)
            .context("invalid number of saves per file")?;

        Ok(())
    }
}

impl GeneticsConfig {
    pub fn layout(&self) -> Result<GenomeLayout> {
        GenomeLayout::with_drug_resistance(
            self.barcode_genome_locations.clone(),
            self.drug_resistant_genome_locations.clone(),
        )
        .context("invalid genome locations")
    }

    fn validate(&self) -> Result<()> {
        let layout = self.layout()?;
        TraitModifiers::new(&self.trait_modifiers, &layout)
            .context("invalid trait modifier barcodes")?;

        check_num(self.sporozoite_life_expectancy, 0.1..=1_000.0)
            .context("invalid sporozoite life expectancy")?;
        check_num(self.num_sporozoites_in_bite_fail, 0.01..=10_000.0)
            .context("invalid num_sporozoites_in_bite_fail")?;
        check_num(self.probability_sporozoite_in_bite_fails, 0.01..=0.99)
            .context("invalid probability_sporozoite_in_bite_fails")?;
        check_num(self.num_oocyst_from_bite_fail, 0.01..=10_000.0)
            .context("invalid num_oocyst_from_bite_fail")?;
        check_num(self.probability_oocyst_from_bite_fails, 0.01..=0.99)
            .context("invalid probability_oocyst_from_bite_fails")?;
        self.sporozoites_per_oocyst
            .validate()
            .context("invalid sporozoites per oocyst")?;
        check_num(self.crossover_gamma_k, 0.01..=100.0).context("invalid crossover gamma k")?;
        check_num(self.crossover_gamma_theta, 0.01..=100.0)
            .context("invalid crossover gamma theta")?;
        check_num(self.microliters_per_bloodmeal, 0.0..=100.0)
            .context("invalid microliters per bloodmeal")?;

        for (i_mod, modifier) in self.trait_modifiers.iter().enumerate() {
            check_num(modifier.modifier, 0.0..=1_000.0)
                .with_context(|| format!("invalid value of trait modifier {i_mod}"))?;
        }

        Ok(())
    }
}

impl VectorsConfig {
    fn validate(&self) -> Result<()> {
        if self.sampling_type != VectorSamplingType::TrackAllVectors
            && self.sampling_type != VectorSamplingType::SampleIndividualVectors
        {
            bail!(
                "parasite genetics requires individual vectors, but sampling_type is {:?}",
                self.sampling_type
            );
        }
        ensure!(!self.species.is_empty(), "at least one vector species is required");

        for sp in &self.species {
            sp.validate()
                .with_context(|| format!("invalid parameters of species {:?}", sp.name))?;
        }

        Ok(())
    }
}

impl SpeciesConfig {
    fn validate(&self) -> Result<()> {
        check_num(self.population, 1..1_000_000).context("invalid population")?;
        check_num(self.life_expectancy, 1.0..=1_000.0).context("invalid life expectancy")?;
        check_num(self.days_between_feeds, 1.0..=100.0).context("invalid days between feeds")?;
        check_num(self.oocyst_duration, 1.0..=100.0).context("invalid oocyst duration")?;

        check_prob(self.indoor_feeding_fraction).context("invalid indoor feeding fraction")?;
        check_prob(self.die_before_feeding).context("invalid die before feeding")?;
        check_prob(self.not_available).context("invalid not available")?;
        if self.die_before_feeding + self.not_available >= 1.0 {
            bail!("die_before_feeding and not_available must leave room for human feeds");
        }
        check_prob(self.outdoor_returning_mortality)
            .context("invalid outdoor returning mortality")?;
        check_num(self.infectious_feeding_mortality_factor, 0.0..=100.0)
            .context("invalid infectious feeding mortality factor")?;

        check_weights(&self.genome_weights).context("invalid genome weights")?;

        Ok(())
    }
}

impl HostsConfig {
    fn validate(&self, n_species: usize) -> Result<()> {
        if self.enable_initial_prevalence {
            bail!("enable_initial_prevalence is not supported with parasite genetics");
        }
        check_num(self.count, 1..1_000_000).context("invalid number of hosts")?;

        check_num(self.indoor_weight, 0.0..=1_000.0).context("invalid indoor weight")?;
        check_num(self.outdoor_weight, 0.0..=1_000.0).context("invalid outdoor weight")?;
        if self.indoor_weight + self.outdoor_weight <= 0.0 {
            bail!("hosts must be attractive through at least one route");
        }

        self.indoor.validate().context("invalid indoor effects")?;
        self.outdoor.validate().context("invalid outdoor effects")?;
        for (i_ovr, ovr) in self.effect_overrides.iter().enumerate() {
            check_num(ovr.species, 0..n_species)
                .with_context(|| format!("invalid species of effect override {i_ovr}"))?;
            RouteEffectsConfig {
                die_during_feeding: ovr.die_during_feeding,
                die_after_feeding: ovr.die_after_feeding,
            }
            .validate()
            .with_context(|| format!("invalid effect override {i_ovr}"))?;
        }

        check_num(self.female_gametocytes_per_infection, 1..=1_000_000_000)
            .context("invalid female gametocytes per infection")?;
        check_num(self.male_gametocytes_per_infection, 0..=1_000_000_000)
            .context("invalid male gametocytes per infection")?;
        check_num(self.gametocyte_delay, 0.0..=1_000.0).context("invalid gametocyte delay")?;
        check_num(self.infectiousness_rate, 0.0..=1_000.0)
            .context("invalid infectiousness rate")?;
        check_num(self.microliters_blood, 1.0..=1.0e9).context("invalid microliters of blood")?;
        check_prob(self.infection_probability_per_bite)
            .context("invalid infection probability per bite")?;
        check_num(self.infection_duration, 1.0..=10_000.0).context("invalid infection duration")?;

        Ok(())
    }
}

impl RouteEffectsConfig {
    fn validate(&self) -> Result<()> {
        check_prob(self.die_during_feeding).context("invalid die during feeding")?;
        check_prob(self.die_after_feeding).context("invalid die after feeding")?;
        if self.die_during_feeding + self.die_after_feeding > 1.0 {
            bail!("feeding mortality must not exceed 1.0");
        }
        Ok(())
    }
}

fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}

fn check_prob(prob: f64) -> Result<()> {
    check_num(prob, 0.0..=1.0)
}

fn check_weights(vec: &[f64]) -> Result<()> {
    if vec.is_empty() {
        bail!("vector must not be empty");
    }
    if vec.iter().any(|&ele| !(ele >= 0.0)) {
        bail!("vector must have only non-negative elements");
    }
    let sum: f64 = vec.iter().sum();
    if sum <= 0.0 {
        bail!("vector must have a positive sum, but sums to {sum}");
    }
    Ok(())
}

#[cfg(test)]
pub const EXAMPLE_CONFIG: &str = r#"
[genetics]
barcode_genome_locations = [100_000, 700_000, 1_700_000, 6_000_000, 20_000_000]
drug_resistant_genome_locations = [3_000_000]
sporozoite_life_expectancy = 10.0
num_sporozoites_in_bite_fail = 12.0
probability_sporozoite_in_bite_fails = 0.5
num_oocyst_from_bite_fail = 3.0
probability_oocyst_from_bite_fails = 0.5
sporozoites_per_oocyst = { kind = "gaussian", mean = 10000.0, std_dev = 1000.0 }
crossover_gamma_k = 2.0
crossover_gamma_theta = 0.38
microliters_per_bloodmeal = 2.0

[[genetics.trait_modifiers]]
trait_kind = "sporozoite_mortality"
barcode = "TTTT*"
modifier = 2.0

[vectors]
sampling_type = "track_all_vectors"

[[vectors.species]]
name = "gambiae"
population = 200
life_expectancy = 20.0
days_between_feeds = 3.0
oocyst_duration = 10.0
indoor_feeding_fraction = 0.8
die_before_feeding = 0.05
not_available = 0.1
outdoor_returning_mortality = 0.1
infectious_feeding_mortality_factor = 1.5
genome_weights = [0.7, 0.3]

[hosts]
count = 20
indoor_weight = 1.0
outdoor_weight = 1.0
indoor = { die_during_feeding = 0.1, die_after_feeding = 0.05 }
outdoor = { die_during_feeding = 0.05, die_after_feeding = 0.0 }
female_gametocytes_per_infection = 2000
male_gametocytes_per_infection = 500
gametocyte_delay = 10.0
infectiousness_rate = 0.5
microliters_blood = 500.0
infection_probability_per_bite = 0.5
infection_duration = 100.0

[[hosts.effect_overrides]]
species = 0
vector_genome = 1
route = "indoor"
die_during_feeding = 0.0
die_after_feeding = 0.0

[init]
seed = 1234
infected_hosts = 5
barcodes = ["AAAAA", "CCCCC", "GTGTG"]
drug_resistant_strings = ["A", "A", "T"]

[output]
steps_per_save = 5
saves_per_file = 4
"#;

#[cfg(test)]
impl Config {
    pub fn example() -> Self {
        Self::from_toml(EXAMPLE_CONFIG).unwrap()
    }
}
