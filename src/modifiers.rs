use crate::genome::{self, GenomeLayout};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    ops::{Add, AddAssign},
};

/// Allele combination of a vector.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Default, Serialize, Deserialize)]
pub struct VectorGenome(pub u32);

impl fmt::Display for VectorGenome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "vg{}", self.0)
    }
}

/// Vector traits whose value depends on the vector and parasite genomes.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorTrait {
    SporozoiteMortality,
    OocystProgression,
    TransmissionToHuman,
    InfectedByHuman,
}

/// A trait modifier as written in the config file.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct TraitModifierConfig {
    pub trait_kind: VectorTrait,
    /// Applies to every vector genome when absent.
    #[serde(default)]
    pub vector_genome: Option<u32>,
    /// Barcode of the parasite (female barcode for oocysts). `*` matches any nucleotide.
    #[serde(default)]
    pub barcode: Option<String>,
    /// Barcode of the male gametocyte paired with an oocyst. `*` matches any nucleotide.
    #[serde(default)]
    pub male_barcode: Option<String>,
    pub modifier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TraitModifier {
    kind: VectorTrait,
    vector_genome: Option<VectorGenome>,
    /// Barcode hashcodes accepted for the parasite, any when absent.
    hashes_a: Option<Vec<u64>>,
    hashes_b: Option<Vec<u64>>,
    modifier: f64,
}

impl TraitModifier {
    fn matches(
        &self,
        kind: VectorTrait,
        genome: VectorGenome,
        hash_a: u64,
        hash_b: Option<u64>,
    ) -> bool {
        self.kind == kind
            && self.vector_genome.is_none_or(|vg| vg == genome)
            && self.hashes_a.as_ref().is_none_or(|hashes| hashes.contains(&hash_a))
            && self
                .hashes_b
                .as_ref()
                .is_none_or(|hashes| hash_b.is_some_and(|hash| hashes.contains(&hash)))
    }
}

/// Lookup of the configured trait modifiers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraitModifiers {
    entries: Vec<TraitModifier>,
}

impl TraitModifiers {
    pub fn new(configs: &[TraitModifierConfig], layout: &GenomeLayout) -> Result<Self> {
        let hashes = |barcode: &Option<String>| -> Result<Option<Vec<u64>>> {
            barcode
                .as_deref()
                .map(|pattern| genome::possible_barcode_hashcodes(pattern, layout))
                .transpose()
        };

        let entries = configs
            .iter()
            .enumerate()
            .map(|(i_mod, cfg)| {
                Ok(TraitModifier {
                    kind: cfg.trait_kind,
                    vector_genome: cfg.vector_genome.map(VectorGenome),
                    hashes_a: hashes(&cfg.barcode)
                        .with_context(|| format!("invalid barcode in trait modifier {i_mod}"))?,
                    hashes_b: hashes(&cfg.male_barcode).with_context(|| {
                        format!("invalid male barcode in trait modifier {i_mod}")
                    })?,
                    modifier: cfg.modifier,
                })
            })
            .collect::<Result<_>>()?;

        Ok(Self { entries })
    }

    /// Product of every matching modifier (1.0 when none match).
    ///
    /// Hashes are barcode hashcodes, so drug-resistance alleles never affect a match.
    pub fn modifier(
        &self,
        kind: VectorTrait,
        genome: VectorGenome,
        hash_a: u64,
        hash_b: Option<u64>,
    ) -> f64 {
        self.entries
            .iter()
            .filter(|entry| entry.matches(kind, genome, hash_a, hash_b))
            .map(|entry| entry.modifier)
            .product()
    }

    /// Product of the modifiers that do not filter on a parasite genome.
    pub fn vector_modifier(&self, kind: VectorTrait, genome: VectorGenome) -> f64 {
        self.entries
            .iter()
            .filter(|entry| entry.hashes_a.is_none() && entry.hashes_b.is_none())
            .filter(|entry| {
                entry.kind == kind && entry.vector_genome.is_none_or(|vg| vg == genome)
            })
            .map(|entry| entry.modifier)
            .product()
    }
}

/// A probability that may differ by vector species and genome.
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
pub struct GeneticProbability {
    default: f64,
    overrides: Vec<(usize, VectorGenome, f64)>,
}

impl GeneticProbability {
    pub fn new(default: f64) -> Self {
        Self {
            default,
            overrides: Vec::new(),
        }
    }

    pub fn with_override(mut self, species: usize, genome: VectorGenome, value: f64) -> Self {
        match self
            .overrides
            .iter_mut()
            .find(|(sp, vg, _)| *sp == species && *vg == genome)
        {
            Some(entry) => entry.2 = value,
            None => self.overrides.push((species, genome, value)),
        }
        self
    }

    pub fn value(&self, species: usize, genome: VectorGenome) -> f64 {
        self.overrides
            .iter()
            .find(|(sp, vg, _)| *sp == species && *vg == genome)
            .map_or(self.default, |&(_, _, value)| value)
    }
}

impl AddAssign<&GeneticProbability> for GeneticProbability {
    fn add_assign(&mut self, other: &GeneticProbability) {
        let mut overrides: Vec<_> = self
            .overrides
            .iter()
            .map(|&(sp, vg, value)| (sp, vg, value + other.value(sp, vg)))
            .collect();
        for &(sp, vg, value) in &other.overrides {
            if !self.overrides.iter().any(|&(s, v, _)| s == sp && v == vg) {
                overrides.push((sp, vg, self.default + value));
            }
        }
        self.default += other.default;
        self.overrides = overrides;
    }
}

impl Add<&GeneticProbability> for &GeneticProbability {
    type Output = GeneticProbability;

    fn add(self, other: &GeneticProbability) -> GeneticProbability {
        let mut sum = self.clone();
        sum += other;
        sum
    }
}
