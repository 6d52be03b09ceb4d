//! Parasite genomes and meiotic recombination.
//!
//! A genome stores one nucleotide per tracked genome location. Locations are
//! global base-pair positions along the concatenated P. falciparum chromosomes
//! (1-based), so the chromosome of each location is implied by its value.
//! Tracked locations are either barcode loci, which identify a strain, or
//! drug-resistance loci, which carry a resistant allele whenever their
//! nucleotide is not `A`. Both kinds recombine together.
//!
//! Recombination follows the obligate chiasma model: every chromosome that
//! carries tracked locations receives one crossover at a uniformly drawn
//! position, plus secondary crossovers at gamma-distributed distances on
//! either side. The four chromatids are then assorted independently per
//! chromosome.

use anyhow::{Context, Result, bail, ensure};
use rand::prelude::*;
use rand_distr::Gamma;
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    hash::{Hash, Hasher},
    ops::Range,
};

/// Chromosome lengths in base pairs.
pub const CHROMOSOME_LENGTHS: [u32; 14] = [
    643_000, 947_000, 1_100_000, 1_200_000, 1_300_000, 1_400_000, 1_400_000, 1_300_000, 1_500_000,
    1_700_000, 2_000_000, 2_300_000, 2_700_000, 3_300_000,
];

/// Base pairs per centimorgan per generation.
const BASE_PAIRS_PER_CENTIMORGAN: f64 = 1_500_000.0;

const NUCLEOTIDES: [char; 4] = ['A', 'C', 'G', 'T'];

/// Barcode character matching any nucleotide.
const WILDCARD: char = '*';

pub fn max_location() -> u32 {
    CHROMOSOME_LENGTHS.iter().sum()
}

/// First and last location (inclusive) of a chromosome.
fn chromosome_bounds(i_chr: usize) -> (u32, u32) {
    let start: u32 = CHROMOSOME_LENGTHS[..i_chr].iter().sum();
    (start + 1, start + CHROMOSOME_LENGTHS[i_chr])
}

fn hash_alleles(alleles: &[u8]) -> u64 {
    let mut hasher = FxHasher::default();
    alleles.hash(&mut hasher);
    hasher.finish()
}

fn parse_nucleotide(c: char) -> Option<u8> {
    NUCLEOTIDES
        .iter()
        .position(|&n| n == c.to_ascii_uppercase())
        .map(|pos| pos as u8)
}

fn parse_alleles(text: &str, n_locs: usize, what: &str) -> Result<Vec<u8>> {
    let n_chars = text.chars().count();
    ensure!(
        n_chars == n_locs,
        "{what} {text:?} has {n_chars} characters but there are {n_locs} {what} locations"
    );
    text.chars()
        .map(|c| {
            parse_nucleotide(c)
                .with_context(|| format!("invalid nucleotide {c:?} in {what} {text:?}"))
        })
        .collect()
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
enum Locus {
    Barcode,
    DrugResistant,
}

/// Maps the configured genome locations onto chromosomes.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct GenomeLayout {
    locations: Vec<u32>,
    loci: Vec<Locus>,
    n_barcode: usize,
    chr_ranges: Vec<Range<usize>>,
}

impl GenomeLayout {
    /// Layout with barcode loci only.
    pub fn new(barcode_locations: Vec<u32>) -> Result<Self> {
        Self::with_drug_resistance(barcode_locations, Vec::new())
    }

    pub fn with_drug_resistance(
        barcode_locations: Vec<u32>,
        drug_resistant_locations: Vec<u32>,
    ) -> Result<Self> {
        ensure!(!barcode_locations.is_empty(), "at least one barcode genome location is required");
        let n_barcode = barcode_locations.len();
        let mut tagged: Vec<(u32, Locus)> = barcode_locations
            .into_iter()
            .map(|loc| (loc, Locus::Barcode))
            .chain(drug_resistant_locations.into_iter().map(|loc| (loc, Locus::DrugResistant)))
            .collect();

        let max_loc = max_location();
        if let Some(&(loc, _)) = tagged.iter().find(|&&(loc, _)| loc == 0 || loc > max_loc) {
            bail!("genome location {loc} must be in the range 1..={max_loc}");
        }
        tagged.sort_unstable_by_key(|&(loc, _)| loc);
        if let Some(pair) = tagged.windows(2).find(|pair| pair[0].0 == pair[1].0) {
            bail!("genome location {} is listed more than once", pair[0].0);
        }
        let (locations, loci): (Vec<_>, Vec<_>) = tagged.into_iter().unzip();

        let chr_ranges = (0..CHROMOSOME_LENGTHS.len())
            .map(|i_chr| {
                let (first, last) = chromosome_bounds(i_chr);
                let start = locations.partition_point(|&loc| loc < first);
                let end = locations.partition_point(|&loc| loc <= last);
                start..end
            })
            .collect();

        Ok(Self {
            locations,
            loci,
            n_barcode,
            chr_ranges,
        })
    }

    pub fn n_barcode_locations(&self) -> usize {
        self.n_barcode
    }

    pub fn n_drug_resistant_locations(&self) -> usize {
        self.locations.len() - self.n_barcode
    }

    /// Indexes of the locations on a chromosome.
    fn chr_range(&self, i_chr: usize) -> Range<usize> {
        self.chr_ranges[i_chr].clone()
    }

    /// Index of the first location at or after `location`.
    fn index_of(&self, location: i64) -> usize {
        self.locations.partition_point(|&loc| i64::from(loc) < location)
    }

    /// Alleles of a genome in location order.
    fn to_sequence(&self, genome: &ParasiteGenome) -> Vec<u8> {
        let mut barcode = genome.barcode.iter();
        let mut drug = genome.drug_resistant.iter();
        self.loci
            .iter()
            .filter_map(|locus| match locus {
                Locus::Barcode => barcode.next(),
                Locus::DrugResistant => drug.next(),
            })
            .copied()
            .collect()
    }

    fn to_genome(&self, sequence: &[u8]) -> ParasiteGenome {
        let mut barcode = Vec::with_capacity(self.n_barcode);
        let mut drug_resistant = Vec::with_capacity(self.n_drug_resistant_locations());
        for (&allele, locus) in sequence.iter().zip(&self.loci) {
            match locus {
                Locus::Barcode => barcode.push(allele),
                Locus::DrugResistant => drug_resistant.push(allele),
            }
        }
        ParasiteGenome::from_alleles(barcode, drug_resistant)
    }

    fn matches(&self, genome: &ParasiteGenome) -> bool {
        genome.barcode.len() == self.n_barcode
            && genome.drug_resistant.len() == self.n_drug_resistant_locations()
    }
}

/// Genetic fingerprint of a parasite.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct ParasiteGenome {
    barcode: Vec<u8>,
    drug_resistant: Vec<u8>,
    hashcode: u64,
    barcode_hashcode: u64,
}

impl ParasiteGenome {
    fn from_alleles(barcode: Vec<u8>, drug_resistant: Vec<u8>) -> Self {
        let mut hasher = FxHasher::default();
        barcode.hash(&mut hasher);
        drug_resistant.hash(&mut hasher);
        let hashcode = hasher.finish();
        let barcode_hashcode = hash_alleles(&barcode);
        Self {
            barcode,
            drug_resistant,
            hashcode,
            barcode_hashcode,
        }
    }

    /// Parse a barcode such as `"ACGT"` with wild-type (`A`) drug-resistance alleles.
    pub fn from_barcode(barcode: &str, layout: &GenomeLayout) -> Result<Self> {
        Self::from_strings(barcode, None, layout)
    }

    /// Parse a barcode and, optionally, the alleles at the drug-resistance locations.
    pub fn from_strings(
        barcode: &str,
        drug_resistant: Option<&str>,
        layout: &GenomeLayout,
    ) -> Result<Self> {
        let barcode = parse_alleles(barcode, layout.n_barcode_locations(), "barcode")?;
        let n_drug = layout.n_drug_resistant_locations();
        let drug_resistant = match drug_resistant {
            Some(text) => parse_alleles(text, n_drug, "drug-resistant")?,
            None => vec![0; n_drug],
        };
        Ok(Self::from_alleles(barcode, drug_resistant))
    }

    /// Identity over the barcode locations only.
    pub fn barcode_hashcode(&self) -> u64 {
        self.barcode_hashcode
    }

    pub fn barcode(&self) -> String {
        self.barcode
            .iter()
            .map(|&val| NUCLEOTIDES[val as usize])
            .collect()
    }

    pub fn drug_resistant_string(&self) -> String {
        self.drug_resistant
            .iter()
            .map(|&val| NUCLEOTIDES[val as usize])
            .collect()
    }

    /// Whether any drug-resistance location carries a non-`A` allele.
    pub fn is_drug_resistant(&self) -> bool {
        self.drug_resistant.iter().any(|&val| val != 0)
    }
}

impl Hash for ParasiteGenome {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hashcode);
    }
}

impl fmt::Display for ParasiteGenome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.barcode())?;
        if !self.drug_resistant.is_empty() {
            write!(f, "/{}", self.drug_resistant_string())?;
        }
        Ok(())
    }
}

/// Barcode hashcodes matched by a pattern where `*` stands for any nucleotide.
pub fn possible_barcode_hashcodes(pattern: &str, layout: &GenomeLayout) -> Result<Vec<u64>> {
    let n_chars = pattern.chars().count();
    let n_locs = layout.n_barcode_locations();
    ensure!(
        n_chars == n_locs,
        "barcode {pattern:?} has {n_chars} characters but there are {n_locs} barcode locations"
    );

    let mut barcodes: Vec<Vec<u8>> = vec![Vec::with_capacity(n_locs)];
    for c in pattern.chars() {
        let options: Vec<u8> = if c == WILDCARD {
            (0..NUCLEOTIDES.len() as u8).collect()
        } else {
            let allele = parse_nucleotide(c)
                .with_context(|| format!("invalid nucleotide {c:?} in barcode {pattern:?}"))?;
            vec![allele]
        };
        barcodes = barcodes
            .into_iter()
            .flat_map(|prefix| {
                options.iter().map(move |&allele| {
                    let mut barcode = prefix.clone();
                    barcode.push(allele);
                    barcode
                })
            })
            .collect();
    }

    Ok(barcodes.iter().map(|barcode| hash_alleles(barcode)).collect())
}
/// Parameters of the secondary crossover distance (in centimorgans).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CrossoverParams {
    pub gamma_k: f64,
    pub gamma_theta: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Crossover {
    location: i64,
    female_chromatid: usize,
    male_chromatid: usize,
}

impl Crossover {
    fn draw<R: Rng + ?Sized>(rng: &mut R, location: i64) -> Self {
        let pair = rng.random_range(0..4);
        Self {
            location,
            female_chromatid: pair % 2,
            male_chromatid: pair / 2,
        }
    }
}

/// Distance in base pairs to the next secondary crossover.
fn crossover_distance<R: Rng + ?Sized>(rng: &mut R, gamma: &Gamma<f64>) -> i64 {
    (gamma.sample(rng) * BASE_PAIRS_PER_CENTIMORGAN) as i64
}

/// Crossovers of one chromosome, sorted by location.
fn find_crossovers<R: Rng + ?Sized>(
    rng: &mut R,
    gamma: &Gamma<f64>,
    first: i64,
    last: i64,
) -> Vec<Crossover> {
    let location = rng.random_range(first..=last);
    let obligate = Crossover::draw(rng, location);

    let mut left = Vec::new();
    let mut max_loc = obligate.location - 1;
    loop {
        let location = max_loc - crossover_distance(rng, gamma);
        if location < first {
            break;
        }
        left.push(Crossover::draw(rng, location));
        max_loc = location - 1;
    }

    let mut crossovers: Vec<_> = left.into_iter().rev().collect();
    crossovers.push(obligate);

    let mut min_loc = obligate.location + 1;
    loop {
        let location = min_loc + crossover_distance(rng, gamma);
        if location > last {
            break;
        }
        crossovers.push(Crossover::draw(rng, location));
        min_loc = location + 1;
    }

    crossovers
}

/// Produce the four meiotic products of a female and a male genome.
///
/// Identical parents (selfing) yield the female genome alone.
pub fn recombine<R: Rng + ?Sized>(
    rng: &mut R,
    layout: &GenomeLayout,
    params: CrossoverParams,
    female: &ParasiteGenome,
    male: &ParasiteGenome,
) -> Result<Vec<ParasiteGenome>> {
    if female == male {
        return Ok(vec![female.clone()]);
    }
    ensure!(
        layout.matches(female) && layout.matches(male),
        "genomes {female} and {male} do not match the genome layout"
    );

    let gamma = Gamma::new(params.gamma_k, params.gamma_theta)
        .context("failed to construct crossover distance distribution")?;

    // Chromatids: female 0, female 1, male 0, male 1.
    let female = layout.to_sequence(female);
    let male = layout.to_sequence(male);
    let mut chromatids = [female.clone(), female, male.clone(), male];

    for i_chr in 0..CHROMOSOME_LENGTHS.len() {
        let range = layout.chr_range(i_chr);
        if range.is_empty() {
            continue;
        }
        let (first, last) = chromosome_bounds(i_chr);

        // Each crossover exchanges everything left of it between two chromatids.
        for co in find_crossovers(rng, &gamma, i64::from(first), i64::from(last)) {
            let end = layout.index_of(co.location).clamp(range.start, range.end);
            if end == range.start {
                continue;
            }
            let (females, males) = chromatids.split_at_mut(2);
            females[co.female_chromatid][range.start..end]
                .swap_with_slice(&mut males[co.male_chromatid][range.start..end]);
        }

        let mut order = [0, 1, 2, 3];
        order.shuffle(rng);
        let segments: Vec<Vec<u8>> = order
            .iter()
            .map(|&i_src| chromatids[i_src][range.clone()].to_vec())
            .collect();
        for (chromatid, segment) in chromatids.iter_mut().zip(segments) {
            chromatid[range.clone()].copy_from_slice(&segment);
        }
    }

    Ok(chromatids
        .iter()
        .map(|sequence| layout.to_genome(sequence))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha12Rng;

    const PARAMS: CrossoverParams = CrossoverParams {
        gamma_k: 2.0,
        gamma_theta: 0.38,
    };

    fn layout() -> GenomeLayout {
        // Two locations on chromosome 1, one on chromosome 2, one on chromosome 14.
        GenomeLayout::new(vec![500_000, 100, 700_000, max_location()]).unwrap()
    }

    /// Barcode on chromosomes 1, 2 and 14 with drug loci on chromosomes 1 and 2.
    fn drug_layout() -> GenomeLayout {
        GenomeLayout::with_drug_resistance(vec![500_000, 100, max_location()], vec![700_000, 1_000])
            .unwrap()
    }

    #[test]
    fn layout_sorts_and_assigns_chromosomes() {
        let layout = layout();
        assert_eq!(layout.locations, vec![100, 500_000, 700_000, max_location()]);
        assert_eq!(layout.chr_range(0), 0..2);
        assert_eq!(layout.chr_range(1), 2..3);
        assert!(layout.chr_range(5).is_empty());
        assert_eq!(layout.chr_range(13), 3..4);
    }

    #[test]
    fn layout_interleaves_drug_loci() {
        let layout = drug_layout();
        assert_eq!(layout.locations, vec![100, 1_000, 500_000, 700_000, max_location()]);
        assert_eq!(layout.n_barcode_locations(), 3);
        assert_eq!(layout.n_drug_resistant_locations(), 2);
        assert_eq!(layout.chr_range(0), 0..3);

        let genome = ParasiteGenome::from_strings("ACG", Some("TC"), &layout).unwrap();
        assert_eq!(layout.to_sequence(&genome), vec![0, 3, 1, 1, 2]);
        assert_eq!(layout.to_genome(&layout.to_sequence(&genome)), genome);
    }

    #[test]
    fn layout_rejects_bad_locations() {
        assert!(GenomeLayout::new(vec![]).is_err());
        assert!(GenomeLayout::new(vec![0]).is_err());
        assert!(GenomeLayout::new(vec![max_location() + 1]).is_err());
        assert!(GenomeLayout::new(vec![5, 5]).is_err());
        assert!(GenomeLayout::with_drug_resistance(vec![], vec![5]).is_err());
        assert!(GenomeLayout::with_drug_resistance(vec![5], vec![0]).is_err());
        assert!(GenomeLayout::with_drug_resistance(vec![5, 7], vec![7]).is_err());
    }

    #[test]
    fn barcode_round_trip_and_identity() {
        let layout = layout();
        let genome = ParasiteGenome::from_barcode("acgT", &layout).unwrap();
        assert_eq!(genome.barcode(), "ACGT");
        assert_eq!(layout.to_sequence(&genome), vec![0, 1, 2, 3]);
        assert_eq!(genome.drug_resistant_string(), "");
        assert!(!genome.is_drug_resistant());

        let same = ParasiteGenome::from_barcode("ACGT", &layout).unwrap();
        assert_eq!(genome, same);
        assert_eq!(genome.hashcode, same.hashcode);

        assert!(ParasiteGenome::from_barcode("ACG", &layout).is_err());
        assert!(ParasiteGenome::from_barcode("ACGX", &layout).is_err());
    }

    #[test]
    fn drug_alleles_set_resistance_but_not_barcode_identity() {
        let layout = drug_layout();
        let wild = ParasiteGenome::from_barcode("ACG", &layout).unwrap();
        let resistant = ParasiteGenome::from_strings("ACG", Some("AG"), &layout).unwrap();
        assert_eq!(wild.drug_resistant_string(), "AA");
        assert!(!wild.is_drug_resistant());
        assert!(resistant.is_drug_resistant());
        assert_eq!(resistant.to_string(), "ACG/AG");

        assert_ne!(wild, resistant);
        assert_ne!(wild.hashcode, resistant.hashcode);
        assert_eq!(wild.barcode_hashcode(), resistant.barcode_hashcode());

        assert!(ParasiteGenome::from_strings("ACG", Some("A"), &layout).is_err());
    }

    #[test]
    fn wildcards_expand_to_every_nucleotide() {
        let layout = GenomeLayout::new(vec![10, 20]).unwrap();
        let hashes = possible_barcode_hashcodes("A*", &layout).unwrap();
        assert_eq!(hashes.len(), 4);
        for barcode in ["AA", "AC", "AG", "AT"] {
            let genome = ParasiteGenome::from_barcode(barcode, &layout).unwrap();
            assert!(hashes.contains(&genome.barcode_hashcode()));
        }
        let other = ParasiteGenome::from_barcode("CA", &layout).unwrap();
        assert!(!hashes.contains(&other.barcode_hashcode()));

        assert_eq!(possible_barcode_hashcodes("**", &layout).unwrap().len(), 16);
        assert!(possible_barcode_hashcodes("A", &layout).is_err());
        assert!(possible_barcode_hashcodes("A?", &layout).is_err());
    }

    #[test]
    fn selfing_returns_parent() {
        let layout = layout();
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let genome = ParasiteGenome::from_barcode("ACGT", &layout).unwrap();
        let products = recombine(&mut rng, &layout, PARAMS, &genome, &genome).unwrap();
        assert_eq!(products, vec![genome]);
    }

    #[test]
    fn recombination_conserves_alleles_per_location() {
        let layout = drug_layout();
        let female = ParasiteGenome::from_strings("AAA", Some("AA"), &layout).unwrap();
        let male = ParasiteGenome::from_strings("CCC", Some("TT"), &layout).unwrap();
        let mut rng = ChaCha12Rng::seed_from_u64(42);

        let mut n_mixed = 0;
        for _ in 0..200 {
            let products = recombine(&mut rng, &layout, PARAMS, &female, &male).unwrap();
            assert_eq!(products.len(), 4);
            let sequences: Vec<_> = products.iter().map(|g| layout.to_sequence(g)).collect();
            // Each location keeps two female and two male alleles across the four products.
            for i_loc in 0..layout.locations.len() {
                let n_female = sequences.iter().filter(|seq| seq[i_loc] == 0).count();
                assert_eq!(n_female, 2);
            }
            // A resistant product that carries the female barcode allele next to it.
            n_mixed += products
                .iter()
                .filter(|g| g.is_drug_resistant() && g.barcode().starts_with('A'))
                .count();
        }
        assert!(n_mixed > 0);
    }

    #[test]
    fn recombination_rejects_foreign_genomes() {
        let mut rng = ChaCha12Rng::seed_from_u64(3);
        let female = ParasiteGenome::from_barcode("ACGT", &layout()).unwrap();
        let male = ParasiteGenome::from_barcode("CCA", &drug_layout()).unwrap();
        assert!(recombine(&mut rng, &layout(), PARAMS, &female, &male).is_err());
    }

    #[test]
    fn crossovers_are_sorted_and_in_bounds() {
        let mut rng = ChaCha12Rng::seed_from_u64(9);
        let gamma = Gamma::new(PARAMS.gamma_k, PARAMS.gamma_theta).unwrap();
        let (first, last) = chromosome_bounds(13);
        for _ in 0..100 {
            let crossovers = find_crossovers(&mut rng, &gamma, i64::from(first), i64::from(last));
            assert!(!crossovers.is_empty());
            assert!(crossovers.windows(2).all(|w| w[0].location < w[1].location));
            assert!(crossovers
                .iter()
                .all(|co| co.location >= i64::from(first) && co.location <= i64::from(last)));
        }
    }
}
