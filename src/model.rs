use crate::feeding::BiteCounters;
use crate::host::Host;
use crate::ids::IdGenerator;
use crate::modifiers::VectorGenome;
use crate::vector::{VectorParasiteState, VectorState};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// A single adult vector and the parasites it carries.
#[derive(Debug, Serialize, Deserialize)]
pub struct VectorCohort {
    id: u64,
    species: usize,
    genome: VectorGenome,
    age: f64,

    parasites: VectorParasiteState,
}

impl VectorCohort {
    pub fn new(id: u64, species: usize, genome: VectorGenome) -> Self {
        Self {
            id,
            species,
            genome,
            age: 0.0,
            parasites: VectorParasiteState::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn species(&self) -> usize {
        self.species
    }

    pub fn genome(&self) -> VectorGenome {
        self.genome
    }

    pub fn grow_older(&mut self, dt: f64) {
        self.age += dt;
    }

    pub fn parasites(&self) -> &VectorParasiteState {
        &self.parasites
    }

    pub fn parasites_mut(&mut self) -> &mut VectorParasiteState {
        &mut self.parasites
    }
}

#[derive(Serialize, Deserialize)]
pub struct State {
    pub day: u64,

    pub hosts: Vec<Host>,

    pub vectors: Vec<VectorCohort>,

    pub ids: IdGenerator,
}

/// Events counted between two records.
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
pub struct Tally {
    /// Bites of each species by the state of the biting vector.
    pub bites: Vec<BiteCounters>,
    pub n_vector_infections: u64,
    pub n_vector_deaths: u64,
    pub n_host_infections: u64,
    pub n_infectious_to_adult: u64,
    pub n_infectious_to_infected: u64,
    pub n_maturing_oocysts: u64,
    pub sum_oocyst_duration: f64,
}

impl Tally {
    pub fn new(n_species: usize) -> Self {
        Self {
            bites: vec![BiteCounters::default(); n_species],
            ..Default::default()
        }
    }

    /// Collect the per-update transition counters of a vector.
    pub fn add_vector_update(&mut self, parasites: &VectorParasiteState) {
        self.n_infectious_to_adult += u64::from(parasites.infectious_to_adult());
        self.n_infectious_to_infected += u64::from(parasites.infectious_to_infected());
        self.n_maturing_oocysts += u64::from(parasites.n_maturing_oocysts());
        self.sum_oocyst_duration += parasites.sum_oocyst_duration();
    }

    /// Mean development time of the oocysts that matured, if any did.
    pub fn mean_oocyst_duration(&self) -> Option<f64> {
        (self.n_maturing_oocysts > 0)
            .then(|| self.sum_oocyst_duration / self.n_maturing_oocysts as f64)
    }
}

/// Snapshot of the system saved to trajectory files.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Record {
    pub day: u64,

    pub n_adult: u64,
    pub n_infected: u64,
    pub n_infectious: u64,

    pub n_oocyst_cohorts: u64,
    pub n_oocysts: u64,
    pub n_sporozoite_cohorts: u64,
    pub n_sporozoites: u64,
    pub n_drug_resistant_sporozoites: u64,

    pub n_infected_hosts: u64,
    pub n_host_infections: u64,
    /// Hosts with at least one drug-resistant infection.
    pub n_drug_resistant_hosts: u64,
    pub n_drug_resistant_infections: u64,

    pub tally: Tally,

    /// Sporozoites carried by all vectors, by barcode, most common first.
    pub sporozoite_barcodes: Vec<(String, u64)>,
}

impl Record {
    pub fn new(state: &State, tally: Tally) -> Self {
        let mut record = Self {
            day: state.day,
            n_adult: 0,
            n_infected: 0,
            n_infectious: 0,
            n_oocyst_cohorts: 0,
            n_oocysts: 0,
            n_sporozoite_cohorts: 0,
            n_sporozoites: 0,
            n_drug_resistant_sporozoites: 0,
            n_infected_hosts: 0,
            n_host_infections: 0,
            n_drug_resistant_hosts: 0,
            n_drug_resistant_infections: 0,
            tally,
            sporozoite_barcodes: Vec::new(),
        };

        let mut barcodes: FxHashMap<String, u64> = FxHashMap::default();
        for vector in &state.vectors {
            let parasites = vector.parasites();
            match parasites.state() {
                VectorState::Adult => record.n_adult += 1,
                VectorState::Infected => record.n_infected += 1,
                VectorState::Infectious => record.n_infectious += 1,
            }
            record.n_oocyst_cohorts +=
                (parasites.oocyst_cohorts().len() + parasites.new_oocyst_cohorts().len()) as u64;
            record.n_oocysts += parasites.n_oocysts();
            record.n_sporozoite_cohorts += parasites.sporozoite_cohorts().len() as u64;
            record.n_sporozoites += parasites.n_sporozoites();

            for cohort in parasites.sporozoite_cohorts() {
                let population = u64::from(cohort.population());
                *barcodes.entry(cohort.genome().barcode()).or_default() += population;
                if cohort.genome().is_drug_resistant() {
                    record.n_drug_resistant_sporozoites += population;
                }
            }
        }

        for host in &state.hosts {
            record.n_infected_hosts += u64::from(host.is_infected());
            record.n_host_infections += host.infections().len() as u64;
            let n_resistant = host
                .infections()
                .iter()
                .filter(|infection| infection.genome().is_drug_resistant())
                .count() as u64;
            record.n_drug_resistant_infections += n_resistant;
            record.n_drug_resistant_hosts += u64::from(n_resistant > 0);
        }

        let mut barcodes: Vec<_> = barcodes.into_iter().collect();
        barcodes.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        record.sporozoite_barcodes = barcodes;

        record
    }

    pub fn n_vectors(&self) -> u64 {
        self.n_adult + self.n_infected + self.n_infectious
    }
}
