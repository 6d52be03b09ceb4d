use crate::config::Config;
use crate::model::Record;
use crate::stats::{Accumulator, AccumulatorReport, TimeSeries, TimeSeriesReport};
use anyhow::{Context, Result};
use rmp_serde::{decode, encode};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// Number of most common sporozoite barcodes kept in the results.
const N_TOP_BARCODES: usize = 10;

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub enum ObsReport {
    TimeSeries(TimeSeriesReport),
    PerSpecies(Vec<AccumulatorReport>),
    Single(AccumulatorReport),
    Counts(Vec<(String, u64)>),
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct NamedReport {
    pub name: String,
    pub report: ObsReport,
}

pub trait Obs {
    fn update(&mut self, record: &Record) -> Result<()>;
    fn report(&self) -> Vec<NamedReport>;
}

/// Fractions of vectors that are infected and infectious.
pub struct VectorPrevalence {
    infected: TimeSeries,
    infectious: TimeSeries,
}

impl VectorPrevalence {
    pub fn new() -> Self {
        Self {
            infected: TimeSeries::new(),
            infectious: TimeSeries::new(),
        }
    }
}

impl Obs for VectorPrevalence {
    fn update(&mut self, record: &Record) -> Result<()> {
        let n_vectors = record.n_vectors();
        if n_vectors == 0 {
            return Ok(());
        }
        let n_vectors = n_vectors as f64;
        self.infected
            .push((record.n_infected + record.n_infectious) as f64 / n_vectors);
        self.infectious.push(record.n_infectious as f64 / n_vectors);
        Ok(())
    }

    fn report(&self) -> Vec<NamedReport> {
        vec![
            NamedReport {
                name: "vector_infected_fraction".into(),
                report: ObsReport::TimeSeries(self.infected.report()),
            },
            NamedReport {
                name: "vector_infectious_fraction".into(),
                report: ObsReport::TimeSeries(self.infectious.report()),
            },
        ]
    }
}

/// Daily bites of each species by infectious vectors.
pub struct InfectiousBiteRate {
    steps_per_save: f64,
    acc_vec: Vec<Accumulator>,
}

impl InfectiousBiteRate {
    pub fn new(cfg: &Config) -> Self {
        let mut acc_vec = Vec::new();
        acc_vec.resize_with(cfg.vectors.species.len(), Accumulator::new);
        Self {
            steps_per_save: cfg.output.steps_per_save as f64,
            acc_vec,
        }
    }
}

impl Obs for InfectiousBiteRate {
    fn update(&mut self, record: &Record) -> Result<()> {
        for (acc, bites) in self.acc_vec.iter_mut().zip(&record.tally.bites) {
            acc.add(bites.infectious as f64 / self.steps_per_save);
        }
        Ok(())
    }

    fn report(&self) -> Vec<NamedReport> {
        let reports = self.acc_vec.iter().map(|acc| acc.report()).collect();
        vec![NamedReport {
            name: "infectious_bites_per_day".into(),
            report: ObsReport::PerSpecies(reports),
        }]
    }
}

/// Days taken by oocysts to mature.
pub struct OocystDuration {
    acc: Accumulator,
}

impl OocystDuration {
    pub fn new() -> Self {
        Self {
            acc: Accumulator::new(),
        }
    }
}

impl Obs for OocystDuration {
    fn update(&mut self, record: &Record) -> Result<()> {
        if let Some(duration) = record.tally.mean_oocyst_duration() {
            self.acc.add(duration);
        }
        Ok(())
    }

    fn report(&self) -> Vec<NamedReport> {
        vec![NamedReport {
            name: "oocyst_duration".into(),
            report: ObsReport::Single(self.acc.report()),
        }]
    }
}

/// Fraction of hosts carrying at least one infection.
pub struct HostPrevalence {
    n_hosts: f64,
    time_series: TimeSeries,
}

impl HostPrevalence {
    pub fn new(cfg: &Config) -> Self {
        Self {
            n_hosts: cfg.hosts.count as f64,
            time_series: TimeSeries::new(),
        }
    }
}

impl Obs for HostPrevalence {
    fn update(&mut self, record: &Record) -> Result<()> {
        self.time_series
            .push(record.n_infected_hosts as f64 / self.n_hosts);
        Ok(())
    }

    fn report(&self) -> Vec<NamedReport> {
        vec![NamedReport {
            name: "host_prevalence".into(),
            report: ObsReport::TimeSeries(self.time_series.report()),
        }]
    }
}

/// Fractions of hosts, infections and sporozoites that carry drug resistance.
pub struct DrugResistance {
    hosts: TimeSeries,
    infections: TimeSeries,
    sporozoites: TimeSeries,
}

impl DrugResistance {
    pub fn new() -> Self {
        Self {
            hosts: TimeSeries::new(),
            infections: TimeSeries::new(),
            sporozoites: TimeSeries::new(),
        }
    }
}

impl Obs for DrugResistance {
    fn update(&mut self, record: &Record) -> Result<()> {
        if record.n_infected_hosts > 0 {
            self.hosts
                .push(record.n_drug_resistant_hosts as f64 / record.n_infected_hosts as f64);
            self.infections.push(
                record.n_drug_resistant_infections as f64 / record.n_host_infections as f64,
            );
        }
        if record.n_sporozoites > 0 {
            self.sporozoites
                .push(record.n_drug_resistant_sporozoites as f64 / record.n_sporozoites as f64);
        }
        Ok(())
    }

    fn report(&self) -> Vec<NamedReport> {
        vec![
            NamedReport {
                name: "drug_resistant_host_fraction".into(),
                report: ObsReport::TimeSeries(self.hosts.report()),
            },
            NamedReport {
                name: "drug_resistant_infection_fraction".into(),
                report: ObsReport::TimeSeries(self.infections.report()),
            },
            NamedReport {
                name: "drug_resistant_sporozoite_fraction".into(),
                report: ObsReport::TimeSeries(self.sporozoites.report()),
            },
        ]
    }
}

/// Distinct sporozoite barcodes and the most common ones overall.
pub struct StrainDiversity {
    n_barcodes: TimeSeries,
    totals: FxHashMap<String, u64>,
}

impl StrainDiversity {
    pub fn new() -> Self {
        Self {
            n_barcodes: TimeSeries::new(),
            totals: FxHashMap::default(),
        }
    }
}

impl Obs for StrainDiversity {
    fn update(&mut self, record: &Record) -> Result<()> {
        self.n_barcodes
            .push(record.sporozoite_barcodes.len() as f64);
        for (barcode, count) in &record.sporozoite_barcodes {
            *self.totals.entry(barcode.clone()).or_default() += count;
        }
        Ok(())
    }

    fn report(&self) -> Vec<NamedReport> {
        let mut top: Vec<_> = self
            .totals
            .iter()
            .map(|(barcode, &count)| (barcode.clone(), count))
            .collect();
        top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top.truncate(N_TOP_BARCODES);

        vec![
            NamedReport {
                name: "n_sporozoite_barcodes".into(),
                report: ObsReport::TimeSeries(self.n_barcodes.report()),
            },
            NamedReport {
                name: "top_sporozoite_barcodes".into(),
                report: ObsReport::Counts(top),
            },
        ]
    }
}

pub struct Analyzer {
    cfg: Config,
    obs_ptr_vec: Vec<Box<dyn Obs>>,
}

impl Analyzer {
    pub fn new(cfg: Config) -> Self {
        let obs_ptr_vec: Vec<Box<dyn Obs>> = vec![
            Box::new(VectorPrevalence::new()),
            Box::new(InfectiousBiteRate::new(&cfg)),
            Box::new(OocystDuration::new()),
            Box::new(HostPrevalence::new(&cfg)),
            Box::new(StrainDiversity::new()),
            Box::new(DrugResistance::new()),
        ];
        Self { cfg, obs_ptr_vec }
    }

    pub fn add_file<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);

        for _ in 0..self.cfg.output.saves_per_file {
            let record: Record =
                decode::from_read(&mut reader).context("failed to deserialize record")?;
            for obs in &mut self.obs_ptr_vec {
                obs.update(&record).context("failed to update observable")?;
            }
        }
        Ok(())
    }

    pub fn save_results<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);

        let reports: Vec<_> = self.obs_ptr_vec.iter().flat_map(|obs| obs.report()).collect();
        encode::write_named(&mut writer, &reports).context("failed to serialize results")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeding::BiteCounters;
    use crate::model::Tally;

    fn record(day: u64, n_infectious: u64, barcodes: &[(&str, u64)]) -> Record {
        let mut tally = Tally::new(1);
        tally.bites[0] = BiteCounters {
            adult: 4,
            infected: 1,
            infectious: 5 * n_infectious,
        };
        Record {
            day,
            n_adult: 10 - n_infectious,
            n_infected: 0,
            n_infectious,
            n_oocyst_cohorts: 0,
            n_oocysts: 0,
            n_sporozoite_cohorts: barcodes.len() as u64,
            n_sporozoites: barcodes.iter().map(|b| b.1).sum(),
            n_drug_resistant_sporozoites: barcodes.iter().take(1).map(|b| b.1).sum(),
            n_infected_hosts: 2,
            n_host_infections: 4,
            n_drug_resistant_hosts: 1,
            n_drug_resistant_infections: n_infectious - 1,
            tally,
            sporozoite_barcodes: barcodes.iter().map(|&(b, n)| (b.to_string(), n)).collect(),
        }
    }

    #[test]
    fn reports_follow_records() {
        let cfg = crate::config::Config::example();
        let mut analyzer = Analyzer::new(cfg.clone());
        for obs in &mut analyzer.obs_ptr_vec {
            obs.update(&record(5, 2, &[("AAAAA", 30), ("CCCCC", 10)])).unwrap();
            obs.update(&record(10, 4, &[("CCCCC", 25)])).unwrap();
        }
        let reports: Vec<_> = analyzer.obs_ptr_vec.iter().flat_map(|obs| obs.report()).collect();

        let find = |name: &str| &reports.iter().find(|r| r.name == name).unwrap().report;

        match find("vector_infectious_fraction") {
            ObsReport::TimeSeries(report) => {
                assert!((report.mean - 0.3).abs() < 1e-12);
                assert!((report.last - 0.4).abs() < 1e-12);
            }
            other => panic!("unexpected report {other:?}"),
        }
        match find("infectious_bites_per_day") {
            ObsReport::PerSpecies(reports) => {
                let expected = 15.0 / cfg.output.steps_per_save as f64;
                assert!((reports[0].mean - expected).abs() < 1e-12);
            }
            other => panic!("unexpected report {other:?}"),
        }
        match find("top_sporozoite_barcodes") {
            ObsReport::Counts(counts) => {
                assert_eq!(counts[0], ("CCCCC".to_string(), 35));
                assert_eq!(counts[1], ("AAAAA".to_string(), 30));
            }
            other => panic!("unexpected report {other:?}"),
        }
        match find("oocyst_duration") {
            ObsReport::Single(report) => assert_eq!(report.n_vals, 0),
            other => panic!("unexpected report {other:?}"),
        }
        match find("drug_resistant_host_fraction") {
            ObsReport::TimeSeries(report) => assert!((report.mean - 0.5).abs() < 1e-12),
            other => panic!("unexpected report {other:?}"),
        }
        match find("drug_resistant_infection_fraction") {
            ObsReport::TimeSeries(report) => {
                assert!((report.mean - 0.5).abs() < 1e-12);
                assert!((report.last - 0.75).abs() < 1e-12);
            }
            other => panic!("unexpected report {other:?}"),
        }
        match find("drug_resistant_sporozoite_fraction") {
            ObsReport::TimeSeries(report) => {
                assert!((report.mean - 0.875).abs() < 1e-12);
                assert!((report.last - 1.0).abs() < 1e-12);
            }
            other => panic!("unexpected report {other:?}"),
        }
    }
}
