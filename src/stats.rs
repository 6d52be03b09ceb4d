use serde::{Deserialize, Serialize};

/// Running mean and variance of independent samples (Welford).
#[derive(Debug, Default)]
pub struct Accumulator {
    n_vals: usize,
    mean: f64,
    diff_2_sum: f64,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct AccumulatorReport {
    pub n_vals: usize,
    pub mean: f64,
    pub std_dev: f64,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, val: f64) {
        self.n_vals += 1;
        let delta = val - self.mean;
        self.mean += delta / self.n_vals as f64;
        self.diff_2_sum += delta * (val - self.mean);
    }

    pub fn report(&self) -> AccumulatorReport {
        let std_dev = match self.n_vals {
            0 | 1 => f64::NAN,
            n => (self.diff_2_sum / (n - 1) as f64).sqrt(),
        };
        AccumulatorReport {
            n_vals: self.n_vals,
            mean: if self.n_vals > 0 { self.mean } else { f64::NAN },
            std_dev,
        }
    }
}

/// Correlated samples of one observable over consecutive records.
#[derive(Debug, Default)]
pub struct TimeSeries {
    vals: Vec<f64>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesReport {
    pub n_vals: usize,
    /// Records discarded as transient before averaging.
    pub n_transient: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub sem: f64,
    pub last: f64,
}

impl TimeSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, val: f64) {
        self.vals.push(val);
    }

    pub fn report(&self) -> TimeSeriesReport {
        let n_transient = transient_len(&self.vals);
        let steady = &self.vals[n_transient..];
        TimeSeriesReport {
            n_vals: self.vals.len(),
            n_transient,
            mean: mean(steady),
            std_dev: variance(steady).sqrt(),
            sem: blocked_sem(steady),
            last: self.vals.last().copied().unwrap_or(f64::NAN),
        }
    }
}

fn mean(vals: &[f64]) -> f64 {
    if vals.is_empty() {
        return f64::NAN;
    }
    vals.iter().sum::<f64>() / vals.len() as f64
}

fn variance(vals: &[f64]) -> f64 {
    if vals.len() < 2 {
        return f64::NAN;
    }
    let mean = mean(vals);
    let sum_sq: f64 = vals.iter().map(|&val| (val - mean).powi(2)).sum();
    sum_sq / (vals.len() - 1) as f64
}

/// Standard error of the mean of correlated samples by repeated blocking.
///
/// Pairs of neighbouring samples are averaged until the variance estimate of
/// the mean stops growing beyond its own uncertainty.
fn blocked_sem(vals: &[f64]) -> f64 {
    let mut blocks = vals.to_vec();
    let mut estimates: Vec<(f64, f64)> = Vec::new();
    while blocks.len() >= 2 {
        let n = blocks.len() as f64;
        let sem_2 = variance(&blocks) / n;
        estimates.push((sem_2, sem_2 * (2.0 / (n - 1.0)).sqrt()));
        blocks = blocks
            .chunks_exact(2)
            .map(|pair| 0.5 * (pair[0] + pair[1]))
            .collect();
    }

    for (i_est, &(sem_2, _)) in estimates.iter().enumerate() {
        let plateau = estimates[i_est..]
            .iter()
            .map(|&(s, e)| s - e)
            .fold(f64::NEG_INFINITY, f64::max);
        if sem_2 > plateau {
            return sem_2.sqrt();
        }
    }
    estimates.last().map_or(f64::NAN, |&(sem_2, _)| sem_2.sqrt())
}

/// Number of leading samples to discard, minimising the marginal standard
/// error of the remaining ones over halving truncation points.
fn transient_len(vals: &[f64]) -> usize {
    let n_vals = vals.len();
    if n_vals < 4 {
        return 0;
    }

    let mut best = (f64::INFINITY, 0);
    let mut cut = 0;
    while n_vals - cut >= 2 {
        let rest = &vals[cut..];
        let n = rest.len() as f64;
        let mse = variance(rest) * (n - 1.0) / (n * n);
        if mse < best.0 {
            best = (mse, cut);
        }
        cut = if cut == 0 { n_vals / 8 } else { cut * 2 };
        if cut == 0 || cut > n_vals / 2 {
            break;
        }
    }
    best.1
}
