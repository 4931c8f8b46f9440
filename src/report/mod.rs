//! Reporting utilities: serializable run reports and batch statistics.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::app::pipeline::{BatchRow, RunOutput};
use crate::data::{SampleConfig, SampleStats};
use crate::domain::ErrorModelFit;

pub mod format;

pub use format::*;

/// JSON document printed by `sem fit --json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub generated: DateTime<Local>,
    pub sample: SampleConfig,
    pub stats: SampleStats,
    pub fit: ErrorModelFit,
}

impl RunReport {
    pub fn new(run: &RunOutput, sample: &SampleConfig) -> Self {
        Self {
            generated: Local::now(),
            sample: sample.clone(),
            stats: run.sample.stats.clone(),
            fit: run.fit.clone(),
        }
    }
}

/// Spread of the refined parameters across a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub n: usize,
    pub n_converged: usize,
    pub mean_a: f64,
    pub sd_a: f64,
    pub mean_b: f64,
    pub sd_b: f64,
}

/// Mean and sample standard deviation of `a` and `b` over `rows`.
pub fn summarize_batch(rows: &[BatchRow]) -> Option<BatchSummary> {
    if rows.is_empty() {
        return None;
    }
    let (mean_a, sd_a) = mean_sd(rows.iter().map(|r| r.params.a));
    let (mean_b, sd_b) = mean_sd(rows.iter().map(|r| r.params.b));
    Some(BatchSummary {
        n: rows.len(),
        n_converged: rows.iter().filter(|r| r.converged).count(),
        mean_a,
        sd_a,
        mean_b,
        sd_b,
    })
}

fn mean_sd(values: impl Iterator<Item = f64> + Clone) -> (f64, f64) {
    let n = values.clone().count() as f64;
    let mean = values.clone().sum::<f64>() / n;
    if n < 2.0 {
        return (mean, 0.0);
    }
    let ss: f64 = values.map(|v| (v - mean).powi(2)).sum();
    (mean, (ss / (n - 1.0)).sqrt())
}
