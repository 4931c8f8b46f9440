//! Shared "experiment pipeline" logic used by the `fit` and `batch` commands.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! simulate -> group table -> refine error model
//!
//! The commands can then focus on presentation (text vs JSON).

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::data::{IntensityGroupTable, SampleConfig, SampleData, VarianceBinner, generate_sample};
use crate::domain::{ErrorModelFit, ErrorModelParams, FitConfig};
use crate::error::AppError;
use crate::fit::refine_error_model;
use crate::math::{NormalProbabilityPlot, normal_probability_plot};

/// All computed outputs of a single experiment.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub sample: SampleData,
    pub table: IntensityGroupTable,
    pub fit: ErrorModelFit,
}

/// One line of a batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRow {
    pub experiment: usize,
    pub seed: u64,
    pub params: ErrorModelParams,
    pub cycles: usize,
    pub converged: bool,
}

/// Simulate one experiment and refine its error model.
pub fn run_experiment(sample_config: &SampleConfig, fit_config: &FitConfig) -> Result<RunOutput, AppError> {
    let sample = generate_sample(sample_config)?;
    let table = IntensityGroupTable::from_observations(&sample.observations)?;
    let fit = refine_error_model(&table, fit_config)?;
    Ok(RunOutput { sample, table, fit })
}

/// Run `experiments` independent experiments in parallel.
///
/// Experiment `i` uses seed `seed + i`; each builds its own table, binner and
/// targets, so nothing is shared between threads.
pub fn run_batch(
    sample_config: &SampleConfig,
    fit_config: &FitConfig,
    experiments: usize,
) -> Result<Vec<BatchRow>, AppError> {
    let rows = (0..experiments)
        .into_par_iter()
        .map(|experiment| {
            let seed = sample_config.seed.wrapping_add(experiment as u64);
            let config = SampleConfig {
                seed,
                ..sample_config.clone()
            };
            let run = run_experiment(&config, fit_config)?;
            Ok(BatchRow {
                experiment,
                seed,
                params: run.fit.params,
                cycles: run.fit.cycles.len(),
                converged: run.fit.converged,
            })
        })
        .collect::<Result<Vec<_>, AppError>>()?;

    info!(experiments, "batch finished");
    Ok(rows)
}

/// Probability plot of the deviations at the refined parameters (all points).
pub fn probability_plot(run: &RunOutput, fit_config: &FitConfig) -> Result<NormalProbabilityPlot, AppError> {
    let table = run
        .table
        .filtered(fit_config.min_multiplicity, fit_config.min_isigma)?;
    let mut binner = VarianceBinner::new(&table, fit_config.n_bins, fit_config.min_per_bin)?;
    binner.update(&run.fit.params);
    Ok(normal_probability_plot(binner.deltas(), f64::INFINITY)?)
}
