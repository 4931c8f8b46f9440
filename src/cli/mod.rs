//! Command-line parsing for the `sem` error-model tool.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the refinement code.

use clap::{Args, Parser, Subcommand};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "sem", version, about = "Error-model refinement for grouped intensity measurements")]
pub struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn", env = "SEM_LOG_LEVEL")]
    pub log_level: tracing::Level,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Simulate one experiment, refine its error model and print diagnostics.
    Fit(FitArgs),
    /// Refine many independent simulated experiments in parallel.
    Batch(BatchArgs),
    /// List the available error models.
    Models,
}

/// Settings of the simulated experiment.
#[derive(Debug, Args, Clone)]
pub struct ExperimentArgs {
    /// Number of equivalence groups.
    #[arg(short = 'n', long, default_value_t = 2000)]
    pub groups: usize,

    /// Observations per group.
    #[arg(short = 'm', long, default_value_t = 4)]
    pub multiplicity: usize,

    /// `a` used to draw the noise.
    #[arg(long, default_value_t = 1.2)]
    pub true_a: f64,

    /// `b` used to draw the noise.
    #[arg(long, default_value_t = 0.03)]
    pub true_b: f64,

    /// Smallest true intensity.
    #[arg(long, default_value_t = 5.0)]
    pub intensity_min: f64,

    /// Largest true intensity.
    #[arg(long, default_value_t = 5000.0)]
    pub intensity_max: f64,

    /// Inverse scales are drawn uniformly from 1 ± spread.
    #[arg(long, default_value_t = 0.2)]
    pub scale_spread: f64,

    /// Flat background added to every reported variance.
    #[arg(long, default_value_t = 10.0)]
    pub background: f64,

    /// Random seed for the simulation.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

/// Error-model refinement options.
#[derive(Debug, Args, Clone)]
pub struct RefineArgs {
    /// Error model to refine (see `sem models`).
    #[arg(long, default_value = "basic", env = "SEM_MODEL")]
    pub model: String,

    /// Starting parameters as JSON, e.g. '{"a": 1.0, "b": 0.02}'.
    #[arg(long, value_name = "JSON")]
    pub initial_params: Option<String>,

    /// Requested number of intensity bins.
    #[arg(long, default_value_t = 10)]
    pub n_bins: usize,

    /// Minimum observations per bin.
    #[arg(long, default_value_t = 10)]
    pub min_per_bin: usize,

    /// Drop groups with fewer observations.
    #[arg(long, default_value_t = 2)]
    pub min_multiplicity: usize,

    /// Drop observations with I/sigma below this.
    #[arg(long)]
    pub min_isigma: Option<f64>,

    /// Probability-plot points with |x| above this are ignored when fitting a.
    #[arg(long, default_value_t = 1.5)]
    pub quantile_cutoff: f64,

    /// Maximum number of refinement cycles.
    #[arg(long, default_value_t = 10)]
    pub max_cycles: usize,

    /// Relative parameter change that ends cycling.
    #[arg(long, default_value_t = 1e-4)]
    pub cycle_tolerance: f64,

    /// Iteration limit of each target refinement.
    #[arg(long, default_value_t = 50)]
    pub max_iterations: usize,
}

#[derive(Debug, Args, Clone)]
pub struct FitArgs {
    #[command(flatten)]
    pub experiment: ExperimentArgs,

    #[command(flatten)]
    pub refine: RefineArgs,

    /// Print the result as JSON instead of a text report.
    #[arg(long)]
    pub json: bool,

    /// Render a normal probability plot of the corrected deviations.
    #[arg(long)]
    pub plot: bool,

    /// Plot width (columns).
    #[arg(long, default_value_t = 72)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 20)]
    pub height: usize,
}

#[derive(Debug, Args, Clone)]
pub struct BatchArgs {
    #[command(flatten)]
    pub experiment: ExperimentArgs,

    #[command(flatten)]
    pub refine: RefineArgs,

    /// Number of experiments; experiment `i` uses seed `seed + i`.
    #[arg(long, default_value_t = 8)]
    pub experiments: usize,

    /// Print the per-experiment results as JSON.
    #[arg(long)]
    pub json: bool,
}
