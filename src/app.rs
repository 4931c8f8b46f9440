//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` and parses CLI arguments
//! - installs the log subscriber
//! - simulates experiments and refines their error models
//! - prints reports/plots

use clap::Parser;

use crate::cli::{BatchArgs, Command, ExperimentArgs, FitArgs, RefineArgs};
use crate::data::SampleConfig;
use crate::domain::{ErrorModelParams, FitConfig, RefinerOptions};
use crate::error::AppError;
use crate::models::registry;

pub mod pipeline;

/// Entry point for the `sem` binary.
pub fn run() -> Result<(), AppError> {
    // Before parsing, so `.env` can provide SEM_* defaults.
    dotenvy::dotenv().ok();
    let cli = crate::cli::Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Fit(args) => handle_fit(args),
        Command::Batch(args) => handle_batch(args),
        Command::Models => handle_models(),
    }
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let sample_config = sample_config_from_args(&args.experiment);
    let fit_config = fit_config_from_args(&args.refine)?;
    let run = pipeline::run_experiment(&sample_config, &fit_config)?;

    if args.json {
        let report = crate::report::RunReport::new(&run, &sample_config);
        let text = serde_json::to_string_pretty(&report)
            .map_err(|e| AppError::new(4, format!("Failed to serialize report: {e}")))?;
        println!("{text}");
        return Ok(());
    }

    println!(
        "{}",
        crate::report::format_run_summary(&run.sample.stats, &sample_config, &run.fit, &fit_config)
    );
    println!("{}", crate::report::format_bin_table(&run.fit.bins));

    if args.plot {
        let plot = pipeline::probability_plot(&run, &fit_config)?;
        println!("{}", crate::plot::render_probability_plot(&plot, args.width, args.height));
    }
    Ok(())
}

fn handle_batch(args: BatchArgs) -> Result<(), AppError> {
    if args.experiments == 0 {
        return Err(AppError::new(2, "Experiment count must be > 0."));
    }
    let sample_config = sample_config_from_args(&args.experiment);
    let fit_config = fit_config_from_args(&args.refine)?;
    let rows = pipeline::run_batch(&sample_config, &fit_config, args.experiments)?;

    if args.json {
        let text = serde_json::to_string_pretty(&rows)
            .map_err(|e| AppError::new(4, format!("Failed to serialize batch: {e}")))?;
        println!("{text}");
        return Ok(());
    }
    println!("{}", crate::report::format_batch(&rows, &sample_config.truth));
    Ok(())
}

fn handle_models() -> Result<(), AppError> {
    println!("{}", crate::report::format_models(registry::MODELS));
    Ok(())
}

pub fn sample_config_from_args(args: &ExperimentArgs) -> SampleConfig {
    SampleConfig {
        n_groups: args.groups,
        multiplicity: args.multiplicity,
        truth: ErrorModelParams::new(args.true_a, args.true_b),
        intensity_min: args.intensity_min,
        intensity_max: args.intensity_max,
        scale_spread: args.scale_spread,
        background: args.background,
        seed: args.seed,
    }
}

/// Resolve the model by name and assemble a validated configuration.
pub fn fit_config_from_args(args: &RefineArgs) -> Result<FitConfig, AppError> {
    let model = registry::resolve(&args.model)?;
    let initial = match &args.initial_params {
        Some(text) => (model.deserialize)(text)?,
        None => ErrorModelParams::default(),
    };
    let config = FitConfig {
        strategy: model.strategy,
        initial,
        n_bins: args.n_bins,
        min_per_bin: args.min_per_bin,
        min_multiplicity: args.min_multiplicity,
        min_isigma: args.min_isigma,
        quantile_cutoff: args.quantile_cutoff,
        max_cycles: args.max_cycles,
        cycle_tolerance: args.cycle_tolerance,
        refiner: RefinerOptions {
            max_iterations: args.max_iterations,
            ..RefinerOptions::default()
        },
    };
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Command};
    use crate::domain::RefineStrategy;

    fn refine_args(extra: &[&str]) -> RefineArgs {
        let argv = ["sem", "fit"].iter().chain(extra.iter()).copied();
        let Command::Fit(args) = Cli::try_parse_from(argv).unwrap().command else {
            panic!("expected fit");
        };
        args.refine
    }

    #[test]
    fn model_name_selects_strategy() {
        let config = fit_config_from_args(&refine_args(&["--model", "Regression"])).unwrap();
        assert_eq!(config.strategy, RefineStrategy::Regression);
        assert_eq!(config.initial, ErrorModelParams::default());
    }

    #[test]
    fn initial_params_are_read_from_json() {
        let config = fit_config_from_args(&refine_args(&["--initial-params", r#"{"a": 1.5, "b": 0.01}"#])).unwrap();
        assert_eq!(config.initial, ErrorModelParams::new(1.5, 0.01));
    }

    #[test]
    fn unknown_model_is_a_usage_error() {
        let err = fit_config_from_args(&refine_args(&["--model", "ransac"])).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("basic, regression, alternating"));
    }
}
