//! Error-model refinement strategies.
//!
//! Each strategy drives one or more targets through [`refine`] and turns the
//! refined active values back into `(a, b)`:
//!
//! - `Basic`: `a` from the normal probability plot of deviations computed at
//!   `a = 1`, then `b` from the binned variance target at that `a`; cycled.
//!   `b = 0` is a stationary point of that target, so start from a non-zero `b`.
//! - `Regression`: one joint fit of `(a², a²·b²)`.
//! - `Alternating`: regression of `a²` with `b` fixed, then of `b²` with `a`
//!   fixed; cycled.

use tracing::{debug, info};

use crate::data::binner::VarianceBinner;
use crate::data::group_table::{IntensityGroupTable, regression_x_y};
use crate::domain::{
    BinSummary, CycleRecord, ErrorModelFit, ErrorModelParams, FitConfig, ParamName, ParameterState,
    RefineStrategy,
};
use crate::error::TargetError;
use crate::fit::refiner::refine;
use crate::math::normal_probability_plot;
use crate::targets::{ParamATarget, ParamBTarget, RegressionMode, RegressionTarget};

/// Filter `table` per `config` and refine the error model on what remains.
pub fn refine_error_model(table: &IntensityGroupTable, config: &FitConfig) -> Result<ErrorModelFit, TargetError> {
    config.validate()?;
    let table = table.filtered(config.min_multiplicity, config.min_isigma)?;
    info!(
        strategy = config.strategy.display_name(),
        n_obs = table.n_obs(),
        n_groups = table.n_groups(),
        a0 = config.initial.a,
        b0 = config.initial.b,
        "refining error model"
    );

    let cycles = match config.strategy {
        RefineStrategy::Basic => refine_basic(&table, config)?,
        RefineStrategy::Regression => refine_joint(&table, config)?,
        RefineStrategy::Alternating => refine_alternating(&table, config)?,
    };

    let last = cycles
        .last()
        .ok_or_else(|| TargetError::Degenerate("no refinement cycle ran".into()))?;
    let params = ErrorModelParams::new(last.a, last.b);
    let converged = last.converged;
    info!(a = params.a, b = params.b, cycles = cycles.len(), converged, "error model refined");

    Ok(ErrorModelFit {
        strategy: config.strategy,
        params,
        bins: bin_summary(&table, config, &params),
        cycles,
        converged,
        n_obs: table.n_obs(),
        n_groups: table.n_groups(),
    })
}

fn refine_basic(table: &IntensityGroupTable, config: &FitConfig) -> Result<Vec<CycleRecord>, TargetError> {
    let mut binner = VarianceBinner::new(table, config.n_bins, config.min_per_bin)?;
    let mut params = config.initial;
    let mut cycles = Vec::with_capacity(config.max_cycles);

    for cycle in 1..=config.max_cycles {
        binner.update(&ErrorModelParams::new(1.0, params.b));
        let plot = normal_probability_plot(binner.deltas(), config.quantile_cutoff)?;
        let mut a_target = ParamATarget::from_plot(plot)?;
        let start = ParameterState::from_slice(&ParamATarget::ACTIVE, &[0.0, params.a])?;
        let a_fit = refine(&mut a_target, start, &config.refiner)?;
        let a = a_fit.values()[1].abs();
        if a == 0.0 {
            return Err(TargetError::Degenerate("probability plot has zero slope".into()));
        }

        let mut b_target = ParamBTarget::new(binner, a);
        let start = ParameterState::from_slice(&ParamBTarget::ACTIVE, &[params.b])?;
        let b_fit = refine(&mut b_target, start, &config.refiner)?;
        binner = b_target.into_binner();
        let b = b_fit.values()[0].abs();

        let next = ErrorModelParams::new(a, b);
        let done = params_converged(&params, &next, config.cycle_tolerance);
        debug!(cycle, a, b, f_a = a_fit.functional, f_b = b_fit.functional, "basic cycle");
        cycles.push(CycleRecord {
            cycle,
            a,
            b,
            functionals: vec![a_fit.functional, b_fit.functional],
            converged: done && a_fit.converged && b_fit.converged,
        });
        params = next;
        if done {
            break;
        }
    }
    Ok(cycles)
}

fn refine_joint(table: &IntensityGroupTable, config: &FitConfig) -> Result<Vec<CycleRecord>, TargetError> {
    let mut target = RegressionTarget::new(table, RegressionMode::FitJoint)?;
    let ErrorModelParams { a, b } = config.initial;
    let start = ParameterState::from_slice(&[ParamName::A, ParamName::B], &[a * a, a * a * b * b])?;
    let fit = refine(&mut target, start, &config.refiner)?;

    let (slope, intercept) = (fit.values()[0], fit.values()[1]);
    if slope <= 0.0 {
        return Err(TargetError::Degenerate(format!(
            "regression slope a² = {slope} is not positive"
        )));
    }
    Ok(vec![CycleRecord {
        cycle: 1,
        a: slope.sqrt(),
        b: (intercept / slope).max(0.0).sqrt(),
        functionals: vec![fit.functional],
        converged: fit.converged,
    }])
}

fn refine_alternating(table: &IntensityGroupTable, config: &FitConfig) -> Result<Vec<CycleRecord>, TargetError> {
    let (x, y) = regression_x_y(table)?;
    let mut params = config.initial;
    let mut cycles = Vec::with_capacity(config.max_cycles);

    for cycle in 1..=config.max_cycles {
        let mut a_target = RegressionTarget::from_xy(x.clone(), y.clone(), RegressionMode::FitA { b: params.b })?;
        let start = ParameterState::from_slice(&[ParamName::A], &[params.a * params.a])?;
        let a_fit = refine(&mut a_target, start, &config.refiner)?;
        let asq = a_fit.values()[0];
        if asq <= 0.0 {
            return Err(TargetError::Degenerate(format!("regression a² = {asq} is not positive")));
        }
        let a = asq.sqrt();

        let mut b_target = RegressionTarget::from_xy(x.clone(), y.clone(), RegressionMode::FitB { a })?;
        let start = ParameterState::from_slice(&[ParamName::B], &[params.b * params.b])?;
        let b_fit = refine(&mut b_target, start, &config.refiner)?;
        let b = b_fit.values()[0].max(0.0).sqrt();

        let next = ErrorModelParams::new(a, b);
        let done = params_converged(&params, &next, config.cycle_tolerance);
        debug!(cycle, a, b, f_a = a_fit.functional, f_b = b_fit.functional, "alternating cycle");
        cycles.push(CycleRecord {
            cycle,
            a,
            b,
            functionals: vec![a_fit.functional, b_fit.functional],
            converged: done && a_fit.converged && b_fit.converged,
        });
        params = next;
        if done {
            break;
        }
    }
    Ok(cycles)
}

/// Both parameters changed by less than `tolerance`, relative to their size.
fn params_converged(prev: &ErrorModelParams, next: &ErrorModelParams, tolerance: f64) -> bool {
    let rel = |p: f64, q: f64| {
        let scale = p.abs().max(q.abs());
        if scale == 0.0 { 0.0 } else { (p - q).abs() / scale }
    };
    rel(prev.a, next.a) < tolerance && rel(prev.b, next.b) < tolerance
}

/// Bin diagnostics at `params`, or nothing when the table cannot be binned.
fn bin_summary(table: &IntensityGroupTable, config: &FitConfig, params: &ErrorModelParams) -> Vec<BinSummary> {
    match VarianceBinner::new(table, config.n_bins, config.min_per_bin) {
        Ok(mut binner) => {
            binner.update(params);
            binner.summary()
        }
        Err(err) => {
            debug!(%err, "no bin summary");
            Vec::new()
        }
    }
}
