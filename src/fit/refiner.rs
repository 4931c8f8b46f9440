//! Reference optimizer for error-model targets.
//!
//! A damped Newton iteration driven purely through [`ErrorModelTarget`]:
//!
//! - the Hessian is a forward difference of the analytic gradient, solved
//!   with [`solve_least_squares`]
//! - when the Newton direction does not descend, a scaled steepest-descent
//!   direction is used instead
//! - steps are accepted by Armijo backtracking
//!
//! Every evaluation goes through [`ErrorModelTarget::evaluate`], so a target's
//! `progress` hook always sees a state before its residuals are read. On
//! return the target has been progressed to the final state.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{ParameterState, RefinerOptions};
use crate::error::TargetError;
use crate::math::solve_least_squares;
use crate::targets::{ErrorModelTarget, Evaluation};

const ARMIJO_C: f64 = 1e-4;
const MAX_BACKTRACKS: usize = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub functional: f64,
    pub gradient_norm: f64,
    pub rmsd: f64,
}

#[derive(Debug, Clone)]
pub struct RefinementResult {
    pub state: ParameterState,
    pub functional: f64,
    pub iterations: usize,
    pub converged: bool,
    pub history: Vec<IterationRecord>,
}

impl RefinementResult {
    pub fn values(&self) -> &DVector<f64> {
        self.state.values()
    }
}

/// Minimize the target's functional starting from `start`.
///
/// Non-finite functionals or gradients fail with [`TargetError::NonFinite`].
/// Running out of iterations or stalling in the line search is not an error:
/// the best state so far is returned with `converged = false`.
pub fn refine<T: ErrorModelTarget + ?Sized>(
    target: &mut T,
    start: ParameterState,
    opts: &RefinerOptions,
) -> Result<RefinementResult, TargetError> {
    target.check_state(&start)?;

    let mut state = start;
    let mut eval = checked_evaluate(target, &state, 0)?;
    let mut history = vec![record(target, &state, &eval, 0)?];
    let mut converged = false;
    let mut iterations = 0;

    for iteration in 1..=opts.max_iterations {
        let gradient_norm = eval.gradient.norm();
        if gradient_norm <= opts.gtol {
            converged = true;
            break;
        }
        iterations = iteration;

        let direction = match newton_direction(target, &state, &eval, opts.fd_step, iteration)? {
            Some(d) if d.dot(&eval.gradient) < 0.0 => d,
            _ => {
                let scale = state.values().norm().max(1.0) / gradient_norm;
                -&eval.gradient * scale
            }
        };

        let x_norm = state.values().norm();
        if direction.norm() <= opts.xtol * (x_norm + opts.xtol) {
            converged = true;
            break;
        }

        let slope = direction.dot(&eval.gradient);
        let mut accepted = None;
        let mut step = 1.0;
        for _ in 0..MAX_BACKTRACKS {
            let trial = state.with_values(state.values() + &direction * step)?;
            let trial_eval = checked_evaluate(target, &trial, iteration)?;
            if trial_eval.functional <= eval.functional + ARMIJO_C * step * slope {
                accepted = Some((trial, trial_eval));
                break;
            }
            step *= 0.5;
        }

        let Some((trial, trial_eval)) = accepted else {
            warn!(iteration, functional = eval.functional, "line search stalled");
            break;
        };

        let step_norm = (trial.values() - state.values()).norm();
        let f_change = relative_change(eval.functional, trial_eval.functional);
        state = trial;
        eval = trial_eval;

        let entry = record(target, &state, &eval, iteration)?;
        debug!(
            iteration,
            functional = entry.functional,
            gradient_norm = entry.gradient_norm,
            rmsd = entry.rmsd,
            step,
            "refiner step"
        );
        history.push(entry);

        if step_norm <= opts.xtol * (x_norm + opts.xtol) || f_change <= opts.ftol || eval.functional == 0.0 {
            converged = true;
            break;
        }
    }

    // Leave the target progressed to the returned state.
    let eval = checked_evaluate(target, &state, iterations)?;
    Ok(RefinementResult {
        state,
        functional: eval.functional,
        iterations,
        converged,
        history,
    })
}

fn checked_evaluate<T: ErrorModelTarget + ?Sized>(
    target: &mut T,
    state: &ParameterState,
    iteration: usize,
) -> Result<Evaluation, TargetError> {
    let eval = target.evaluate(state)?;
    if !eval.functional.is_finite() {
        return Err(TargetError::NonFinite {
            what: "functional",
            value: eval.functional,
            iteration,
        });
    }
    if let Some(&value) = eval.gradient.iter().find(|g| !g.is_finite()) {
        return Err(TargetError::NonFinite {
            what: "gradient",
            value,
            iteration,
        });
    }
    Ok(eval)
}

/// Solve `H·d = −g` with a forward-difference Hessian of the analytic gradient.
///
/// The target is left progressed at a perturbed state; callers evaluate again
/// before reading residuals.
fn newton_direction<T: ErrorModelTarget + ?Sized>(
    target: &mut T,
    state: &ParameterState,
    eval: &Evaluation,
    fd_step: f64,
    iteration: usize,
) -> Result<Option<DVector<f64>>, TargetError> {
    let n = state.len();
    let mut hessian = DMatrix::zeros(n, n);
    for j in 0..n {
        let h = fd_step * state.values()[j].abs().max(1.0);
        let mut shifted = state.values().clone();
        shifted[j] += h;
        let g_shift = checked_evaluate(target, &state.with_values(shifted)?, iteration)?.gradient;
        hessian.set_column(j, &((g_shift - &eval.gradient) / h));
    }
    let hessian = (&hessian + hessian.transpose()) * 0.5;
    Ok(solve_least_squares(&hessian, &(-&eval.gradient)))
}

fn record<T: ErrorModelTarget + ?Sized>(
    target: &T,
    state: &ParameterState,
    eval: &Evaluation,
    iteration: usize,
) -> Result<IterationRecord, TargetError> {
    let rmsd = target.rmsds(state)?.first().copied().unwrap_or(f64::NAN);
    Ok(IterationRecord {
        iteration,
        functional: eval.functional,
        gradient_norm: eval.gradient.norm(),
        rmsd,
    })
}

fn relative_change(prev: f64, curr: f64) -> f64 {
    let scale = prev.abs().max(curr.abs());
    if scale == 0.0 {
        return 0.0;
    }
    (prev - curr).abs() / scale
}
