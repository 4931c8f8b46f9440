//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during refinement
//! - printed as JSON by the `sem` binary
//! - compared across independent experiments in batch runs

use clap::ValueEnum;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::error::TargetError;

/// Name tag of one entry of the active parameter vector.
///
/// `A` and `B` are the error-model parameters (their exact interpretation,
/// e.g. `a²` vs `a`, depends on the target). `Intercept` and `Slope` belong
/// to the straight-line fit of the normal probability plot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamName {
    A,
    B,
    Intercept,
    Slope,
}

impl std::fmt::Display for ParamName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ParamName::A => "a",
            ParamName::B => "b",
            ParamName::Intercept => "intercept",
            ParamName::Slope => "slope",
        };
        f.write_str(name)
    }
}

/// Ordered active parameter values plus their name tags.
///
/// Owned by the optimizer; targets only read it.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterState {
    names: Vec<ParamName>,
    values: DVector<f64>,
}

impl ParameterState {
    pub fn new(names: Vec<ParamName>, values: DVector<f64>) -> Result<Self, TargetError> {
        if names.len() != values.len() {
            return Err(TargetError::LengthMismatch {
                what: "parameter values",
                expected: names.len(),
                found: values.len(),
            });
        }
        Ok(Self { names, values })
    }

    pub fn from_slice(names: &[ParamName], values: &[f64]) -> Result<Self, TargetError> {
        Self::new(names.to_vec(), DVector::from_column_slice(values))
    }

    pub fn names(&self) -> &[ParamName] {
        &self.names
    }

    pub fn values(&self) -> &DVector<f64> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Same names, new values (used by the refiner to form trial states).
    pub fn with_values(&self, values: DVector<f64>) -> Result<Self, TargetError> {
        Self::new(self.names.clone(), values)
    }

    /// Value of the first entry tagged `name`.
    pub fn value(&self, name: ParamName) -> Option<f64> {
        self.names
            .iter()
            .position(|&n| n == name)
            .map(|idx| self.values[idx])
    }
}

/// The two global error-model parameters.
///
/// `a` scales the reported uncertainty; `b` adds a term proportional to the
/// measured value. Keeping the corrected variance positive is the caller's job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ErrorModelParams {
    pub a: f64,
    pub b: f64,
}

impl ErrorModelParams {
    pub fn new(a: f64, b: f64) -> Self {
        Self { a, b }
    }

    /// Parameters that leave reported sigmas untouched.
    pub fn identity() -> Self {
        Self { a: 1.0, b: 0.0 }
    }
}

impl Default for ErrorModelParams {
    fn default() -> Self {
        Self { a: 1.0, b: 0.02 }
    }
}

/// One measured intensity with its reported variance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Equivalence-group label assigned upstream.
    pub group: String,
    pub intensity: f64,
    pub variance: f64,
    pub inverse_scale: f64,
}

/// How the error model is refined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RefineStrategy {
    /// Normal-probability-plot fit of `a`, then binned variance fit of `b`, cycled.
    Basic,
    /// Joint weighted regression of `(a², a²b²)`.
    Regression,
    /// Regression of `a²` and `b²` one at a time, cycled.
    Alternating,
}

impl RefineStrategy {
    /// Human-readable label for terminal output.
    pub fn display_name(self) -> &'static str {
        match self {
            RefineStrategy::Basic => "basic (binned)",
            RefineStrategy::Regression => "joint regression",
            RefineStrategy::Alternating => "alternating regression",
        }
    }
}

/// Stopping rules for the reference refiner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinerOptions {
    pub max_iterations: usize,
    /// Relative functional change below which refinement stops.
    pub ftol: f64,
    /// Gradient norm below which refinement stops (0 disables).
    pub gtol: f64,
    /// Relative step size below which refinement stops.
    pub xtol: f64,
    /// Relative step for the finite-difference Hessian.
    pub fd_step: f64,
}

impl Default for RefinerOptions {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            ftol: 1e-12,
            gtol: 0.0,
            xtol: 1e-12,
            fd_step: 1e-6,
        }
    }
}

/// A full run's error-model configuration.
///
/// Derived from CLI flags (plus defaults) in the binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitConfig {
    pub strategy: RefineStrategy,
    pub initial: ErrorModelParams,

    /// Requested number of intensity bins for the `b` fit.
    pub n_bins: usize,
    /// Bins are merged until each holds at least this many observations.
    pub min_per_bin: usize,

    /// Groups with fewer members are dropped before refinement.
    pub min_multiplicity: usize,
    /// Observations with `I/σ` below this are dropped before refinement.
    pub min_isigma: Option<f64>,

    /// Only probability-plot points with `|x| <= cutoff` enter the `a` fit.
    pub quantile_cutoff: f64,

    pub max_cycles: usize,
    /// Relative parameter change below which cycling stops.
    pub cycle_tolerance: f64,

    pub refiner: RefinerOptions,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            strategy: RefineStrategy::Basic,
            initial: ErrorModelParams::default(),
            n_bins: 10,
            min_per_bin: 10,
            min_multiplicity: 2,
            min_isigma: None,
            quantile_cutoff: 1.5,
            max_cycles: 10,
            cycle_tolerance: 1e-4,
            refiner: RefinerOptions::default(),
        }
    }
}

impl FitConfig {
    pub fn validate(&self) -> Result<(), TargetError> {
        if self.n_bins == 0 {
            return Err(TargetError::InvalidOption {
                name: "n_bins",
                reason: "must be > 0".into(),
            });
        }
        if self.min_per_bin < 2 {
            return Err(TargetError::InvalidOption {
                name: "min_per_bin",
                reason: "a bin variance needs at least 2 observations".into(),
            });
        }
        if self.min_multiplicity < 2 {
            return Err(TargetError::InvalidOption {
                name: "min_multiplicity",
                reason: "groups need at least 2 observations".into(),
            });
        }
        if !(self.quantile_cutoff.is_finite() && self.quantile_cutoff > 0.0) {
            return Err(TargetError::InvalidOption {
                name: "quantile_cutoff",
                reason: format!("must be finite and > 0, got {}", self.quantile_cutoff),
            });
        }
        if self.max_cycles == 0 {
            return Err(TargetError::InvalidOption {
                name: "max_cycles",
                reason: "must be > 0".into(),
            });
        }
        if !(self.initial.a.is_finite() && self.initial.b.is_finite()) {
            return Err(TargetError::InvalidOption {
                name: "initial",
                reason: "initial parameters must be finite".into(),
            });
        }
        Ok(())
    }
}

/// Parameters after one refinement cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub cycle: usize,
    pub a: f64,
    pub b: f64,
    /// Final functional of each target refined during the cycle.
    pub functionals: Vec<f64>,
    pub converged: bool,
}

/// Per-bin diagnostics at the final parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinSummary {
    pub ih_min: f64,
    pub ih_max: f64,
    pub n_obs: usize,
    pub variance: f64,
    pub weight: f64,
}

/// Output of a full error-model refinement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorModelFit {
    pub strategy: RefineStrategy,
    pub params: ErrorModelParams,
    pub cycles: Vec<CycleRecord>,
    pub converged: bool,
    pub n_obs: usize,
    pub n_groups: usize,
    pub bins: Vec<BinSummary>,
}
