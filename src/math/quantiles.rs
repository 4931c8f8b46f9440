//! Normal probability plot of normalized deviations.
//!
//! If the deviations `δ` were computed with `a = 1`, plotting them sorted
//! against the expected normal order statistics gives a straight line whose
//! slope estimates `a`. Only the central part of the plot is used: the tails
//! are dominated by outliers.

use nalgebra::DVector;
use statrs::distribution::{ContinuousCDF, Normal};

use crate::error::TargetError;

/// Points of a normal probability plot, sorted ascending by `x`.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalProbabilityPlot {
    /// Expected standard-normal order statistics.
    pub x: DVector<f64>,
    /// Sorted deviations.
    pub y: DVector<f64>,
}

impl NormalProbabilityPlot {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

/// `Φ⁻¹((i + 0.5) / n)` for `i in 0..n`.
pub fn normal_order_statistics(n: usize) -> Result<Vec<f64>, TargetError> {
    let normal = Normal::new(0.0, 1.0).map_err(|e| TargetError::InvalidOption {
        name: "normal",
        reason: e.to_string(),
    })?;
    Ok((0..n)
        .map(|i| normal.inverse_cdf((i as f64 + 0.5) / n as f64))
        .collect())
}

/// Sort `deltas` and pair them with normal order statistics, keeping `|x| <= cutoff`.
///
/// Non-finite deviations are dropped before ranking.
pub fn normal_probability_plot(deltas: &DVector<f64>, cutoff: f64) -> Result<NormalProbabilityPlot, TargetError> {
    let mut sorted: Vec<f64> = deltas.iter().copied().filter(|d| d.is_finite()).collect();
    if sorted.is_empty() {
        return Err(TargetError::EmptyTable);
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let expected = normal_order_statistics(sorted.len())?;
    let (x, y): (Vec<f64>, Vec<f64>) = expected
        .into_iter()
        .zip(sorted)
        .filter(|(x, _)| x.abs() <= cutoff)
        .unzip();

    if x.len() < 2 {
        return Err(TargetError::Degenerate(format!(
            "only {} probability-plot point(s) within |x| <= {cutoff}",
            x.len()
        )));
    }

    Ok(NormalProbabilityPlot {
        x: DVector::from_vec(x),
        y: DVector::from_vec(y),
    })
}
