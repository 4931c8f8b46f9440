//! Observations grouped by symmetry equivalence.
//!
//! The table is read-only once built. Group-level and observation-level
//! arrays are related by two operators:
//! - `expand`: copy a per-group value to every member observation
//! - `contract`: sum per-observation values over each group
//!
//! Both are index maps rather than explicit 0/1 matrices.

use std::collections::BTreeMap;

use nalgebra::DVector;

use crate::domain::Observation;
use crate::error::TargetError;

#[derive(Debug, Clone)]
pub struct IntensityGroupTable {
    intensities: DVector<f64>,
    variances: DVector<f64>,
    inverse_scales: DVector<f64>,
    /// Dense group index per observation.
    group_index: Vec<usize>,
    group_labels: Vec<String>,
    group_sizes: Vec<usize>,
    /// Per-group scaled mean intensity.
    group_ih: DVector<f64>,
}

impl IntensityGroupTable {
    /// Validate observations and derive group means.
    ///
    /// Groups are indexed in sorted label order so the layout is deterministic.
    pub fn from_observations(observations: &[Observation]) -> Result<Self, TargetError> {
        if observations.is_empty() {
            return Err(TargetError::EmptyTable);
        }
        for (index, o) in observations.iter().enumerate() {
            if !(o.intensity.is_finite() && o.variance.is_finite() && o.inverse_scale.is_finite()) {
                return Err(TargetError::InvalidObservation {
                    index,
                    reason: "non-finite value",
                });
            }
            if o.variance <= 0.0 {
                return Err(TargetError::InvalidObservation {
                    index,
                    reason: "variance must be > 0",
                });
            }
            if o.inverse_scale <= 0.0 {
                return Err(TargetError::InvalidObservation {
                    index,
                    reason: "inverse scale must be > 0",
                });
            }
        }

        let mut labels: BTreeMap<&str, usize> = BTreeMap::new();
        for o in observations {
            labels.entry(o.group.as_str()).or_insert(0);
        }
        for (idx, slot) in labels.values_mut().enumerate() {
            *slot = idx;
        }

        let n_groups = labels.len();
        let group_index: Vec<usize> = observations.iter().map(|o| labels[o.group.as_str()]).collect();
        let group_labels: Vec<String> = labels.keys().map(|k| k.to_string()).collect();
        let mut group_sizes = vec![0usize; n_groups];
        for &g in &group_index {
            group_sizes[g] += 1;
        }

        let n = observations.len();
        let intensities = DVector::from_iterator(n, observations.iter().map(|o| o.intensity));
        let variances = DVector::from_iterator(n, observations.iter().map(|o| o.variance));
        let inverse_scales = DVector::from_iterator(n, observations.iter().map(|o| o.inverse_scale));

        let mut table = Self {
            intensities,
            variances,
            inverse_scales,
            group_index,
            group_labels,
            group_sizes,
            group_ih: DVector::zeros(n_groups),
        };
        table.group_ih = table.compute_group_means();
        Ok(table)
    }

    /// `Ih = Σ(w·g·I) / Σ(w·g²)` with `w = 1/σ²`.
    fn compute_group_means(&self) -> DVector<f64> {
        let w = self.variances.map(|v| 1.0 / v);
        let numer = w
            .component_mul(&self.inverse_scales)
            .component_mul(&self.intensities);
        let denom = w
            .component_mul(&self.inverse_scales)
            .component_mul(&self.inverse_scales);
        self.contract(&numer).component_div(&self.contract(&denom))
    }

    /// Drop weak observations, then groups that became too small.
    pub fn filtered(&self, min_multiplicity: usize, min_isigma: Option<f64>) -> Result<Self, TargetError> {
        let keep_obs: Vec<bool> = (0..self.n_obs())
            .map(|i| match min_isigma {
                Some(cut) => self.intensities[i] / self.variances[i].sqrt() >= cut,
                None => true,
            })
            .collect();

        let mut sizes = vec![0usize; self.n_groups()];
        for (i, &g) in self.group_index.iter().enumerate() {
            if keep_obs[i] {
                sizes[g] += 1;
            }
        }

        let kept: Vec<Observation> = (0..self.n_obs())
            .filter(|&i| keep_obs[i] && sizes[self.group_index[i]] >= min_multiplicity)
            .map(|i| self.observation(i))
            .collect();

        Self::from_observations(&kept)
    }

    /// Rebuild the `i`-th observation.
    pub fn observation(&self, i: usize) -> Observation {
        Observation {
            group: self.group_labels[self.group_index[i]].clone(),
            intensity: self.intensities[i],
            variance: self.variances[i],
            inverse_scale: self.inverse_scales[i],
        }
    }

    pub fn n_obs(&self) -> usize {
        self.intensities.len()
    }

    pub fn n_groups(&self) -> usize {
        self.group_sizes.len()
    }

    pub fn intensities(&self) -> &DVector<f64> {
        &self.intensities
    }

    pub fn variances(&self) -> &DVector<f64> {
        &self.variances
    }

    pub fn inverse_scales(&self) -> &DVector<f64> {
        &self.inverse_scales
    }

    pub fn group_index(&self) -> &[usize] {
        &self.group_index
    }

    pub fn group_label(&self, group: usize) -> &str {
        &self.group_labels[group]
    }

    /// Per-group scaled mean intensity.
    pub fn group_ih(&self) -> &DVector<f64> {
        &self.group_ih
    }

    /// Group mean intensity expanded to every observation.
    pub fn ih_values(&self) -> DVector<f64> {
        self.expand(&self.group_ih)
    }

    /// Number of observations in each group.
    pub fn group_multiplicities(&self) -> DVector<f64> {
        DVector::from_iterator(self.n_groups(), self.group_sizes.iter().map(|&s| s as f64))
    }

    /// Copy a per-group value to every member observation.
    pub fn expand(&self, per_group: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(self.n_obs(), self.group_index.iter().map(|&g| per_group[g]))
    }

    /// Sum per-observation values over each group.
    pub fn contract(&self, per_obs: &DVector<f64>) -> DVector<f64> {
        let mut out = DVector::zeros(self.n_groups());
        for (i, &g) in self.group_index.iter().enumerate() {
            out[g] += per_obs[i];
        }
        out
    }

    /// First group with a single member, if any.
    pub fn singleton_group(&self) -> Option<&str> {
        self.group_sizes
            .iter()
            .position(|&s| s < 2)
            .map(|g| self.group_labels[g].as_str())
    }
}

/// Per-observation regression pairs `(x, y)`.
///
/// `x = σ² / I²` and `y = s²_group / I²`, where `s²_group` is the group's sum of
/// squared deviations `(I − g·Ih)²` divided by `multiplicity − 1`.
pub fn regression_x_y(table: &IntensityGroupTable) -> Result<(DVector<f64>, DVector<f64>), TargetError> {
    if let Some(group) = table.singleton_group() {
        return Err(TargetError::SingletonGroup {
            group: group.to_string(),
        });
    }

    let dof = table.group_multiplicities().add_scalar(-1.0);
    let scaled_ih = table.inverse_scales().component_mul(&table.ih_values());
    let dev = table.intensities() - scaled_ih;
    let group_variances = table.contract(&dev.component_mul(&dev)).component_div(&dof);
    let sigmasq_obs = table.expand(&group_variances);

    let isq = table.intensities().component_mul(table.intensities());
    let y = sigmasq_obs.component_div(&isq);
    let x = table.variances().component_div(&isq);
    Ok((x, y))
}
