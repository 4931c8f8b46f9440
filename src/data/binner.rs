//! Intensity bins of normalized deviations.
//!
//! Observations are ranked by their group mean intensity and cut into
//! equal-count bins. For a given parameter state the binner holds, per
//! observation, the corrected sigma and the normalized deviation, and per bin
//! the population variance of those deviations together with a weight.

use nalgebra::DVector;

use crate::data::group_table::IntensityGroupTable;
use crate::domain::{BinSummary, ErrorModelParams};
use crate::error::TargetError;
use crate::models::corrected_sigma;

#[derive(Debug, Clone)]
pub struct VarianceBinner<'a> {
    table: &'a IntensityGroupTable,
    bin_index: Vec<usize>,
    refl_per_bin: DVector<f64>,
    bin_bounds: Vec<(f64, f64)>,
    /// `sqrt(n/(n−1))` per observation.
    prefactor: DVector<f64>,

    params: ErrorModelParams,
    sigmaprime: DVector<f64>,
    deltas: DVector<f64>,
    bin_variances: DVector<f64>,
    weights: DVector<f64>,
}

impl<'a> VarianceBinner<'a> {
    /// Bin `table` into at most `n_bins` bins of at least `min_per_bin` observations.
    ///
    /// Statistics are initialised with [`ErrorModelParams::identity`].
    pub fn new(table: &'a IntensityGroupTable, n_bins: usize, min_per_bin: usize) -> Result<Self, TargetError> {
        if let Some(group) = table.singleton_group() {
            return Err(TargetError::SingletonGroup {
                group: group.to_string(),
            });
        }
        let n = table.n_obs();
        let min_per_bin = min_per_bin.max(2);
        let n_bins = n_bins.min(n / min_per_bin);
        if n_bins == 0 {
            return Err(TargetError::TooFewForBins {
                available: n,
                min_per_bin,
            });
        }

        let ih = table.ih_values();
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&i, &j| {
            ih[i]
                .partial_cmp(&ih[j])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(i.cmp(&j))
        });

        let per_bin = n / n_bins;
        let mut bin_index = vec![0usize; n];
        let mut counts = vec![0usize; n_bins];
        let mut bin_bounds = vec![(f64::INFINITY, f64::NEG_INFINITY); n_bins];
        for (rank, &i) in order.iter().enumerate() {
            let bin = (rank / per_bin).min(n_bins - 1);
            bin_index[i] = bin;
            counts[bin] += 1;
            let bounds = &mut bin_bounds[bin];
            bounds.0 = bounds.0.min(ih[i]);
            bounds.1 = bounds.1.max(ih[i]);
        }

        let multiplicity = table.expand(&table.group_multiplicities());
        let prefactor = multiplicity.map(|m| (m / (m - 1.0)).sqrt());
        let refl_per_bin = DVector::from_iterator(n_bins, counts.iter().map(|&c| c as f64));

        let mut binner = Self {
            table,
            bin_index,
            weights: refl_per_bin.clone(),
            refl_per_bin,
            bin_bounds,
            prefactor,
            params: ErrorModelParams::identity(),
            sigmaprime: DVector::zeros(n),
            deltas: DVector::zeros(n),
            bin_variances: DVector::zeros(n_bins),
        };
        binner.update(&ErrorModelParams::identity());
        Ok(binner)
    }

    /// Recompute corrected sigmas, deviations and bin variances for `params`.
    pub fn update(&mut self, params: &ErrorModelParams) {
        let table = self.table;
        let n = table.n_obs();
        let ih = table.ih_values();

        self.sigmaprime = DVector::from_iterator(
            n,
            (0..n).map(|i| {
                corrected_sigma(
                    params,
                    table.variances()[i],
                    table.intensities()[i],
                    table.inverse_scales()[i],
                )
            }),
        );
        self.deltas = DVector::from_iterator(
            n,
            (0..n).map(|i| {
                let scaled = table.intensities()[i] / table.inverse_scales()[i];
                self.prefactor[i] * (scaled - ih[i]) / self.sigmaprime[i]
            }),
        );

        let sum = self.sum_to_bins(&self.deltas);
        let sum_sq = self.sum_to_bins(&self.deltas.component_mul(&self.deltas));
        self.bin_variances = DVector::from_iterator(
            self.n_bins(),
            (0..self.n_bins()).map(|k| {
                let count = self.refl_per_bin[k];
                let mean = sum[k] / count;
                sum_sq[k] / count - mean * mean
            }),
        );
        self.params = *params;
    }

    /// Summation operator: per-observation values summed into their bins.
    pub fn sum_to_bins(&self, per_obs: &DVector<f64>) -> DVector<f64> {
        let mut out = DVector::zeros(self.n_bins());
        for (i, &bin) in self.bin_index.iter().enumerate() {
            out[bin] += per_obs[i];
        }
        out
    }

    pub fn table(&self) -> &'a IntensityGroupTable {
        self.table
    }

    pub fn n_bins(&self) -> usize {
        self.refl_per_bin.len()
    }

    pub fn bin_index(&self) -> &[usize] {
        &self.bin_index
    }

    /// Parameters of the last [`update`](Self::update).
    pub fn params(&self) -> &ErrorModelParams {
        &self.params
    }

    pub fn sigmaprime(&self) -> &DVector<f64> {
        &self.sigmaprime
    }

    pub fn deltas(&self) -> &DVector<f64> {
        &self.deltas
    }

    pub fn bin_variances(&self) -> &DVector<f64> {
        &self.bin_variances
    }

    pub fn weights(&self) -> &DVector<f64> {
        &self.weights
    }

    pub fn refl_per_bin(&self) -> &DVector<f64> {
        &self.refl_per_bin
    }

    /// Per-bin diagnostics at the current parameters.
    pub fn summary(&self) -> Vec<BinSummary> {
        (0..self.n_bins())
            .map(|k| BinSummary {
                ih_min: self.bin_bounds[k].0,
                ih_max: self.bin_bounds[k].1,
                n_obs: self.refl_per_bin[k] as usize,
                variance: self.bin_variances[k],
                weight: self.weights[k],
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Observation;
    use approx::assert_relative_eq;

    fn table(groups: &[(&str, &[f64])]) -> IntensityGroupTable {
        let obs: Vec<Observation> = groups
            .iter()
            .flat_map(|(label, values)| {
                values.iter().map(move |&intensity| Observation {
                    group: label.to_string(),
                    intensity,
                    variance: 1.0,
                    inverse_scale: 1.0,
                })
            })
            .collect();
        IntensityGroupTable::from_observations(&obs).unwrap()
    }

    #[test]
    fn bins_follow_intensity_order() {
        let t = table(&[
            ("hi", &[99.0, 101.0]),
            ("lo", &[9.0, 11.0]),
            ("mid", &[49.0, 51.0]),
            ("top", &[199.0, 201.0]),
        ]);
        let binner = VarianceBinner::new(&t, 2, 2).unwrap();
        assert_eq!(binner.n_bins(), 2);
        for (i, &bin) in binner.bin_index().iter().enumerate() {
            let ih = t.ih_values()[i];
            assert_eq!(bin, usize::from(ih > 75.0), "observation {i} with Ih {ih}");
        }
        let summary = binner.summary();
        assert_relative_eq!(summary[0].ih_min, 10.0);
        assert_relative_eq!(summary[1].ih_max, 200.0);
        assert_eq!(binner.refl_per_bin().as_slice(), &[4.0, 4.0]);
    }

    #[test]
    fn bin_count_shrinks_to_honour_minimum() {
        let t = table(&[("a", &[1.0, 2.0, 3.0]), ("b", &[4.0, 5.0, 6.0])]);
        let binner = VarianceBinner::new(&t, 10, 3).unwrap();
        assert_eq!(binner.n_bins(), 2);
        assert!(matches!(
            VarianceBinner::new(&t, 10, 7),
            Err(TargetError::TooFewForBins { available: 6, min_per_bin: 7 })
        ));
    }

    #[test]
    fn deviations_use_multiplicity_prefactor() {
        let t = table(&[("a", &[9.0, 11.0]), ("b", &[20.0, 22.0])]);
        let binner = VarianceBinner::new(&t, 1, 2).unwrap();
        // Unit sigmas: δ = sqrt(2) · (I − Ih).
        let s2 = 2f64.sqrt();
        assert_relative_eq!(binner.deltas()[0], -s2, max_relative = 1e-12);
        assert_relative_eq!(binner.deltas()[3], s2, max_relative = 1e-12);
        // All |δ| equal and mean zero, so the variance is 2.
        assert_relative_eq!(binner.bin_variances()[0], 2.0, max_relative = 1e-12);
    }

    #[test]
    fn update_scales_variances_by_a_squared() {
        let t = table(&[("a", &[9.0, 11.0, 13.0]), ("b", &[20.0, 22.0, 21.0])]);
        let mut binner = VarianceBinner::new(&t, 1, 2).unwrap();
        let base = binner.bin_variances()[0];
        binner.update(&ErrorModelParams::new(2.0, 0.0));
        assert_relative_eq!(binner.bin_variances()[0], base / 4.0, max_relative = 1e-12);
        assert_eq!(binner.params(), &ErrorModelParams::new(2.0, 0.0));
    }

    #[test]
    fn singleton_groups_cannot_be_binned() {
        let t = table(&[("a", &[9.0, 11.0]), ("b", &[20.0])]);
        assert!(matches!(
            VarianceBinner::new(&t, 1, 2),
            Err(TargetError::SingletonGroup { .. })
        ));
    }
}
