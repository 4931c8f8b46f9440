use approx::assert_relative_eq;

use scale_error_model::data::{IntensityGroupTable, SampleConfig, VarianceBinner, generate_sample, regression_x_y};
use scale_error_model::domain::{ErrorModelParams, FitConfig, Observation, ParamName, ParameterState, RefineStrategy, RefinerOptions};
use scale_error_model::fit::{refine, refine_error_model};
use scale_error_model::math::normal_probability_plot;
use scale_error_model::targets::{ErrorModelTarget, ParamATarget, ParamBTarget, RegressionMode, RegressionTarget};

const TRUE_A: f64 = 1.2;
const TRUE_B: f64 = 0.02;

/// Four groups of three, unit reported variances, with scatter chosen so that
/// `y = a²·x + a²·b²` holds exactly for every observation.
fn exactly_explained_table() -> IntensityGroupTable {
    let mut obs = Vec::new();
    for (k, m) in [20.0_f64, 50.0, 100.0, 400.0].into_iter().enumerate() {
        let r = TRUE_A * TRUE_A * (1.0 + TRUE_B * TRUE_B * m * m) / (m * m);
        let t = (3.0 * r / (3.0 - 2.0 * r)).sqrt();
        for g in [1.0 - t, 1.0, 1.0 + t] {
            obs.push(Observation {
                group: format!("group-{k}"),
                intensity: m,
                variance: 1.0,
                inverse_scale: g,
            });
        }
    }
    IntensityGroupTable::from_observations(&obs).unwrap()
}

/// Four groups of three, unit reported variances. At `(a, b) = (1.2, 0.02)` the
/// twelve normalized deviations are exactly the normal order statistics inside
/// `|x| <= 1.5`, and the two outer ones are placed so that the pooled variance
/// is 1. The outer pair is bright and carries the `b` signal; the rest are weak.
fn normal_order_statistics_table() -> IntensityGroupTable {
    let rows: [(&str, f64, f64); 12] = [
        ("g1", 104.30278298806174, 1.0),
        ("g1", 99.64948088118818, 1.0379684692953686),
        ("g1", 2.102610037516292, 0.02),
        ("g2", 6.033538602048299, 0.9796509009060479),
        ("g2", 4.201387807067038, 1.0),
        ("g2", 4.686430104015086, 1.0),
        ("g3", 3.802156270204023, 0.9865035915655633),
        ("g3", 5.801146074212911, 1.0),
        ("g3", 5.313959790396074, 1.0),
        ("g4", 5.540729660398544, 1.0),
        ("g4", 3.5234205637771945, 0.8124386404027024),
        ("g4", 4.896990049296347, 1.0),
    ];
    let obs: Vec<Observation> = rows
        .iter()
        .map(|&(group, intensity, inverse_scale)| Observation {
            group: group.to_string(),
            intensity,
            variance: 1.0,
            inverse_scale,
        })
        .collect();
    IntensityGroupTable::from_observations(&obs).unwrap()
}

#[test]
fn order_statistics_table_is_exact_at_the_generating_parameters() {
    let table = normal_order_statistics_table();
    let mut binner = VarianceBinner::new(&table, 1, 10).unwrap();
    binner.update(&ErrorModelParams::new(TRUE_A, TRUE_B));

    let plot = normal_probability_plot(binner.deltas(), 1.5).unwrap();
    assert_eq!(plot.len(), 10);
    for (&x, &y) in plot.x.iter().zip(plot.y.iter()) {
        assert_relative_eq!(x, y, epsilon = 1e-12);
    }
    assert_relative_eq!(binner.bin_variances()[0], 1.0, max_relative = 1e-12);
}

#[test]
fn parameter_a_then_b_cycles_converge_within_one_percent() {
    let table = normal_order_statistics_table();
    let config = FitConfig {
        strategy: RefineStrategy::Basic,
        // b = 0 is a stationary point of the b target, so start just off it.
        initial: ErrorModelParams::new(1.0, 0.01),
        n_bins: 1,
        min_per_bin: 10,
        max_cycles: 10,
        cycle_tolerance: 1e-9,
        ..FitConfig::default()
    };
    let fit = refine_error_model(&table, &config).unwrap();

    assert!(fit.cycles.len() <= 10);
    assert!(fit.cycles.iter().all(|c| c.functionals.len() == 2));
    assert_eq!(fit.n_obs, 12);
    assert_relative_eq!(fit.params.a, TRUE_A, max_relative = 0.01);
    assert_relative_eq!(fit.params.b, TRUE_B, max_relative = 0.01);
}

#[test]
fn parameter_a_and_b_targets_alternate_by_hand() {
    let table = normal_order_statistics_table();
    let mut binner = VarianceBinner::new(&table, 1, 10).unwrap();
    let (mut a, mut b) = (1.0, 0.01);

    for _ in 0..10 {
        binner.update(&ErrorModelParams::new(1.0, b));
        let plot = normal_probability_plot(binner.deltas(), 1.5).unwrap();
        let mut a_target = ParamATarget::from_plot(plot).unwrap();
        let start = ParameterState::from_slice(&ParamATarget::ACTIVE, &[0.0, a]).unwrap();
        a = refine(&mut a_target, start, &RefinerOptions::default()).unwrap().values()[1].abs();

        let mut b_target = ParamBTarget::new(binner, a);
        let start = ParameterState::from_slice(&ParamBTarget::ACTIVE, &[b]).unwrap();
        b = refine(&mut b_target, start, &RefinerOptions::default()).unwrap().values()[0].abs();
        binner = b_target.into_binner();
    }

    assert_relative_eq!(a, TRUE_A, max_relative = 0.01);
    assert_relative_eq!(b, TRUE_B, max_relative = 0.01);
}

#[test]
fn alternating_regression_converges_within_one_percent() {
    let table = exactly_explained_table();
    let config = FitConfig {
        strategy: RefineStrategy::Alternating,
        initial: ErrorModelParams::identity(),
        max_cycles: 10,
        cycle_tolerance: 1e-12,
        ..FitConfig::default()
    };
    let fit = refine_error_model(&table, &config).unwrap();

    assert_eq!(fit.cycles.len(), 10);
    assert_eq!(fit.n_obs, 12);
    assert_eq!(fit.n_groups, 4);
    assert_relative_eq!(fit.params.a, TRUE_A, max_relative = 0.01);
    assert_relative_eq!(fit.params.b, TRUE_B, max_relative = 0.01);
}

#[test]
fn joint_regression_recovers_generating_parameters() {
    let table = exactly_explained_table();
    let mut target = RegressionTarget::new(&table, RegressionMode::FitJoint).unwrap();
    let start = ParameterState::from_slice(&[ParamName::A, ParamName::B], &[1.0, 0.0]).unwrap();
    let result = refine(&mut target, start, &RefinerOptions::default()).unwrap();

    assert!(result.converged);
    let (slope, intercept) = (result.values()[0], result.values()[1]);
    assert_relative_eq!(slope.sqrt(), TRUE_A, max_relative = 1e-6);
    assert_relative_eq!((intercept / slope).sqrt(), TRUE_B, max_relative = 1e-4);
    assert_relative_eq!(target.rmsds(&result.state).unwrap()[0], 0.0, epsilon = 1e-9);
}

#[test]
fn group_relative_rescaling_leaves_regression_ratio_unchanged() {
    let sample = generate_sample(&SampleConfig {
        n_groups: 60,
        multiplicity: 3,
        intensity_min: 100.0,
        ..SampleConfig::default()
    })
    .unwrap();

    let fit_ratio = |observations: &[Observation]| {
        let table = IntensityGroupTable::from_observations(observations).unwrap();
        let (x, y) = regression_x_y(&table).unwrap();
        let mut target = RegressionTarget::from_xy(x, y, RegressionMode::FitJoint).unwrap();
        let start = ParameterState::from_slice(&[ParamName::A, ParamName::B], &[1.0, 0.0]).unwrap();
        let result = refine(&mut target, start, &RefinerOptions::default()).unwrap();
        result.values()[1] / result.values()[0]
    };

    // Every group gets its own factor; intensities scale by c, variances by c².
    let rescaled: Vec<Observation> = sample
        .observations
        .iter()
        .map(|o| {
            let id: f64 = o.group.trim_start_matches('h').parse().unwrap();
            let c = 0.5 + (id % 7.0);
            Observation {
                intensity: o.intensity * c,
                variance: o.variance * c * c,
                ..o.clone()
            }
        })
        .collect();

    assert_relative_eq!(fit_ratio(&sample.observations), fit_ratio(&rescaled), max_relative = 1e-6);
}

#[test]
fn basic_strategy_recovers_simulated_error_model() {
    let truth = ErrorModelParams::new(1.2, 0.03);
    let sample = generate_sample(&SampleConfig {
        n_groups: 2000,
        multiplicity: 4,
        truth,
        seed: 7,
        ..SampleConfig::default()
    })
    .unwrap();
    let table = IntensityGroupTable::from_observations(&sample.observations).unwrap();

    let fit = refine_error_model(&table, &FitConfig::default()).unwrap();

    assert!((fit.params.a - truth.a).abs() < 0.15, "a = {}", fit.params.a);
    assert!((fit.params.b - truth.b).abs() < 0.01, "b = {}", fit.params.b);
    assert_eq!(fit.bins.len(), 10);
    // At the refined parameters the bins scatter around unit variance.
    let mean_variance = fit.bins.iter().map(|b| b.variance).sum::<f64>() / fit.bins.len() as f64;
    assert!((mean_variance - 1.0).abs() < 0.25, "mean bin variance {mean_variance}");
}

#[test]
fn refiner_sees_progressed_bins_each_evaluation() {
    let sample = generate_sample(&SampleConfig {
        n_groups: 300,
        ..SampleConfig::default()
    })
    .unwrap();
    let table = IntensityGroupTable::from_observations(&sample.observations).unwrap();
    let binner = VarianceBinner::new(&table, 5, 10).unwrap();
    let mut target = ParamBTarget::new(binner, 1.2);

    let start = ParameterState::from_slice(&ParamBTarget::ACTIVE, &[0.01]).unwrap();
    let result = refine(&mut target, start, &RefinerOptions::default()).unwrap();

    // The binner ends at the returned state, so residuals can be read directly.
    let functional = target.residuals(&result.state).unwrap().sum();
    assert_relative_eq!(functional, result.functional, max_relative = 1e-12);
    assert_eq!(target.binner().params().b, result.values()[0]);
    assert!(result.history.windows(2).all(|w| w[1].functional <= w[0].functional));
    assert!(result.history.iter().all(|h| h.rmsd >= 0.0));
}
