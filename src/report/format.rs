//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the refinement code stays clean and testable
//! - output changes are localized (important for snapshot tests)

use crate::app::pipeline::BatchRow;
use crate::data::{SampleConfig, SampleStats};
use crate::domain::{BinSummary, ErrorModelFit, ErrorModelParams, FitConfig};
use crate::models::ModelEntry;
use crate::report::summarize_batch;

/// Format the full run summary (experiment + refinement cycles + final parameters).
pub fn format_run_summary(
    stats: &SampleStats,
    sample: &SampleConfig,
    fit: &ErrorModelFit,
    config: &FitConfig,
) -> String {
    let mut out = String::new();

    out.push_str("=== sem - error model refinement ===\n");
    out.push_str(&format!("Strategy: {}\n", config.strategy.display_name()));
    out.push_str(&format!(
        "Experiment: groups={} | multiplicity={} | seed={} | truth a={:.4} b={:.4}\n",
        sample.n_groups, sample.multiplicity, sample.seed, sample.truth.a, sample.truth.b
    ));
    out.push_str(&format!(
        "Observations: n={} | I=[{:.2}, {:.2}]\n",
        stats.n_obs, stats.intensity_min, stats.intensity_max
    ));
    out.push_str(&format!(
        "Refined on: n={} in {} groups\n",
        fit.n_obs, fit.n_groups
    ));

    out.push_str("\nCycles:\n");
    for c in &fit.cycles {
        out.push_str(&format!(
            "  {:>3}  a={:.6}  b={:.6}  f={}\n",
            c.cycle,
            c.a,
            c.b,
            fmt_vec(&c.functionals)
        ));
    }

    let status = if fit.converged { "converged" } else { "not converged" };
    out.push_str(&format!(
        "\nResult ({status}): a = {:.6}, b = {:.6}\n",
        fit.params.a, fit.params.b
    ));
    out
}

/// Format per-bin diagnostics at the refined parameters.
pub fn format_bin_table(bins: &[BinSummary]) -> String {
    if bins.is_empty() {
        return "Bins: (not enough observations to bin)\n".to_string();
    }
    let mut out = String::new();
    out.push_str(&format!("{:>12} {:>12} {:>8} {:>10}\n", "Ih min", "Ih max", "n", "variance"));
    out.push_str(&format!("{:-<12} {:-<12} {:-<8} {:-<10}\n", "", "", "", ""));
    for b in bins {
        out.push_str(&format!(
            "{:>12.2} {:>12.2} {:>8} {:>10.4}\n",
            b.ih_min, b.ih_max, b.n_obs, b.variance
        ));
    }
    out
}

/// Format the per-experiment batch table and the parameter spread.
pub fn format_batch(rows: &[BatchRow], truth: &ErrorModelParams) -> String {
    let mut out = String::new();
    out.push_str(&format!("{:>5} {:>10} {:>10} {:>10} {:>7} {:<9}\n", "exp", "seed", "a", "b", "cycles", "converged"));
    out.push_str(&format!("{:-<5} {:-<10} {:-<10} {:-<10} {:-<7} {:-<9}\n", "", "", "", "", "", ""));
    for r in rows {
        out.push_str(
            format!(
                "{:>5} {:>10} {:>10.6} {:>10.6} {:>7} {:<9}\n",
                r.experiment, r.seed, r.params.a, r.params.b, r.cycles, r.converged
            )
            .trim_end(),
        );
        out.push('\n');
    }

    if let Some(s) = summarize_batch(rows) {
        out.push_str(&format!(
            "\nmean a = {:.6} ± {:.6} (truth {:.4})\nmean b = {:.6} ± {:.6} (truth {:.4})\nconverged: {}/{}\n",
            s.mean_a, s.sd_a, truth.a, s.mean_b, s.sd_b, truth.b, s.n_converged, s.n
        ));
    }
    out
}

/// Format the model registry.
pub fn format_models(models: &[ModelEntry]) -> String {
    let mut out = String::new();
    for m in models {
        out.push_str(&format!("{:<12} {}\n", m.name, m.description));
    }
    out
}

fn fmt_vec(v: &[f64]) -> String {
    let parts: Vec<String> = v.iter().map(|x| format!("{x:.4e}")).collect();
    format!("[{}]", parts.join(", "))
}
