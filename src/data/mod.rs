//! Observation data: grouping, binning and synthetic experiments.

pub mod binner;
pub mod group_table;
pub mod sample;

pub use binner::VarianceBinner;
pub use group_table::{IntensityGroupTable, regression_x_y};
pub use sample::{SampleConfig, SampleData, SampleStats, generate_sample};
