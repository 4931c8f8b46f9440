//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - observations and the parameter state handed to targets (`Observation`, `ParameterState`)
//! - model parameters and configuration (`ErrorModelParams`, `FitConfig`, `RefineStrategy`)
//! - refinement outputs (`ErrorModelFit`, `CycleRecord`, `BinSummary`)

pub mod types;

pub use types::*;
