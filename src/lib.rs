//! `scale-error-model` library crate.
//!
//! Target functions and refinement strategies for the error model of
//! symmetry-grouped intensity measurements. The binary (`sem`) is a thin
//! wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - targets can be driven by other optimizers
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod math;
pub mod models;
pub mod plot;
pub mod report;
pub mod targets;
