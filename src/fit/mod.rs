//! Error-model refinement.
//!
//! Responsibilities:
//!
//! - drive a target to its minimum (`refiner`)
//! - combine targets into full `(a, b)` refinement strategies (`strategy`)

pub mod refiner;
pub mod strategy;

pub use refiner::*;
pub use strategy::*;
