//! Error-model transform and the table of available models.
//!
//! The transform is a handful of pure functions so that the targets and the
//! binner can share them without owning any model state.

pub mod model;
pub mod registry;

pub use model::*;
pub use registry::*;
