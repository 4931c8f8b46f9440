//! Mathematical utilities: small linear solves and normal quantiles.

pub mod ols;
pub mod quantiles;

pub use ols::*;
pub use quantiles::*;
