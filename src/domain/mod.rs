//! Domain types for gridbench
//!
//! - Grid / Pair: puzzle example data and exact grid comparison
//! - Provider / ModelTarget: which model at which vendor
//! - JobOutcome: result of one job attempt

pub mod grid;
pub mod outcome;
pub mod provider;

pub use grid::{Grid, Pair, grid_from_value, grids_equal, validate_grid};
pub use outcome::JobOutcome;
pub use provider::{ModelTarget, Provider};
