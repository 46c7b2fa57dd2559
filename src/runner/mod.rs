//! Model runner module - executes and scores evaluation runs.
//!
//! - ModelRunner: prompt, call, parse and score one run
//! - RunError: why a run failed, and the job outcome it maps to
//! - estimate_cost: USD estimate from provider pricing

mod model_runner;
pub mod pricing;

pub use crate::store::RunResult;
pub use model_runner::{ModelRunner, RUN_SOURCE, RunError};
pub use pricing::estimate_cost;
