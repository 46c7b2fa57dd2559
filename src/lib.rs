//! Gridbench - an evaluation and generation job scheduler for grid puzzles
//!
//! Gridbench keeps a SQLite queue of (generation, provider, model) evaluation
//! jobs and concept-driven generation jobs, and drains both against free-tier
//! LLM providers without exceeding their per-minute and per-day quotas.

pub mod config;
pub mod domain;
pub mod error;
pub mod id;
pub mod import;
pub mod llm;
pub mod prompt;
pub mod runner;
pub mod scheduler;
pub mod store;

pub use error::{GridbenchError, Result};
