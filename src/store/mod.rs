//! Storage layer for gridbench.
//!
//! A single SQLite database holds puzzles, the generation and evaluation
//! queues, and model runs. Workers share one [`JobStore`] behind a mutex.
//!
//! # Example
//!
//! ```ignore
//! use gridbench::store::{JobStore, EvaluationStatus};
//!
//! let mut store = JobStore::open(Path::new("/tmp/gridbench.db"))?;
//! let queued = store.count_evaluation_jobs(EvaluationStatus::Queued)?;
//! ```

mod job_store;
mod records;

use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{GridbenchError, Result};

pub use job_store::{JobStore, STRANDED_MESSAGE};
pub use records::{
    BreakdownRow, CompletedRun, EligibleGeneration, EvaluationJob, EvaluationStatus, GenerationJob, GenerationStatus,
    JobKey, ModelRun, NewEvaluationJob, NewPuzzle, PRIORITY_CHEAP, PRIORITY_ESCALATION, PredictionRecord, Puzzle,
    PuzzleInsert, ReclaimCounts, RunMetadata, RunResult, RunStatus, StoredPair,
};

/// Store handle shared between the planner and workers.
pub type SharedStore = Arc<Mutex<JobStore>>;

pub fn shared(store: JobStore) -> SharedStore {
    Arc::new(Mutex::new(store))
}

/// Lock the shared store. Never hold the guard across an `.await`.
pub fn lock_store(store: &SharedStore) -> Result<MutexGuard<'_, JobStore>> {
    store
        .lock()
        .map_err(|e| GridbenchError::Storage(format!("store lock poisoned: {}", e)))
}
