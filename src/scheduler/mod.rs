//! Scheduler module - decides what runs, when, and against which model.
//!
//! This module provides:
//! - **Rate limiting**: per `provider:model` token buckets with backoff.
//! - **Planner**: turns eligible generations into queued evaluation jobs.
//! - **Workers**: drain evaluation and generation queues in batches.
//! - **Concepts**: brainstorms concepts for the generation queue.
//! - **Reaper**: reclaims jobs stranded in `running`.
//! - **Daemon**: runs every stage on an interval.
//!
//! # Architecture
//!
//! Everything is sequential within a batch:
//! 1. The planner writes `queued` jobs; it never calls a model
//! 2. A worker fetches candidates in priority order and checks each locally
//! 3. A bucket token is spent and the job claimed before the model call
//! 4. The outcome is written back as a single store transition
//!
//! # Example
//!
//! ```ignore
//! use gridbench::scheduler::{EvaluationWorker, RateLimiter};
//!
//! let limiter = Arc::new(RateLimiter::new());
//! let worker = EvaluationWorker::new(store, limiter, executor, credentials, &config, cancel);
//! let report = worker.drain(20).await?;
//! ```

mod concepts;
mod daemon;
mod generation;
mod planner;
mod priority;
mod rate_limit;
mod reaper;
mod status;
mod worker;

pub use concepts::{BrainstormReport, ConceptBrainstormer};
pub use daemon::{Daemon, TickReport, TickSettings};
pub use generation::{
    GENERATED_SOURCE, GENERATED_TAG, GenerationCounts, GenerationReport, GenerationWorker, MAX_TEST_CASES,
    mark_test_cases,
};
pub use planner::{ConceptEnqueueReport, FlatPlan, FlatReport, PlanReport, Planner, SmartPlan};
pub use priority::{UNTAGGED, primary_tag, sort_by_tag_rank, tag_rank};
pub use rate_limit::{
    BASE_BACKOFF_MS, BucketStatus, DAY_MS, MAX_BACKOFF_MS, MINUTE_MS, RateLimiter, RateLimits, backoff_delay,
};
pub use reaper::Reaper;
pub use status::{QueueStatus, collect_status};
pub use worker::{BatchCounts, DrainReport, EvaluationWorker};
