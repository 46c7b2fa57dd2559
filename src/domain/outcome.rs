//! Job execution outcome types.
//!
//! Every attempt at a job ends in exactly one of these. The worker maps each
//! variant to a single store transition.

use crate::runner::RunResult;

/// Outcome of one attempt at an evaluation job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// The model answered and was scored
    Completed(RunResult),
    /// The provider signalled rate limiting; back off and retry later
    RateLimited(String),
    /// The job can never succeed as configured
    PermanentSkip(String),
    /// Anything else; retried while attempts remain
    TransientFailure(String),
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Completed(_) => "completed",
            JobOutcome::RateLimited(_) => "rate_limited",
            JobOutcome::PermanentSkip(_) => "skipped",
            JobOutcome::TransientFailure(_) => "failed",
        }
    }

    /// Error text carried by the non-success variants.
    pub fn error(&self) -> Option<&str> {
        match self {
            JobOutcome::Completed(_) => None,
            JobOutcome::RateLimited(e) | JobOutcome::PermanentSkip(e) | JobOutcome::TransientFailure(e) => Some(e),
        }
    }
}
