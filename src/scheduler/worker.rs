//! Evaluation worker - drains queued evaluation jobs in batches.
//!
//! Jobs run one at a time in `(priority, created_at)` order. Each candidate
//! passes a series of cheap local checks (attempt budget, configured limits,
//! bucket tokens, credential, test cases) before the job is claimed and a
//! token is spent. Only then is the model called. The store lock is never held
//! across a model call.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, WorkerConfig};
use crate::domain::JobOutcome;
use crate::error::Result;
use crate::llm::{CredentialResolver, ModelExecutor};
use crate::runner::ModelRunner;
use crate::scheduler::rate_limit::{BucketStatus, RateLimiter, RateLimits};
use crate::scheduler::reaper::Reaper;
use crate::store::{EvaluationJob, EvaluationStatus, ReclaimCounts, SharedStore, lock_store};

/// Counters for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchCounts {
    /// Jobs that reached the model call
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub rate_limited: usize,
    pub skipped: usize,
}

/// Result of a drain call.
#[derive(Debug, Clone, Serialize)]
pub struct DrainReport {
    #[serde(flatten)]
    pub counts: BatchCounts,
    pub remaining_queued: usize,
    pub rate_limits: BTreeMap<String, BucketStatus>,
    /// Present when a stale sweep ran first
    pub reclaimed: Option<ReclaimCounts>,
}

pub struct EvaluationWorker {
    store: SharedStore,
    limiter: Arc<RateLimiter>,
    runner: ModelRunner,
    credentials: Arc<dyn CredentialResolver>,
    rate_limits: BTreeMap<String, RateLimits>,
    config: WorkerConfig,
    cancel: CancellationToken,
}

impl EvaluationWorker {
    pub fn new(
        store: SharedStore,
        limiter: Arc<RateLimiter>,
        executor: Arc<dyn ModelExecutor>,
        credentials: Arc<dyn CredentialResolver>,
        config: &Config,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            limiter,
            runner: ModelRunner::new(executor, config.llm.clone()),
            credentials,
            rate_limits: config.rate_limits.clone(),
            config: config.worker.clone(),
            cancel,
        }
    }

    /// Reclaim stale jobs if configured, run one batch and report.
    pub async fn drain(&self, max_jobs: usize) -> Result<DrainReport> {
        let reclaimed = if self.config.auto_reclaim {
            Some(Reaper::new(self.store.clone(), self.config.stale_after()).sweep()?)
        } else {
            None
        };

        let counts = self.process_batch(max_jobs).await?;
        let remaining_queued = lock_store(&self.store)?.count_evaluation_jobs(EvaluationStatus::Queued)?;

        Ok(DrainReport {
            counts,
            remaining_queued,
            rate_limits: self.limiter.status(),
            reclaimed,
        })
    }

    /// Attempt up to `max_jobs` queued jobs.
    pub async fn process_batch(&self, max_jobs: usize) -> Result<BatchCounts> {
        let fetch = max_jobs.saturating_mul(self.config.overfetch_factor.max(1));
        let candidates = lock_store(&self.store)?.fetch_queued_evaluation_jobs(fetch)?;
        let mut counts = BatchCounts::default();

        tracing::debug!(candidates = candidates.len(), max_jobs, "Starting evaluation batch");

        for job in candidates {
            if counts.processed >= max_jobs {
                break;
            }
            if self.cancel.is_cancelled() {
                tracing::info!("Evaluation batch cancelled");
                break;
            }
            self.attempt(job, &mut counts).await?;
        }

        tracing::info!(
            processed = counts.processed,
            succeeded = counts.succeeded,
            failed = counts.failed,
            rate_limited = counts.rate_limited,
            skipped = counts.skipped,
            "Evaluation batch finished"
        );
        Ok(counts)
    }

    async fn attempt(&self, job: EvaluationJob, counts: &mut BatchCounts) -> Result<()> {
        if job.attempts_exhausted() {
            return Ok(());
        }

        let target = job.target();
        let key = target.key();

        let Some(limits) = self.rate_limits.get(&key).copied() else {
            return self.skip(&job, &format!("No rate limits configured for {}", key), counts);
        };
        if !self.limiter.can_make_request(&key, limits) {
            tracing::debug!(job_id = %job.id, key = %key, "Rate limited before call");
            counts.rate_limited += 1;
            return Ok(());
        }
        let Some(credential) = self.credentials.resolve(target.provider) else {
            return self.skip(&job, &format!("No API key configured for {}", target.provider), counts);
        };

        let pairs = lock_store(&self.store)?.generation_pairs(&job.generation_id)?;
        if !pairs.iter().any(|p| p.pair.is_test_case) {
            return self.skip(&job, "No test cases found for this generation", counts);
        }

        let claimed = lock_store(&self.store)?.claim_and_start_run(&job, &self.runner.metadata())?;
        let Some(run_id) = claimed else {
            tracing::debug!(job_id = %job.id, "Job claimed elsewhere");
            return Ok(());
        };
        self.limiter.consume_request(&key, limits);
        let attempt = job.attempts + 1;
        counts.processed += 1;

        tracing::info!(job_id = %job.id, target = %target, attempt, "Running evaluation");
        let started = Instant::now();
        let outcome = match self.runner.run(&target, credential, &pairs, &self.cancel).await {
            Ok(result) => JobOutcome::Completed(result),
            Err(e) => e.into_outcome(),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        self.record(&job, attempt, &run_id, outcome, elapsed_ms, counts)
    }

    /// Apply one outcome as a single store transition.
    ///
    /// A job reclaimed while its call was in flight is no longer `running`;
    /// its outcome is dropped and not counted.
    fn record(
        &self,
        job: &EvaluationJob,
        attempt: u32,
        run_id: &str,
        outcome: JobOutcome,
        elapsed_ms: u64,
        counts: &mut BatchCounts,
    ) -> Result<()> {
        let key = job.target().key();
        let retry_or_fail = if attempt >= job.max_attempts {
            EvaluationStatus::Failed
        } else {
            EvaluationStatus::Queued
        };
        let mut store = lock_store(&self.store)?;

        match outcome {
            JobOutcome::Completed(result) => {
                if !store.complete_evaluation(&job.id, run_id, &result)? {
                    Self::dropped(job);
                    return Ok(());
                }
                counts.succeeded += 1;
                tracing::info!(
                    job_id = %job.id,
                    key = %key,
                    correct = result.correct_count,
                    total = result.total_count,
                    "Evaluation completed"
                );
            }
            JobOutcome::RateLimited(message) => {
                self.limiter.apply_backoff(&key, attempt);
                if !store.fail_evaluation(&job.id, Some(run_id), &message, elapsed_ms, retry_or_fail)? {
                    Self::dropped(job);
                    return Ok(());
                }
                counts.rate_limited += 1;
                tracing::warn!(job_id = %job.id, key = %key, attempt, next = %retry_or_fail, "Provider rate limited");
            }
            JobOutcome::PermanentSkip(message) => {
                if !store.fail_evaluation(&job.id, Some(run_id), &message, elapsed_ms, EvaluationStatus::Skipped)? {
                    Self::dropped(job);
                    return Ok(());
                }
                counts.skipped += 1;
                tracing::warn!(job_id = %job.id, key = %key, error = %message, "Evaluation skipped");
            }
            JobOutcome::TransientFailure(message) => {
                if !store.fail_evaluation(&job.id, Some(run_id), &message, elapsed_ms, retry_or_fail)? {
                    Self::dropped(job);
                    return Ok(());
                }
                counts.failed += 1;
                tracing::warn!(
                    job_id = %job.id,
                    key = %key,
                    attempt,
                    next = %retry_or_fail,
                    error = %message,
                    "Evaluation failed"
                );
            }
        }
        Ok(())
    }

    fn dropped(job: &EvaluationJob) {
        tracing::warn!(job_id = %job.id, "Job left running during the call, outcome dropped");
    }

    fn skip(&self, job: &EvaluationJob, reason: &str, counts: &mut BatchCounts) -> Result<()> {
        if lock_store(&self.store)?.skip_evaluation_job(&job.id, reason)? {
            counts.skipped += 1;
            tracing::info!(job_id = %job.id, reason, "Skipped evaluation job");
        }
        Ok(())
    }
}
