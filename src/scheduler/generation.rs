//! Generation worker - turns pending concepts into stored puzzles.
//!
//! Models are picked round-robin from the configured list. A model is
//! passed over when it has no credential, no configured limits or no
//! bucket tokens; when every model is passed over the job stays pending.
//! Generated pairs are content-addressed, so a puzzle the store already
//! holds completes the job without writing a copy.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, LlmConfig};
use crate::domain::{ModelTarget, Pair};
use crate::error::{GridbenchError, Result};
use crate::id::puzzle_id_for;
use crate::llm::{
    CredentialResolver, ExecutionRequest, GeneratedPuzzle, LlmError, ModelExecutor, complete, parse_generated_puzzle,
};
use crate::prompt::{GENERATION_SYSTEM_PROMPT, generation_prompt};
use crate::scheduler::rate_limit::{BucketStatus, RateLimiter, RateLimits};
use crate::store::{GenerationJob, GenerationStatus, NewPuzzle, PuzzleInsert, SharedStore, lock_store};

/// Source recorded on generated puzzles.
pub const GENERATED_SOURCE: &str = "generated";
/// Tag applied to generated puzzles.
pub const GENERATED_TAG: &str = "agent";
/// Most pairs held out as test cases.
pub const MAX_TEST_CASES: usize = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GenerationCounts {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub rate_limited: usize,
    /// Succeeded jobs whose puzzle already existed
    pub duplicates: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationReport {
    #[serde(flatten)]
    pub counts: GenerationCounts,
    pub remaining_pending: usize,
    pub rate_limits: BTreeMap<String, BucketStatus>,
}

/// Mark the trailing `min(2, floor(n * 0.4))` pairs as test cases.
pub fn mark_test_cases(pairs: &mut [Pair]) {
    let n = pairs.len();
    let held_out = (n * 2 / 5).min(MAX_TEST_CASES);
    for pair in &mut pairs[n - held_out..] {
        pair.is_test_case = true;
    }
}

pub struct GenerationWorker {
    store: SharedStore,
    limiter: Arc<RateLimiter>,
    executor: Arc<dyn ModelExecutor>,
    credentials: Arc<dyn CredentialResolver>,
    models: Vec<ModelTarget>,
    rate_limits: BTreeMap<String, RateLimits>,
    llm: LlmConfig,
    overfetch_factor: usize,
    cancel: CancellationToken,
}

impl GenerationWorker {
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
            executor,
            credentials,
            models: config.generation.models.clone(),
            rate_limits: config.rate_limits.clone(),
            llm: config.llm.clone(),
            overfetch_factor: config.worker.overfetch_factor,
            cancel,
        }
    }

    /// Run one batch and report with queue depth and bucket state.
    pub async fn drain(&self, batch_size: usize) -> Result<GenerationReport> {
        let counts = self.process_batch(batch_size).await?;
        let remaining_pending = lock_store(&self.store)?.count_generation_jobs(GenerationStatus::Pending)?;
        Ok(GenerationReport {
            counts,
            remaining_pending,
            rate_limits: self.limiter.status(),
        })
    }

    /// Attempt up to `batch_size` pending jobs.
    pub async fn process_batch(&self, batch_size: usize) -> Result<GenerationCounts> {
        let models: Vec<&ModelTarget> = self
            .models
            .iter()
            .filter(|m| self.credentials.has_credential(m.provider))
            .collect();
        if models.is_empty() {
            return Err(GridbenchError::NoModelsAvailable(
                "no generation model has a configured credential".to_string(),
            ));
        }

        let fetch = batch_size.saturating_mul(self.overfetch_factor.max(1));
        let jobs = lock_store(&self.store)?.fetch_pending_generation_jobs(fetch)?;
        let mut counts = GenerationCounts::default();
        let mut cursor = 0;

        for job in jobs {
            if counts.processed >= batch_size {
                break;
            }
            if self.cancel.is_cancelled() {
                tracing::info!("Generation batch cancelled");
                break;
            }
            let Some((target, limits, credential)) = self.pick_model(&models, &mut cursor) else {
                tracing::debug!(job_id = %job.id, "Every generation model is rate limited");
                counts.rate_limited += 1;
                continue;
            };
            self.generate(&job, target, limits, credential, &mut counts).await?;
        }

        tracing::info!(
            processed = counts.processed,
            succeeded = counts.succeeded,
            failed = counts.failed,
            rate_limited = counts.rate_limited,
            duplicates = counts.duplicates,
            "Generation batch finished"
        );
        Ok(counts)
    }

    /// Next usable model after `cursor`. No token is spent here.
    ///
    /// The cursor advances past every model looked at, so consecutive jobs
    /// spread across providers.
    fn pick_model<'a>(
        &self,
        models: &[&'a ModelTarget],
        cursor: &mut usize,
    ) -> Option<(&'a ModelTarget, RateLimits, String)> {
        for _ in 0..models.len() {
            let target = models[*cursor % models.len()];
            *cursor += 1;

            let key = target.key();
            let Some(limits) = self.rate_limits.get(&key).copied() else {
                continue;
            };
            if !self.limiter.can_make_request(&key, limits) {
                continue;
            }
            let Some(credential) = self.credentials.resolve(target.provider) else {
                continue;
            };
            return Some((target, limits, credential));
        }
        None
    }

    async fn generate(
        &self,
        job: &GenerationJob,
        target: &ModelTarget,
        limits: RateLimits,
        credential: String,
        counts: &mut GenerationCounts,
    ) -> Result<()> {
        if !lock_store(&self.store)?.claim_generation_job(&job.id, &target.label())? {
            tracing::debug!(job_id = %job.id, "Generation job claimed elsewhere");
            return Ok(());
        }
        self.limiter.consume_request(&target.key(), limits);

        tracing::info!(job_id = %job.id, target = %target, concept = %job.concept, "Generating puzzle");
        let started = Instant::now();
        let request = ExecutionRequest {
            target: target.clone(),
            credential,
            system_prompt: GENERATION_SYSTEM_PROMPT.to_string(),
            user_prompt: generation_prompt(&job.concept),
            max_tokens: self.llm.max_tokens,
            temperature: self.llm.temperature,
        };
        let result = complete(self.executor.as_ref(), request, self.llm.stream, &self.cancel).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        counts.processed += 1;

        let mut store = lock_store(&self.store)?;
        match result {
            Ok(completion) => match parse_generated_puzzle(&completion.text) {
                Ok(generated) => {
                    drop(store);
                    self.store_puzzle(job, generated, completion.tokens_used, elapsed_ms, counts)?;
                }
                Err(e) => {
                    if store.fail_generation_job(&job.id, &e.to_string(), Some(&completion.text), elapsed_ms)? {
                        counts.failed += 1;
                        tracing::warn!(job_id = %job.id, target = %target, error = %e, "Unusable generation");
                    } else {
                        tracing::warn!(job_id = %job.id, "Generation job left running during the call, reply dropped");
                    }
                }
            },
            Err(e) if e.is_rate_limit() => {
                self.limiter.apply_backoff(&target.key(), 1);
                store.release_generation_job(&job.id, &e.to_string())?;
                counts.rate_limited += 1;
                tracing::warn!(job_id = %job.id, target = %target, "Provider rate limited generation");
            }
            Err(LlmError::Cancelled) => {
                store.release_generation_job(&job.id, &LlmError::Cancelled.to_string())?;
            }
            Err(e) => {
                if store.fail_generation_job(&job.id, &e.to_string(), None, elapsed_ms)? {
                    counts.failed += 1;
                    tracing::warn!(job_id = %job.id, target = %target, error = %e, "Generation failed");
                } else {
                    tracing::warn!(job_id = %job.id, "Generation job left running during the call, error dropped");
                }
            }
        }
        Ok(())
    }

    fn store_puzzle(
        &self,
        job: &GenerationJob,
        generated: GeneratedPuzzle,
        tokens_used: u64,
        elapsed_ms: u64,
        counts: &mut GenerationCounts,
    ) -> Result<()> {
        let mut pairs = generated.pairs;
        mark_test_cases(&mut pairs);
        let puzzle_id = puzzle_id_for(&pairs);

        let mut store = lock_store(&self.store)?;
        if store.puzzle_exists(&puzzle_id)? {
            if store.complete_generation_job_existing(&job.id, &puzzle_id, tokens_used, elapsed_ms)? {
                counts.succeeded += 1;
                counts.duplicates += 1;
                tracing::info!(job_id = %job.id, puzzle_id = %puzzle_id, "Generated puzzle already exists");
            } else {
                tracing::warn!(job_id = %job.id, "Generation job left running during the call, reply dropped");
            }
            return Ok(());
        }

        let puzzle = NewPuzzle {
            id: puzzle_id.clone(),
            idea: Some(job.concept.clone()),
            source: GENERATED_SOURCE.to_string(),
            tags: vec![GENERATED_TAG.to_string()],
            generation_job_id: Some(job.id.clone()),
            pairs,
            reasoning: generated.explanation,
            tokens_used,
            time_taken_ms: elapsed_ms,
        };
        match store.complete_generation_job_with_puzzle(&job.id, &puzzle)? {
            Some(PuzzleInsert::Created { .. }) => {
                counts.succeeded += 1;
                tracing::info!(job_id = %job.id, puzzle_id = %puzzle_id, "Stored generated puzzle");
            }
            Some(PuzzleInsert::Duplicate) => {
                counts.succeeded += 1;
                counts.duplicates += 1;
                tracing::info!(job_id = %job.id, puzzle_id = %puzzle_id, "Generated puzzle already exists");
            }
            None => {
                tracing::warn!(job_id = %job.id, "Generation job left running during the call, reply dropped");
            }
        }
        Ok(())
    }
}
