//! Model runner - executes one evaluation run and scores it.
//!
//! A run shows the model a generation's training pairs, asks it to predict
//! the outputs of the test-case pairs and compares each prediction with the
//! expected grid.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::LlmConfig;
use crate::domain::{JobOutcome, ModelTarget, grids_equal};
use crate::llm::{ExecutionRequest, LlmError, ModelExecutor, complete, parse_evaluation};
use crate::prompt::{EVALUATION_SYSTEM_PROMPT, evaluation_prompt};
use crate::runner::pricing::estimate_cost;
use crate::store::{PredictionRecord, RunMetadata, RunResult, StoredPair};

/// Why a run did not produce a result.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RunError {
    #[error("No test cases found for this generation")]
    NoTestCases,

    #[error("Expected {expected} predictions, got {got}")]
    PredictionCountMismatch { expected: usize, got: usize },

    #[error(transparent)]
    Llm(#[from] LlmError),
}

impl RunError {
    /// Map a failed run to the job outcome it implies.
    ///
    /// Rate limiting is checked first so a 429 is never mistaken for a
    /// generic failure.
    pub fn into_outcome(self) -> JobOutcome {
        let message = self.to_string();
        match self {
            RunError::Llm(e) if e.is_rate_limit() => JobOutcome::RateLimited(message),
            RunError::NoTestCases | RunError::Llm(LlmError::MissingCredential(_)) => JobOutcome::PermanentSkip(message),
            _ => JobOutcome::TransientFailure(message),
        }
    }
}

/// Source tag stored in run metadata.
pub const RUN_SOURCE: &str = "auto-eval";

pub struct ModelRunner {
    executor: Arc<dyn ModelExecutor>,
    config: LlmConfig,
}

impl ModelRunner {
    pub fn new(executor: Arc<dyn ModelExecutor>, config: LlmConfig) -> Self {
        Self { executor, config }
    }

    /// Settings recorded with each run.
    pub fn metadata(&self) -> RunMetadata {
        RunMetadata {
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            source: RUN_SOURCE.to_string(),
        }
    }

    /// Run one model against a generation's pairs.
    pub async fn run(
        &self,
        target: &ModelTarget,
        credential: String,
        pairs: &[StoredPair],
        cancel: &CancellationToken,
    ) -> Result<RunResult, RunError> {
        let started = Instant::now();

        let (tests, training): (Vec<&StoredPair>, Vec<&StoredPair>) = pairs.iter().partition(|p| p.pair.is_test_case);
        if tests.is_empty() {
            return Err(RunError::NoTestCases);
        }

        let training_pairs: Vec<_> = training.iter().map(|p| &p.pair).collect();
        let test_pairs: Vec<_> = tests.iter().map(|p| &p.pair).collect();
        let request = ExecutionRequest {
            target: target.clone(),
            credential,
            system_prompt: EVALUATION_SYSTEM_PROMPT.to_string(),
            user_prompt: evaluation_prompt(&training_pairs, &test_pairs),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let completion = complete(self.executor.as_ref(), request, self.config.stream, cancel).await?;
        let answer = parse_evaluation(&completion.text)?;

        if answer.predictions.len() != tests.len() {
            return Err(RunError::PredictionCountMismatch {
                expected: tests.len(),
                got: answer.predictions.len(),
            });
        }

        let predictions: Vec<PredictionRecord> = tests
            .iter()
            .zip(answer.predictions)
            .map(|(test, predicted)| {
                let is_correct = predicted.as_ref().is_some_and(|p| grids_equal(p, &test.pair.output));
                PredictionRecord {
                    pair_id: test.id.clone(),
                    predicted,
                    expected: test.pair.output.clone(),
                    is_correct,
                }
            })
            .collect();

        let correct_count = predictions.iter().filter(|p| p.is_correct).count() as u32;
        let total_count = predictions.len() as u32;

        Ok(RunResult {
            reasoning: answer.reasoning,
            predictions,
            correct_count,
            total_count,
            accuracy: correct_count as f64 / total_count as f64,
            tokens_used: completion.tokens_used,
            cost_usd: estimate_cost(target.provider, &target.model, completion.tokens_used),
            time_taken_ms: started.elapsed().as_millis() as u64,
        })
    }
}
