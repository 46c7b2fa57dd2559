//! Concept brainstorming for the generation queue.
//!
//! Concepts are requested in batches. Each batch uses a different
//! inspiration theme and lists recent concepts the model must not repeat.
//! Batches rotate their starting model and fall through to the next model
//! on any failure. Tokens are taken with `try_acquire`, so brainstorming
//! can run next to a worker without double-spending a bucket.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, LlmConfig};
use crate::domain::ModelTarget;
use crate::error::{GridbenchError, Result};
use crate::llm::{CredentialResolver, ExecutionRequest, LlmError, ModelExecutor, complete, parse_concepts};
use crate::prompt::{CONCEPT_SYSTEM_PROMPT, concept_prompt};
use crate::scheduler::rate_limit::{RateLimiter, RateLimits};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BrainstormReport {
    pub concepts: Vec<String>,
    /// `provider/model` labels that produced at least one batch
    pub providers: Vec<String>,
    pub failed_batches: usize,
}

pub struct ConceptBrainstormer {
    limiter: Arc<RateLimiter>,
    executor: Arc<dyn ModelExecutor>,
    credentials: Arc<dyn CredentialResolver>,
    models: Vec<ModelTarget>,
    rate_limits: BTreeMap<String, RateLimits>,
    llm: LlmConfig,
    batch_size: usize,
    cancel: CancellationToken,
}

impl ConceptBrainstormer {
    pub fn new(
        limiter: Arc<RateLimiter>,
        executor: Arc<dyn ModelExecutor>,
        credentials: Arc<dyn CredentialResolver>,
        config: &Config,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            limiter,
            executor,
            credentials,
            models: config.generation.concept_models.clone(),
            rate_limits: config.rate_limits.clone(),
            llm: config.llm.clone(),
            batch_size: config.generation.concept_batch_size.max(1),
            cancel,
        }
    }

    /// Ask for up to `count` new concepts, avoiding `existing`.
    pub async fn brainstorm(&self, count: usize, existing: &[String]) -> Result<BrainstormReport> {
        let models: Vec<&ModelTarget> = self
            .models
            .iter()
            .filter(|m| self.credentials.has_credential(m.provider))
            .collect();
        if models.is_empty() {
            return Err(GridbenchError::NoModelsAvailable(
                "no concept model has a configured credential".to_string(),
            ));
        }

        let mut exclude = existing.to_vec();
        let mut report = BrainstormReport::default();
        let mut providers = BTreeSet::new();
        let batches = count.div_ceil(self.batch_size);

        for batch in 0..batches {
            let wanted = self.batch_size.min(count - report.concepts.len());
            if wanted == 0 || self.cancel.is_cancelled() {
                break;
            }

            let prompt = concept_prompt(wanted, batch, &exclude);
            match self.request_batch(&models, batch, &prompt).await {
                Some((target, mut concepts)) => {
                    concepts.truncate(wanted);
                    log::info!("Batch {}: {} concepts from {}", batch + 1, concepts.len(), target.label());
                    providers.insert(target.label());
                    exclude.extend(concepts.iter().cloned());
                    report.concepts.extend(concepts);
                }
                None => {
                    log::warn!("Batch {}: no concept model produced concepts", batch + 1);
                    report.failed_batches += 1;
                }
            }
        }

        report.providers = providers.into_iter().collect();
        Ok(report)
    }

    /// Try each model once, starting at `batch`, until one answers.
    async fn request_batch<'a>(
        &self,
        models: &[&'a ModelTarget],
        batch: usize,
        prompt: &str,
    ) -> Option<(&'a ModelTarget, Vec<String>)> {
        for offset in 0..models.len() {
            let target = models[(batch + offset) % models.len()];
            let key = target.key();

            let Some(limits) = self.rate_limits.get(&key).copied() else {
                continue;
            };
            let Some(credential) = self.credentials.resolve(target.provider) else {
                continue;
            };
            if !self.limiter.try_acquire(&key, limits) {
                continue;
            }

            let request = ExecutionRequest {
                target: target.clone(),
                credential,
                system_prompt: CONCEPT_SYSTEM_PROMPT.to_string(),
                user_prompt: prompt.to_string(),
                max_tokens: self.llm.max_tokens,
                temperature: self.llm.temperature,
            };
            let result = complete(self.executor.as_ref(), request, self.llm.stream, &self.cancel)
                .await
                .and_then(|completion| parse_concepts(&completion.text));

            match result {
                Ok(concepts) if !concepts.is_empty() => return Some((target, concepts)),
                Ok(_) => log::warn!("{} returned no concepts", target.label()),
                Err(LlmError::Cancelled) => return None,
                Err(e) if e.is_rate_limit() => {
                    self.limiter.apply_backoff(&key, 1);
                    log::warn!("{} rate limited while brainstorming: {}", target.label(), e);
                }
                Err(e) => log::warn!("{} failed to brainstorm: {}", target.label(), e),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Provider;
    use crate::llm::{MockExecutor, StaticCredentials};

    fn gemini() -> ModelTarget {
        ModelTarget::new(Provider::Gemini, "gemini-2.0-flash")
    }

    fn groq() -> ModelTarget {
        ModelTarget::new(Provider::Groq, "llama-3.3-70b-versatile")
    }

    fn config(batch_size: usize) -> Config {
        let mut config = Config::default();
        config.generation.concept_models = vec![gemini(), groq()];
        config.generation.concept_batch_size = batch_size;
        config.rate_limits = BTreeMap::from([
            (gemini().key(), RateLimits::new(10, 100)),
            (groq().key(), RateLimits::new(10, 100)),
        ]);
        config
    }

    fn brainstormer(mock: Arc<MockExecutor>, config: &Config) -> ConceptBrainstormer {
        ConceptBrainstormer::new(
            Arc::new(RateLimiter::new()),
            mock,
            Arc::new(StaticCredentials::new().with(Provider::Gemini, "m").with(Provider::Groq, "g")),
            config,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_batches_rotate_starting_model() {
        let mock = Arc::new(MockExecutor::new());
        mock.push_ok(r#"{"concepts": ["a", "b"]}"#)
            .push_ok(r#"{"concepts": ["c", "d"]}"#);

        let report = brainstormer(mock.clone(), &config(2)).brainstorm(4, &[]).await.unwrap();
        assert_eq!(report.concepts, vec!["a", "b", "c", "d"]);
        assert_eq!(mock.calls(), vec![gemini(), groq()]);
        assert_eq!(report.providers.len(), 2);
        assert_eq!(report.failed_batches, 0);
    }

    #[tokio::test]
    async fn test_falls_through_to_next_model() {
        let mock = Arc::new(MockExecutor::new());
        mock.push_err(LlmError::Network("reset".to_string()))
            .push_ok(r#"["one", "two", "three"]"#);

        let report = brainstormer(mock.clone(), &config(2)).brainstorm(2, &[]).await.unwrap();
        assert_eq!(report.concepts, vec!["one", "two"]);
        assert_eq!(report.providers, vec!["groq/llama-3.3-70b-versatile".to_string()]);
    }

    #[tokio::test]
    async fn test_all_models_failing_counts_batches() {
        let mock = Arc::new(MockExecutor::failing(LlmError::InvalidResponse("nope".to_string())));
        let report = brainstormer(mock, &config(5)).brainstorm(10, &[]).await.unwrap();
        assert!(report.concepts.is_empty());
        assert_eq!(report.failed_batches, 2);
    }

    #[tokio::test]
    async fn test_without_credentials_is_an_error() {
        let brainstormer = ConceptBrainstormer::new(
            Arc::new(RateLimiter::new()),
            Arc::new(MockExecutor::new()),
            Arc::new(StaticCredentials::new()),
            &config(5),
            CancellationToken::new(),
        );
        let err = brainstormer.brainstorm(5, &[]).await.unwrap_err();
        assert!(matches!(err, GridbenchError::NoModelsAvailable(_)));
    }
}
