//! Read-only view of both queues and the rate buckets.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::domain::Provider;
use crate::error::Result;
use crate::llm::CredentialResolver;
use crate::scheduler::rate_limit::{BucketStatus, RateLimiter};
use crate::store::{BreakdownRow, EvaluationStatus, GenerationStatus, SharedStore, lock_store};

#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub evaluation: BTreeMap<EvaluationStatus, usize>,
    pub generation: BTreeMap<GenerationStatus, usize>,
    pub breakdown: Vec<BreakdownRow>,
    pub eligible_generations: usize,
    /// Providers with a credential available
    pub configured_providers: Vec<Provider>,
    pub rate_limits: BTreeMap<String, BucketStatus>,
}

/// Snapshot the queues. Never mutates anything.
pub fn collect_status(
    store: &SharedStore,
    limiter: &RateLimiter,
    credentials: &dyn CredentialResolver,
) -> Result<QueueStatus> {
    let store = lock_store(store)?;
    Ok(QueueStatus {
        evaluation: store.evaluation_counts_by_status()?,
        generation: store.generation_counts_by_status()?,
        breakdown: store.evaluation_breakdown()?,
        eligible_generations: store.count_eligible_generations()?,
        configured_providers: Provider::ALL
            .into_iter()
            .filter(|p| credentials.has_credential(*p))
            .collect(),
        rate_limits: limiter.status(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::StaticCredentials;
    use crate::scheduler::rate_limit::RateLimits;
    use crate::store::{JobStore, shared};

    #[test]
    fn test_status_of_empty_store() {
        let store = shared(JobStore::open_in_memory().unwrap());
        let limiter = RateLimiter::new();
        let credentials = StaticCredentials::new().with(Provider::Groq, "g");

        let status = collect_status(&store, &limiter, &credentials).unwrap();
        assert_eq!(status.evaluation[&EvaluationStatus::Queued], 0);
        assert_eq!(status.generation[&GenerationStatus::Pending], 0);
        assert!(status.breakdown.is_empty());
        assert_eq!(status.configured_providers, vec![Provider::Groq]);
        assert!(status.rate_limits.is_empty());
    }

    #[test]
    fn test_status_serializes_to_json() {
        let store = shared(JobStore::open_in_memory().unwrap());
        lock_store(&store).unwrap().insert_generation_job("fill").unwrap();
        let limiter = RateLimiter::new();
        limiter.consume_request("groq:llama-3.1-8b-instant", RateLimits::new(30, 1000));

        let status = collect_status(&store, &limiter, &StaticCredentials::new()).unwrap();
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["generation"]["pending"], 1);
        assert_eq!(json["evaluation"]["queued"], 0);
        assert_eq!(json["rate_limits"]["groq:llama-3.1-8b-instant"]["minute_tokens"], 29);
    }
}
