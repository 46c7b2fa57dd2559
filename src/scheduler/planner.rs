//! Enqueue planner - decides which evaluation jobs should exist.
//!
//! Planning never calls a model. It reads what the store already holds,
//! picks the `(generation, provider, model)` tuples that are missing and
//! writes them as `queued` jobs. Two policies share that mechanism:
//!
//! - **Flat**: every eligible generation against every selected model.
//! - **Smart**: cheap models first; expensive models only for generations
//!   that every cheap model has tried and none has solved at all.
//!
//! The store's uniqueness constraint is the backstop for both, so running a
//! plan twice never duplicates work.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::config::PlannerConfig;
use crate::domain::{ModelTarget, Provider};
use crate::error::{GridbenchError, Result};
use crate::llm::CredentialResolver;
use crate::scheduler::priority::{primary_tag, sort_by_tag_rank};
use crate::store::{JobKey, NewEvaluationJob, PRIORITY_CHEAP, PRIORITY_ESCALATION, SharedStore, lock_store};

/// Options for a flat plan.
#[derive(Debug, Clone, Default)]
pub struct FlatPlan {
    /// Explicit models. Empty means the configured cheap and expensive tiers.
    pub models: Vec<ModelTarget>,
    /// Only plan this tier. Explicit models are planned at this priority,
    /// or the cheap tier's when unset.
    pub priority: Option<u8>,
    /// Only plan models from these providers. Empty means all.
    pub providers: Vec<Provider>,
    /// Only plan generations carrying one of these tags. Empty means all.
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlatReport {
    pub queued: usize,
    pub skipped: usize,
    pub total_generations: usize,
    pub models_per_generation: usize,
}

/// Options for a smart plan.
#[derive(Debug, Clone)]
pub struct SmartPlan {
    /// Ceiling on jobs created by this pass.
    pub max_to_queue: usize,
    pub tags: Vec<String>,
    /// Restrict to the cheap (1) or escalation (2) tier.
    pub only_priority: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanReport {
    pub queued: usize,
    pub skipped_existing: usize,
    pub total_generations_considered: usize,
    /// Jobs queued per generation's first tag
    pub tag_breakdown: BTreeMap<String, usize>,
    pub available_cheap: Vec<String>,
    pub available_expensive: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConceptEnqueueReport {
    pub created: usize,
    pub skipped_duplicates: usize,
}

pub struct Planner {
    store: SharedStore,
    credentials: Arc<dyn CredentialResolver>,
    config: PlannerConfig,
    max_attempts: u32,
}

impl Planner {
    pub fn new(
        store: SharedStore,
        credentials: Arc<dyn CredentialResolver>,
        config: PlannerConfig,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            credentials,
            config,
            max_attempts,
        }
    }

    /// Queue every eligible generation against every selected model.
    pub fn enqueue_flat(&self, plan: &FlatPlan) -> Result<FlatReport> {
        let tiered: Vec<(ModelTarget, u8)> = if plan.models.is_empty() {
            self.config
                .cheap_models
                .iter()
                .map(|m| (m.clone(), PRIORITY_CHEAP))
                .chain(self.config.expensive_models.iter().map(|m| (m.clone(), PRIORITY_ESCALATION)))
                .filter(|(_, priority)| plan.priority.is_none_or(|p| p == *priority))
                .collect()
        } else {
            let priority = plan.priority.unwrap_or(PRIORITY_CHEAP);
            plan.models.iter().map(|m| (m.clone(), priority)).collect()
        };

        let models: Vec<(ModelTarget, u8)> = tiered
            .into_iter()
            .filter(|(m, _)| plan.providers.is_empty() || plan.providers.contains(&m.provider))
            .filter(|(m, _)| self.credentials.has_credential(m.provider))
            .collect();
        if models.is_empty() {
            return Err(GridbenchError::NoModelsAvailable(
                "no selected model has a configured credential".to_string(),
            ));
        }

        let mut store = lock_store(&self.store)?;
        let generations = store.eligible_generations(&plan.tags)?;
        let mut report = FlatReport {
            total_generations: generations.len(),
            models_per_generation: models.len(),
            ..FlatReport::default()
        };

        for generation in &generations {
            for (target, priority) in &models {
                let job = NewEvaluationJob {
                    puzzle_id: generation.puzzle_id.clone(),
                    generation_id: generation.generation_id.clone(),
                    target: target.clone(),
                    priority: *priority,
                    max_attempts: self.max_attempts,
                };
                match store.insert_evaluation_job(&job)? {
                    Some(_) => report.queued += 1,
                    None => report.skipped += 1,
                }
            }
        }

        log::info!(
            "Flat plan queued {} jobs, skipped {} ({} generations x {} models)",
            report.queued,
            report.skipped,
            report.total_generations,
            report.models_per_generation
        );
        Ok(report)
    }

    /// Queue cheap models first and escalate generations nobody solved.
    pub fn enqueue_smart(&self, plan: &SmartPlan) -> Result<PlanReport> {
        let available_cheap = self.available(&self.config.cheap_models);
        let available_expensive = self.available(&self.config.expensive_models);
        if available_cheap.is_empty() && available_expensive.is_empty() {
            return Err(GridbenchError::NoModelsAvailable(
                "no cheap or expensive model has a configured credential".to_string(),
            ));
        }

        let mut store = lock_store(&self.store)?;
        let mut generations = store.eligible_generations(&plan.tags)?;
        sort_by_tag_rank(&mut generations, &self.config.tag_priority);

        let mut existing: HashSet<JobKey> = store.active_job_keys()?;
        let mut best_accuracy: HashMap<String, f64> = HashMap::new();
        let mut cheap_tried: HashMap<String, HashSet<ModelTarget>> = HashMap::new();
        for run in store.completed_runs()? {
            existing.insert(JobKey::new(run.generation_id.clone(), &run.target));
            let best = best_accuracy.entry(run.generation_id.clone()).or_insert(run.accuracy);
            *best = best.max(run.accuracy);
            if available_cheap.contains(&run.target) {
                cheap_tried.entry(run.generation_id).or_default().insert(run.target);
            }
        }

        let want_cheap = plan.only_priority.is_none_or(|p| p == PRIORITY_CHEAP);
        let want_expensive = plan.only_priority.is_none_or(|p| p == PRIORITY_ESCALATION);

        let mut report = PlanReport {
            total_generations_considered: generations.len(),
            available_cheap: available_cheap.iter().map(ModelTarget::label).collect(),
            available_expensive: available_expensive.iter().map(ModelTarget::label).collect(),
            ..PlanReport::default()
        };
        let mut to_create: Vec<NewEvaluationJob> = Vec::new();

        for generation in &generations {
            if to_create.len() >= plan.max_to_queue {
                break;
            }

            let tried = cheap_tried.get(&generation.generation_id).map_or(0, HashSet::len);
            let best = best_accuracy.get(&generation.generation_id).copied().unwrap_or(-1.0);

            let (tier, priority) = if tried < available_cheap.len() {
                (&available_cheap, PRIORITY_CHEAP)
            } else if best == 0.0 {
                (&available_expensive, PRIORITY_ESCALATION)
            } else {
                continue;
            };
            let wanted = match priority {
                PRIORITY_CHEAP => want_cheap,
                _ => want_expensive,
            };
            if !wanted {
                continue;
            }

            for target in tier {
                if to_create.len() >= plan.max_to_queue {
                    break;
                }
                let key = JobKey::new(generation.generation_id.clone(), target);
                if existing.contains(&key) {
                    report.skipped_existing += 1;
                    continue;
                }
                existing.insert(key);
                to_create.push(NewEvaluationJob {
                    puzzle_id: generation.puzzle_id.clone(),
                    generation_id: generation.generation_id.clone(),
                    target: target.clone(),
                    priority,
                    max_attempts: self.max_attempts,
                });
                *report
                    .tag_breakdown
                    .entry(primary_tag(&generation.tags).to_string())
                    .or_default() += 1;
            }
        }

        let inserted = store.insert_evaluation_jobs(&to_create)?;
        if inserted < to_create.len() {
            log::debug!(
                "{} planned jobs already existed at insert time",
                to_create.len() - inserted
            );
        }
        report.queued = inserted;
        report.skipped_existing += to_create.len() - inserted;

        log::info!(
            "Smart plan queued {} jobs across {} generations, skipped {} existing",
            report.queued,
            report.total_generations_considered,
            report.skipped_existing
        );
        Ok(report)
    }

    /// Queue one pending generation job per concept not seen before.
    ///
    /// Concepts compare on trimmed, case-insensitive text, both against the
    /// store and within `concepts`.
    pub fn enqueue_concepts(&self, concepts: &[String]) -> Result<ConceptEnqueueReport> {
        let mut store = lock_store(&self.store)?;
        let mut known: HashSet<String> = store.all_concepts()?.iter().map(|c| normalize_concept(c)).collect();
        let mut report = ConceptEnqueueReport::default();

        for concept in concepts {
            let trimmed = concept.trim();
            if trimmed.is_empty() {
                continue;
            }
            if !known.insert(normalize_concept(trimmed)) {
                report.skipped_duplicates += 1;
                continue;
            }
            store.insert_generation_job(trimmed)?;
            report.created += 1;
        }

        log::info!(
            "Queued {} concepts, skipped {} duplicates",
            report.created,
            report.skipped_duplicates
        );
        Ok(report)
    }

    /// Configured models whose provider has a credential, without repeats.
    fn available(&self, models: &[ModelTarget]) -> Vec<ModelTarget> {
        let mut seen = HashSet::new();
        models
            .iter()
            .filter(|m| self.credentials.has_credential(m.provider))
            .filter(|m| seen.insert((*m).clone()))
            .cloned()
            .collect()
    }
}

fn normalize_concept(concept: &str) -> String {
    concept.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Pair;
    use crate::llm::StaticCredentials;
    use crate::store::{EvaluationStatus, JobStore, NewPuzzle, PuzzleInsert, RunMetadata, RunResult, shared};

    fn cheap_a() -> ModelTarget {
        ModelTarget::new(Provider::Groq, "llama-3.1-8b-instant")
    }

    fn cheap_b() -> ModelTarget {
        ModelTarget::new(Provider::Gemini, "gemini-2.0-flash")
    }

    fn pricey() -> ModelTarget {
        ModelTarget::new(Provider::Mistral, "mistral-large-latest")
    }

    fn config() -> PlannerConfig {
        PlannerConfig {
            max_to_queue: 100,
            tag_priority: vec!["first".to_string(), "second".to_string()],
            cheap_models: vec![cheap_a(), cheap_b()],
            expensive_models: vec![pricey()],
        }
    }

    fn all_keys() -> StaticCredentials {
        StaticCredentials::new()
            .with(Provider::Groq, "g")
            .with(Provider::Gemini, "m")
            .with(Provider::Mistral, "x")
    }

    fn planner(store: &SharedStore, credentials: StaticCredentials) -> Planner {
        Planner::new(store.clone(), Arc::new(credentials), config(), 3)
    }

    fn seed(store: &SharedStore, id: &str, tags: &[&str]) -> String {
        let puzzle = NewPuzzle {
            id: id.to_string(),
            idea: None,
            source: "test".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            generation_job_id: None,
            pairs: vec![
                Pair::new(vec![vec![1]], vec![vec![2]], 0),
                Pair::new(vec![vec![3]], vec![vec![4]], 1).test_case(),
            ],
            reasoning: String::new(),
            tokens_used: 0,
            time_taken_ms: 0,
        };
        match lock_store(store).unwrap().insert_puzzle(&puzzle).unwrap() {
            PuzzleInsert::Created { generation_id } => generation_id,
            PuzzleInsert::Duplicate => panic!("duplicate seed"),
        }
    }

    fn complete_run(store: &SharedStore, generation_id: &str, target: &ModelTarget, accuracy: f64) {
        let mut store = lock_store(store).unwrap();
        let job_id = match store
            .insert_evaluation_job(&NewEvaluationJob {
                puzzle_id: "p".to_string(),
                generation_id: generation_id.to_string(),
                target: target.clone(),
                priority: PRIORITY_CHEAP,
                max_attempts: 3,
            })
            .unwrap()
        {
            Some(id) => id,
            None => panic!("job exists"),
        };
        let job = store.get_evaluation_job(&job_id).unwrap().unwrap();
        let metadata = RunMetadata {
            temperature: 0.3,
            max_tokens: 100,
            source: "test".to_string(),
        };
        let run_id = store.claim_and_start_run(&job, &metadata).unwrap().unwrap();
        let result = RunResult {
            accuracy,
            total_count: 1,
            correct_count: if accuracy > 0.0 { 1 } else { 0 },
            ..RunResult::default()
        };
        assert!(store.complete_evaluation(&job_id, &run_id, &result).unwrap());
    }

    fn smart(max: usize, only: Option<u8>) -> SmartPlan {
        SmartPlan {
            max_to_queue: max,
            tags: Vec::new(),
            only_priority: only,
        }
    }

    #[test]
    fn test_flat_plan_and_idempotency() {
        let store = shared(JobStore::open_in_memory().unwrap());
        seed(&store, "a", &["first"]);
        seed(&store, "b", &[]);
        let planner = planner(&store, all_keys());

        let report = planner.enqueue_flat(&FlatPlan::default()).unwrap();
        assert_eq!(report.total_generations, 2);
        assert_eq!(report.models_per_generation, 3);
        assert_eq!(report.queued, 6);
        assert_eq!(report.skipped, 0);

        let again = planner.enqueue_flat(&FlatPlan::default()).unwrap();
        assert_eq!(again.queued, 0);
        assert_eq!(again.skipped, 6);
    }

    #[test]
    fn test_flat_plan_filters() {
        let store = shared(JobStore::open_in_memory().unwrap());
        seed(&store, "a", &["first"]);
        let planner = planner(&store, all_keys());

        let plan = FlatPlan {
            priority: Some(PRIORITY_ESCALATION),
            ..FlatPlan::default()
        };
        assert_eq!(planner.enqueue_flat(&plan).unwrap().queued, 1);

        let plan = FlatPlan {
            providers: vec![Provider::Gemini],
            ..FlatPlan::default()
        };
        assert_eq!(planner.enqueue_flat(&plan).unwrap().queued, 1);
    }

    #[test]
    fn test_flat_plan_explicit_models_use_priority() {
        let store = shared(JobStore::open_in_memory().unwrap());
        let generation_id = seed(&store, "a", &[]);
        let planner = planner(&store, all_keys());

        let plan = FlatPlan {
            models: vec![pricey()],
            priority: Some(PRIORITY_ESCALATION),
            ..FlatPlan::default()
        };
        assert_eq!(planner.enqueue_flat(&plan).unwrap().queued, 1);
        let jobs = lock_store(&store).unwrap().evaluation_jobs_for_generation(&generation_id).unwrap();
        assert_eq!(jobs[0].priority, PRIORITY_ESCALATION);
        assert_eq!(jobs[0].target(), pricey());
    }

    #[test]
    fn test_flat_plan_without_credentials_fails() {
        let store = shared(JobStore::open_in_memory().unwrap());
        seed(&store, "a", &[]);
        let planner = planner(&store, StaticCredentials::new());
        let err = planner.enqueue_flat(&FlatPlan::default()).unwrap_err();
        assert!(matches!(err, GridbenchError::NoModelsAvailable(_)));
    }

    #[test]
    fn test_smart_plan_queues_cheap_first_in_tag_order() {
        let store = shared(JobStore::open_in_memory().unwrap());
        seed(&store, "untagged", &[]);
        seed(&store, "late", &["second"]);
        seed(&store, "early", &["first"]);
        let planner = planner(&store, all_keys());

        let report = planner.enqueue_smart(&smart(100, None)).unwrap();
        assert_eq!(report.queued, 6);
        assert_eq!(report.total_generations_considered, 3);
        assert_eq!(report.tag_breakdown["first"], 2);
        assert_eq!(report.tag_breakdown["second"], 2);
        assert_eq!(report.tag_breakdown["untagged"], 2);
        assert_eq!(report.available_expensive, vec!["mistral/mistral-large-latest".to_string()]);

        let queued = lock_store(&store).unwrap().fetch_queued_evaluation_jobs(10).unwrap();
        assert!(queued.iter().all(|j| j.priority == PRIORITY_CHEAP));
        assert_eq!(queued[0].puzzle_id, "early");
        assert_eq!(queued[2].puzzle_id, "late");
        assert_eq!(queued[4].puzzle_id, "untagged");
    }

    #[test]
    fn test_smart_plan_is_idempotent() {
        let store = shared(JobStore::open_in_memory().unwrap());
        seed(&store, "a", &["first"]);
        seed(&store, "b", &["second"]);
        let planner = planner(&store, all_keys());

        assert_eq!(planner.enqueue_smart(&smart(100, None)).unwrap().queued, 4);
        let second = planner.enqueue_smart(&smart(100, None)).unwrap();
        assert_eq!(second.queued, 0);
        assert_eq!(second.skipped_existing, 4);
    }

    #[test]
    fn test_smart_plan_respects_ceiling() {
        let store = shared(JobStore::open_in_memory().unwrap());
        seed(&store, "a", &["first"]);
        seed(&store, "b", &["first"]);
        seed(&store, "c", &["first"]);
        let planner = planner(&store, all_keys());

        let report = planner.enqueue_smart(&smart(5, None)).unwrap();
        assert_eq!(report.queued, 5);
        let counts = lock_store(&store).unwrap().evaluation_counts_by_status().unwrap();
        assert_eq!(counts[&EvaluationStatus::Queued], 5);
    }

    #[test]
    fn test_smart_plan_escalates_only_unsolved() {
        let store = shared(JobStore::open_in_memory().unwrap());
        let failed_everywhere = seed(&store, "hard", &["first"]);
        let partly_solved = seed(&store, "easy", &["first"]);
        for target in [cheap_a(), cheap_b()] {
            complete_run(&store, &failed_everywhere, &target, 0.0);
        }
        complete_run(&store, &partly_solved, &cheap_a(), 0.0);
        complete_run(&store, &partly_solved, &cheap_b(), 0.5);

        let planner = planner(&store, all_keys());
        let report = planner.enqueue_smart(&smart(100, Some(PRIORITY_ESCALATION))).unwrap();
        assert_eq!(report.queued, 1);

        let guard = lock_store(&store).unwrap();
        let jobs = guard.evaluation_jobs_for_generation(&failed_everywhere).unwrap();
        let escalated: Vec<_> = jobs.iter().filter(|j| j.priority == PRIORITY_ESCALATION).collect();
        assert_eq!(escalated.len(), 1);
        assert_eq!(escalated[0].target(), pricey());
        let easy_jobs = guard.evaluation_jobs_for_generation(&partly_solved).unwrap();
        assert!(easy_jobs.iter().all(|j| j.priority == PRIORITY_CHEAP));
    }

    #[test]
    fn test_smart_plan_cheap_filter_skips_escalation() {
        let store = shared(JobStore::open_in_memory().unwrap());
        let generation_id = seed(&store, "hard", &[]);
        complete_run(&store, &generation_id, &cheap_a(), 0.0);
        complete_run(&store, &generation_id, &cheap_b(), 0.0);

        let planner = planner(&store, all_keys());
        assert_eq!(planner.enqueue_smart(&smart(100, Some(PRIORITY_CHEAP))).unwrap().queued, 0);
    }

    #[test]
    fn test_smart_plan_missing_credential_narrows_tier() {
        let store = shared(JobStore::open_in_memory().unwrap());
        let generation_id = seed(&store, "a", &[]);
        // Only the groq model is usable, so one run completes the cheap tier
        let credentials = StaticCredentials::new().with(Provider::Groq, "g").with(Provider::Mistral, "x");
        complete_run(&store, &generation_id, &cheap_a(), 0.0);

        let report = planner(&store, credentials).enqueue_smart(&smart(100, None)).unwrap();
        assert_eq!(report.available_cheap, vec!["groq/llama-3.1-8b-instant".to_string()]);
        assert_eq!(report.queued, 1);
    }

    #[test]
    fn test_smart_plan_without_any_models_fails() {
        let store = shared(JobStore::open_in_memory().unwrap());
        let err = planner(&store, StaticCredentials::new())
            .enqueue_smart(&smart(10, None))
            .unwrap_err();
        assert!(matches!(err, GridbenchError::NoModelsAvailable(_)));
    }

    #[test]
    fn test_enqueue_concepts_dedups() {
        let store = shared(JobStore::open_in_memory().unwrap());
        lock_store(&store).unwrap().insert_generation_job("Gravity fill").unwrap();
        let planner = planner(&store, all_keys());

        let concepts = vec![
            "  gravity FILL ".to_string(),
            "mirror symmetry".to_string(),
            "Mirror Symmetry".to_string(),
            "   ".to_string(),
        ];
        let report = planner.enqueue_concepts(&concepts).unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.skipped_duplicates, 2);
        assert_eq!(
            lock_store(&store).unwrap().recent_concepts(1).unwrap(),
            vec!["mirror symmetry".to_string()]
        );
    }
}
