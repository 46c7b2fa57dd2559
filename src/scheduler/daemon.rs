//! Continuous mode: reclaim, plan, evaluate and generate on an interval.
//!
//! One process owns one RateLimiter for its whole life, so bucket state
//! carries across ticks. A failed tick is logged and the loop carries on.

use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{GridbenchError, Result};
use crate::scheduler::generation::{GenerationCounts, GenerationWorker};
use crate::scheduler::planner::{PlanReport, Planner, SmartPlan};
use crate::scheduler::reaper::Reaper;
use crate::scheduler::worker::{BatchCounts, EvaluationWorker};
use crate::store::ReclaimCounts;

/// Sizes for one tick.
#[derive(Debug, Clone)]
pub struct TickSettings {
    pub plan: SmartPlan,
    pub evaluation_batch: usize,
    pub generation_batch: usize,
}

/// What one tick did. Stages skipped for lack of models are `None`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    pub reclaimed: ReclaimCounts,
    pub planned: Option<PlanReport>,
    pub evaluation: BatchCounts,
    pub generation: Option<GenerationCounts>,
}

pub struct Daemon {
    reaper: Reaper,
    planner: Planner,
    evaluator: EvaluationWorker,
    generator: GenerationWorker,
    settings: TickSettings,
}

impl Daemon {
    pub fn new(
        reaper: Reaper,
        planner: Planner,
        evaluator: EvaluationWorker,
        generator: GenerationWorker,
        settings: TickSettings,
    ) -> Self {
        Self {
            reaper,
            planner,
            evaluator,
            generator,
            settings,
        }
    }

    /// Run one pass over every stage.
    pub async fn tick(&self) -> Result<TickReport> {
        let reclaimed = self.reaper.sweep()?;

        let planned = match self.planner.enqueue_smart(&self.settings.plan) {
            Ok(report) => Some(report),
            Err(GridbenchError::NoModelsAvailable(reason)) => {
                tracing::debug!(%reason, "Skipping plan");
                None
            }
            Err(e) => return Err(e),
        };

        let evaluation = self.evaluator.process_batch(self.settings.evaluation_batch).await?;

        let generation = match self.generator.process_batch(self.settings.generation_batch).await {
            Ok(counts) => Some(counts),
            Err(GridbenchError::NoModelsAvailable(reason)) => {
                tracing::debug!(%reason, "Skipping generation");
                None
            }
            Err(e) => return Err(e),
        };

        Ok(TickReport {
            reclaimed,
            planned,
            evaluation,
            generation,
        })
    }

    /// Tick every `interval` until `cancel` fires.
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        tracing::info!(interval_secs = interval.as_secs(), "Scheduler daemon started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Scheduler daemon stopping");
                    break;
                }
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(report) => tracing::info!(
                            planned = report.planned.as_ref().map_or(0, |p| p.queued),
                            evaluated = report.evaluation.processed,
                            generated = report.generation.map_or(0, |g| g.processed),
                            "Scheduler tick finished"
                        ),
                        Err(e) => tracing::error!(error = %e, "Scheduler tick failed"),
                    }
                }
            }
        }
    }
}
