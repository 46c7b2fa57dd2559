//! Record types persisted by the JobStore.
//!
//! Two job families share the store: generation jobs (concept -> new puzzle)
//! and evaluation jobs (one model against one generation's test cases).
//! Status enums round-trip through their lowercase string form, which is what
//! the SQLite columns hold.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::{Grid, ModelTarget, Pair, Provider};

/// Tier for cheap/fast models, tried first.
pub const PRIORITY_CHEAP: u8 = 1;
/// Tier for expensive models, used only on escalation.
pub const PRIORITY_ESCALATION: u8 = 2;

/// Lifecycle of an evaluation job.
///
/// `queued -> running -> {completed | failed | skipped}`; a failed or
/// rate-limited attempt may re-enter `queued` while attempts remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl EvaluationStatus {
    pub const ALL: [EvaluationStatus; 5] = [
        EvaluationStatus::Queued,
        EvaluationStatus::Running,
        EvaluationStatus::Completed,
        EvaluationStatus::Failed,
        EvaluationStatus::Skipped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationStatus::Queued => "queued",
            EvaluationStatus::Running => "running",
            EvaluationStatus::Completed => "completed",
            EvaluationStatus::Failed => "failed",
            EvaluationStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EvaluationStatus::Completed | EvaluationStatus::Failed | EvaluationStatus::Skipped
        )
    }
}

impl fmt::Display for EvaluationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvaluationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EvaluationStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| format!("unknown evaluation status: {}", s))
    }
}

/// Lifecycle of a generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl GenerationStatus {
    pub const ALL: [GenerationStatus; 5] = [
        GenerationStatus::Pending,
        GenerationStatus::Running,
        GenerationStatus::Completed,
        GenerationStatus::Failed,
        GenerationStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationStatus::Pending => "pending",
            GenerationStatus::Running => "running",
            GenerationStatus::Completed => "completed",
            GenerationStatus::Failed => "failed",
            GenerationStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GenerationStatus::Completed | GenerationStatus::Failed | GenerationStatus::Cancelled
        )
    }
}

impl fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GenerationStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| format!("unknown generation status: {}", s))
    }
}

/// Lifecycle of a model run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status: {}", other)),
        }
    }
}

/// One model against one generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationJob {
    pub id: String,
    pub puzzle_id: String,
    pub generation_id: String,
    pub provider: Provider,
    pub model: String,
    pub priority: u8,
    pub status: EvaluationStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub model_run_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl EvaluationJob {
    pub fn target(&self) -> ModelTarget {
        ModelTarget::new(self.provider, self.model.clone())
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Insert request for an evaluation job.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvaluationJob {
    pub puzzle_id: String,
    pub generation_id: String,
    pub target: ModelTarget,
    pub priority: u8,
    pub max_attempts: u32,
}

/// Unique identity of an evaluation job: `(generation, provider, model)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobKey {
    pub generation_id: String,
    pub provider: Provider,
    pub model: String,
}

impl JobKey {
    pub fn new(generation_id: impl Into<String>, target: &ModelTarget) -> Self {
        Self {
            generation_id: generation_id.into(),
            provider: target.provider,
            model: target.model.clone(),
        }
    }
}

/// A concept waiting to become a puzzle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationJob {
    pub id: String,
    pub concept: String,
    pub status: GenerationStatus,
    /// `provider/model` once picked up
    pub model: Option<String>,
    /// Set if and only if completed
    pub puzzle_id: Option<String>,
    pub error_message: Option<String>,
    /// Raw model output kept for failed jobs
    pub raw_content: Option<String>,
    pub tokens_used: u64,
    pub time_taken_ms: u64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Puzzle {
    pub id: String,
    pub idea: Option<String>,
    pub source: String,
    pub tags: Vec<String>,
    pub generation_job_id: Option<String>,
    pub created_at: i64,
}

/// A puzzle with its first generation, written together.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPuzzle {
    pub id: String,
    pub idea: Option<String>,
    pub source: String,
    pub tags: Vec<String>,
    pub generation_job_id: Option<String>,
    pub pairs: Vec<Pair>,
    pub reasoning: String,
    pub tokens_used: u64,
    pub time_taken_ms: u64,
}

/// Result of writing a puzzle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PuzzleInsert {
    Created { generation_id: String },
    /// A puzzle with this ID already exists; nothing was written
    Duplicate,
}

/// A pair as stored, with its row ID.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPair {
    pub id: String,
    pub generation_id: String,
    pub pair: Pair,
}

/// A generation with at least one test-case pair.
#[derive(Debug, Clone, PartialEq)]
pub struct EligibleGeneration {
    pub generation_id: String,
    pub puzzle_id: String,
    pub tags: Vec<String>,
}

/// Minimal view of a completed model run, for planning.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedRun {
    pub generation_id: String,
    pub target: ModelTarget,
    pub accuracy: f64,
}

/// Settings a run was executed with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub temperature: f32,
    pub max_tokens: u32,
    pub source: String,
}

/// One prediction against one test case.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionRecord {
    pub pair_id: String,
    /// `None` when the model's answer was not a grid
    pub predicted: Option<Grid>,
    pub expected: Grid,
    pub is_correct: bool,
}

/// Scored outcome of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunResult {
    pub reasoning: String,
    pub predictions: Vec<PredictionRecord>,
    pub correct_count: u32,
    pub total_count: u32,
    pub accuracy: f64,
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub time_taken_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelRun {
    pub id: String,
    pub generation_id: String,
    pub provider: Provider,
    pub model: String,
    pub status: RunStatus,
    pub reasoning: Option<String>,
    pub correct_count: u32,
    pub total_count: u32,
    pub accuracy: Option<f64>,
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub time_taken_ms: u64,
    pub error_message: Option<String>,
    pub metadata: RunMetadata,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One cell of the provider x model x status breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakdownRow {
    pub provider: String,
    pub model: String,
    pub status: String,
    pub count: usize,
}

/// Counts from a stale-job sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReclaimCounts {
    pub evaluation_requeued: usize,
    pub evaluation_failed: usize,
    pub generation_requeued: usize,
}
