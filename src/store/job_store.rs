//! JobStore implementation over SQLite.
//!
//! Holds puzzles with their generations and pairs, the two job queues, and
//! model runs with per-test-case predictions. Every multi-row write that
//! decides a job's fate runs inside one transaction.

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::{ModelTarget, Pair, Provider};
use crate::error::Result;
use crate::id::{generate_id, now_ms};
use crate::store::records::{
    BreakdownRow, CompletedRun, EligibleGeneration, EvaluationJob, EvaluationStatus, GenerationJob, GenerationStatus,
    JobKey, ModelRun, NewEvaluationJob, NewPuzzle, PredictionRecord, Puzzle, PuzzleInsert, ReclaimCounts, RunMetadata,
    RunResult, RunStatus, StoredPair,
};

const EVALUATION_COLUMNS: &str = "id, puzzle_id, generation_id, provider, model, priority, status, attempts, \
     max_attempts, last_error, model_run_id, created_at, updated_at, started_at, completed_at";

const GENERATION_JOB_COLUMNS: &str = "id, concept, status, model, puzzle_id, error_message, raw_content, \
     tokens_used, time_taken_ms, created_at, updated_at";

const MODEL_RUN_COLUMNS: &str = "id, generation_id, provider, model, status, reasoning, correct_count, \
     total_count, accuracy, tokens_used, cost_usd, time_taken_ms, error_message, metadata, created_at, updated_at";

/// Message recorded on jobs reclaimed by a stale sweep.
pub const STRANDED_MESSAGE: &str = "stranded in running past the reclaim threshold";

/// Persistent store for puzzles, jobs and runs.
pub struct JobStore {
    db: Connection,
}

impl JobStore {
    /// Open or create a store at the given database path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let db = Connection::open(path)?;
        db.busy_timeout(Duration::from_secs(5))?;
        Self::init_schema(&db)?;
        log::debug!("Opened job store at {}", path.display());
        Ok(Self { db })
    }

    /// Open a throwaway in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        Self::init_schema(&db)?;
        Ok(Self { db })
    }

    fn init_schema(db: &Connection) -> Result<()> {
        db.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS puzzles (
                id TEXT PRIMARY KEY,
                idea TEXT,
                source TEXT NOT NULL,
                tags TEXT NOT NULL,
                generation_job_id TEXT,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS generations (
                id TEXT PRIMARY KEY,
                puzzle_id TEXT NOT NULL REFERENCES puzzles(id),
                reasoning TEXT NOT NULL DEFAULT '',
                tokens_used INTEGER NOT NULL DEFAULT 0,
                time_taken_ms INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS pairs (
                id TEXT PRIMARY KEY,
                generation_id TEXT NOT NULL REFERENCES generations(id),
                input TEXT NOT NULL,
                output TEXT NOT NULL,
                pair_order INTEGER NOT NULL,
                is_test_case INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS generation_jobs (
                id TEXT PRIMARY KEY,
                concept TEXT NOT NULL,
                status TEXT NOT NULL,
                model TEXT,
                puzzle_id TEXT,
                error_message TEXT,
                raw_content TEXT,
                tokens_used INTEGER NOT NULL DEFAULT 0,
                time_taken_ms INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS evaluation_jobs (
                id TEXT PRIMARY KEY,
                puzzle_id TEXT NOT NULL,
                generation_id TEXT NOT NULL REFERENCES generations(id),
                provider TEXT NOT NULL,
                model TEXT NOT NULL,
                priority INTEGER NOT NULL,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL,
                last_error TEXT,
                model_run_id TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                started_at INTEGER,
                completed_at INTEGER,
                UNIQUE (generation_id, provider, model)
            );

            CREATE TABLE IF NOT EXISTS model_runs (
                id TEXT PRIMARY KEY,
                generation_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                model TEXT NOT NULL,
                status TEXT NOT NULL,
                reasoning TEXT,
                correct_count INTEGER NOT NULL DEFAULT 0,
                total_count INTEGER NOT NULL DEFAULT 0,
                accuracy REAL,
                tokens_used INTEGER NOT NULL DEFAULT 0,
                cost_usd REAL NOT NULL DEFAULT 0,
                time_taken_ms INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                metadata TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS model_predictions (
                id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL REFERENCES model_runs(id),
                pair_id TEXT NOT NULL,
                predicted TEXT,
                expected TEXT NOT NULL,
                is_correct INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_generations_puzzle ON generations(puzzle_id);
            CREATE INDEX IF NOT EXISTS idx_pairs_generation ON pairs(generation_id);
            CREATE INDEX IF NOT EXISTS idx_generation_jobs_status ON generation_jobs(status, created_at);
            CREATE INDEX IF NOT EXISTS idx_evaluation_jobs_queue ON evaluation_jobs(status, priority, created_at);
            CREATE INDEX IF NOT EXISTS idx_model_runs_generation ON model_runs(generation_id, status);
            "#,
        )?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Puzzles
    // ---------------------------------------------------------------------

    /// Write a puzzle with its first generation and pairs.
    ///
    /// Returns `Duplicate` without writing anything if the ID is taken.
    pub fn insert_puzzle(&mut self, puzzle: &NewPuzzle) -> Result<PuzzleInsert> {
        let tx = self.db.transaction()?;
        let outcome = Self::insert_puzzle_tx(&tx, puzzle)?;
        tx.commit()?;
        Ok(outcome)
    }

    fn insert_puzzle_tx(tx: &Transaction<'_>, puzzle: &NewPuzzle) -> Result<PuzzleInsert> {
        let now = now_ms();
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO puzzles (id, idea, source, tags, generation_job_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                puzzle.id,
                puzzle.idea,
                puzzle.source,
                serde_json::to_string(&puzzle.tags)?,
                puzzle.generation_job_id,
                now,
            ],
        )?;
        if inserted == 0 {
            return Ok(PuzzleInsert::Duplicate);
        }

        let generation_id = generate_id("gen");
        tx.execute(
            "INSERT INTO generations (id, puzzle_id, reasoning, tokens_used, time_taken_ms, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                generation_id,
                puzzle.id,
                puzzle.reasoning,
                puzzle.tokens_used as i64,
                puzzle.time_taken_ms as i64,
                now,
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO pairs (id, generation_id, input, output, pair_order, is_test_case)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for pair in &puzzle.pairs {
                stmt.execute(params![
                    generate_id("pair"),
                    generation_id,
                    serde_json::to_string(&pair.input)?,
                    serde_json::to_string(&pair.output)?,
                    pair.order,
                    pair.is_test_case,
                ])?;
            }
        }

        Ok(PuzzleInsert::Created { generation_id })
    }

    pub fn puzzle_exists(&self, id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .db
            .query_row("SELECT 1 FROM puzzles WHERE id = ?1", [id], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    pub fn get_puzzle(&self, id: &str) -> Result<Option<Puzzle>> {
        let puzzle = self
            .db
            .query_row(
                "SELECT id, idea, source, tags, generation_job_id, created_at FROM puzzles WHERE id = ?1",
                [id],
                |row| {
                    Ok(Puzzle {
                        id: row.get(0)?,
                        idea: row.get(1)?,
                        source: row.get(2)?,
                        tags: json_column(row, 3)?,
                        generation_job_id: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(puzzle)
    }

    /// Most recent generation of a puzzle.
    pub fn latest_generation_id(&self, puzzle_id: &str) -> Result<Option<String>> {
        let id = self
            .db
            .query_row(
                "SELECT id FROM generations WHERE puzzle_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                [puzzle_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Pairs of a generation in ascending order.
    pub fn generation_pairs(&self, generation_id: &str) -> Result<Vec<StoredPair>> {
        let mut stmt = self.db.prepare(
            "SELECT id, generation_id, input, output, pair_order, is_test_case
             FROM pairs WHERE generation_id = ?1 ORDER BY pair_order, rowid",
        )?;
        let rows = stmt.query_map([generation_id], |row| {
            Ok(StoredPair {
                id: row.get(0)?,
                generation_id: row.get(1)?,
                pair: Pair {
                    input: json_column(row, 2)?,
                    output: json_column(row, 3)?,
                    order: row.get(4)?,
                    is_test_case: row.get(5)?,
                },
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Generations with at least one test-case pair, oldest first.
    ///
    /// With a non-empty `tags` filter only generations whose puzzle carries
    /// at least one of the tags are returned.
    pub fn eligible_generations(&self, tags: &[String]) -> Result<Vec<EligibleGeneration>> {
        let mut stmt = self.db.prepare(
            "SELECT g.id, g.puzzle_id, p.tags
             FROM generations g JOIN puzzles p ON p.id = g.puzzle_id
             WHERE EXISTS (SELECT 1 FROM pairs x WHERE x.generation_id = g.id AND x.is_test_case = 1)
             ORDER BY g.created_at, g.rowid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(EligibleGeneration {
                generation_id: row.get(0)?,
                puzzle_id: row.get(1)?,
                tags: json_column(row, 2)?,
            })
        })?;

        let mut generations = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        if !tags.is_empty() {
            generations.retain(|g| g.tags.iter().any(|t| tags.contains(t)));
        }
        Ok(generations)
    }

    pub fn count_eligible_generations(&self) -> Result<usize> {
        let count: i64 = self.db.query_row(
            "SELECT COUNT(*) FROM generations g
             WHERE EXISTS (SELECT 1 FROM pairs x WHERE x.generation_id = g.id AND x.is_test_case = 1)",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ---------------------------------------------------------------------
    // Evaluation jobs
    // ---------------------------------------------------------------------

    /// Insert one evaluation job.
    ///
    /// Returns the new ID, or `None` when the `(generation, provider, model)`
    /// tuple already exists.
    pub fn insert_evaluation_job(&mut self, job: &NewEvaluationJob) -> Result<Option<String>> {
        let id = generate_id("ej");
        let now = now_ms();
        let result = self.db.execute(
            "INSERT INTO evaluation_jobs
             (id, puzzle_id, generation_id, provider, model, priority, status, attempts, max_attempts,
              created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'queued', 0, ?7, ?8, ?8)",
            params![
                id,
                job.puzzle_id,
                job.generation_id,
                job.target.provider.as_str(),
                job.target.model,
                job.priority,
                job.max_attempts,
                now,
            ],
        );

        match result {
            Ok(_) => Ok(Some(id)),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Bulk insert, silently skipping tuples that already exist.
    ///
    /// Returns the number of rows actually written.
    pub fn insert_evaluation_jobs(&mut self, jobs: &[NewEvaluationJob]) -> Result<usize> {
        let now = now_ms();
        let tx = self.db.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO evaluation_jobs
                 (id, puzzle_id, generation_id, provider, model, priority, status, attempts, max_attempts,
                  created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'queued', 0, ?7, ?8, ?8)",
            )?;
            for job in jobs {
                inserted += stmt.execute(params![
                    generate_id("ej"),
                    job.puzzle_id,
                    job.generation_id,
                    job.target.provider.as_str(),
                    job.target.model,
                    job.priority,
                    job.max_attempts,
                    now,
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Tuples that are queued, running or completed.
    pub fn active_job_keys(&self) -> Result<HashSet<JobKey>> {
        let mut stmt = self.db.prepare(
            "SELECT generation_id, provider, model FROM evaluation_jobs
             WHERE status IN ('queued', 'running', 'completed')",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(JobKey {
                generation_id: row.get(0)?,
                provider: parse_column(row, 1)?,
                model: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<HashSet<_>>>()?)
    }

    /// All completed model runs, oldest first.
    pub fn completed_runs(&self) -> Result<Vec<CompletedRun>> {
        let mut stmt = self.db.prepare(
            "SELECT generation_id, provider, model, accuracy FROM model_runs
             WHERE status = 'completed' ORDER BY created_at, rowid",
        )?;
        let rows = stmt.query_map([], |row| {
            let accuracy: Option<f64> = row.get(3)?;
            Ok(CompletedRun {
                generation_id: row.get(0)?,
                target: ModelTarget::new(parse_column::<Provider>(row, 1)?, row.get::<_, String>(2)?),
                accuracy: accuracy.unwrap_or(0.0),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Queued jobs with attempts left, by priority then age.
    pub fn fetch_queued_evaluation_jobs(&self, limit: usize) -> Result<Vec<EvaluationJob>> {
        let sql = format!(
            "SELECT {} FROM evaluation_jobs
             WHERE status = 'queued' AND attempts < max_attempts
             ORDER BY priority, created_at, rowid LIMIT ?1",
            EVALUATION_COLUMNS
        );
        let mut stmt = self.db.prepare(&sql)?;
        let rows = stmt.query_map([limit as i64], evaluation_job_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_evaluation_job(&self, id: &str) -> Result<Option<EvaluationJob>> {
        let sql = format!("SELECT {} FROM evaluation_jobs WHERE id = ?1", EVALUATION_COLUMNS);
        let job = self.db.query_row(&sql, [id], evaluation_job_from_row).optional()?;
        Ok(job)
    }

    /// Every job for a generation, oldest first.
    pub fn evaluation_jobs_for_generation(&self, generation_id: &str) -> Result<Vec<EvaluationJob>> {
        let sql = format!(
            "SELECT {} FROM evaluation_jobs WHERE generation_id = ?1 ORDER BY created_at, rowid",
            EVALUATION_COLUMNS
        );
        let mut stmt = self.db.prepare(&sql)?;
        let rows = stmt.query_map([generation_id], evaluation_job_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Permanently skip a queued job.
    pub fn skip_evaluation_job(&mut self, id: &str, reason: &str) -> Result<bool> {
        let now = now_ms();
        let changed = self.db.execute(
            "UPDATE evaluation_jobs SET status = 'skipped', last_error = ?1, completed_at = ?2, updated_at = ?2
             WHERE id = ?3 AND status = 'queued'",
            params![reason, now, id],
        )?;
        Ok(changed == 1)
    }

    /// Claim a queued job and open its `running` model run.
    ///
    /// The claim moves the job from `queued` to `running` and counts the
    /// attempt. Returns the new run ID, or `None` if the job was not queued
    /// (or out of attempts) at the time of the update, so two workers can
    /// never both claim it. Claim, run and link commit together.
    pub fn claim_and_start_run(&mut self, job: &EvaluationJob, metadata: &RunMetadata) -> Result<Option<String>> {
        let run_id = generate_id("run");
        let now = now_ms();
        let tx = self.db.transaction()?;

        let claimed = tx.execute(
            "UPDATE evaluation_jobs
             SET status = 'running', attempts = attempts + 1, started_at = ?1, updated_at = ?1
             WHERE id = ?2 AND status = 'queued' AND attempts < max_attempts",
            params![now, job.id],
        )?;
        if claimed != 1 {
            return Ok(None);
        }

        tx.execute(
            "INSERT INTO model_runs (id, generation_id, provider, model, status, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'running', ?5, ?6, ?6)",
            params![
                run_id,
                job.generation_id,
                job.provider.as_str(),
                job.model,
                serde_json::to_string(metadata)?,
                now,
            ],
        )?;
        tx.execute(
            "UPDATE evaluation_jobs SET model_run_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![run_id, now, job.id],
        )?;

        tx.commit()?;
        Ok(Some(run_id))
    }

    /// Record a scored run and complete its job in one transaction.
    ///
    /// Returns false, writing nothing, if the job is no longer `running`
    /// (reclaimed while the model call was in flight).
    pub fn complete_evaluation(&mut self, job_id: &str, run_id: &str, result: &RunResult) -> Result<bool> {
        let now = now_ms();
        let tx = self.db.transaction()?;

        tx.execute(
            "UPDATE model_runs
             SET status = 'completed', reasoning = ?1, correct_count = ?2, total_count = ?3, accuracy = ?4,
                 tokens_used = ?5, cost_usd = ?6, time_taken_ms = ?7, updated_at = ?8
             WHERE id = ?9",
            params![
                result.reasoning,
                result.correct_count,
                result.total_count,
                result.accuracy,
                result.tokens_used as i64,
                result.cost_usd,
                result.time_taken_ms as i64,
                now,
                run_id,
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO model_predictions (id, run_id, pair_id, predicted, expected, is_correct)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for prediction in &result.predictions {
                let predicted = prediction.predicted.as_ref().map(serde_json::to_string).transpose()?;
                stmt.execute(params![
                    generate_id("pred"),
                    run_id,
                    prediction.pair_id,
                    predicted,
                    serde_json::to_string(&prediction.expected)?,
                    prediction.is_correct,
                ])?;
            }
        }

        let changed = tx.execute(
            "UPDATE evaluation_jobs
             SET status = 'completed', model_run_id = ?1, last_error = NULL, completed_at = ?2, updated_at = ?2
             WHERE id = ?3 AND status = 'running'",
            params![run_id, now, job_id],
        )?;
        if changed != 1 {
            return Ok(false);
        }

        tx.commit()?;
        Ok(true)
    }

    /// Fail a run and move its job out of `running` to `next`.
    ///
    /// Returns false, writing nothing, if the job is no longer `running`.
    pub fn fail_evaluation(
        &mut self,
        job_id: &str,
        run_id: Option<&str>,
        error: &str,
        time_taken_ms: u64,
        next: EvaluationStatus,
    ) -> Result<bool> {
        let now = now_ms();
        let completed_at = next.is_terminal().then_some(now);
        let tx = self.db.transaction()?;

        if let Some(run_id) = run_id {
            tx.execute(
                "UPDATE model_runs SET status = 'failed', error_message = ?1, time_taken_ms = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![error, time_taken_ms as i64, now, run_id],
            )?;
        }
        let changed = tx.execute(
            "UPDATE evaluation_jobs SET status = ?1, last_error = ?2, completed_at = ?3, updated_at = ?4
             WHERE id = ?5 AND status = 'running'",
            params![next.as_str(), error, completed_at, now, job_id],
        )?;
        if changed != 1 {
            return Ok(false);
        }

        tx.commit()?;
        Ok(true)
    }

    pub fn get_model_run(&self, id: &str) -> Result<Option<ModelRun>> {
        let sql = format!("SELECT {} FROM model_runs WHERE id = ?1", MODEL_RUN_COLUMNS);
        let run = self.db.query_row(&sql, [id], model_run_from_row).optional()?;
        Ok(run)
    }

    pub fn predictions_for_run(&self, run_id: &str) -> Result<Vec<PredictionRecord>> {
        let mut stmt = self.db.prepare(
            "SELECT pair_id, predicted, expected, is_correct FROM model_predictions
             WHERE run_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map([run_id], |row| {
            let predicted: Option<String> = row.get(1)?;
            Ok(PredictionRecord {
                pair_id: row.get(0)?,
                predicted: predicted
                    .map(|text| serde_json::from_str(&text).map_err(|e| conversion_error(1, e)))
                    .transpose()?,
                expected: json_column(row, 2)?,
                is_correct: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn count_evaluation_jobs(&self, status: EvaluationStatus) -> Result<usize> {
        let count: i64 = self.db.query_row(
            "SELECT COUNT(*) FROM evaluation_jobs WHERE status = ?1",
            [status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Evaluation queue depth for every status, zeros included.
    pub fn evaluation_counts_by_status(&self) -> Result<BTreeMap<EvaluationStatus, usize>> {
        let mut counts: BTreeMap<EvaluationStatus, usize> =
            EvaluationStatus::ALL.into_iter().map(|s| (s, 0)).collect();
        let mut stmt = self
            .db
            .prepare("SELECT status, COUNT(*) FROM evaluation_jobs GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((parse_column::<EvaluationStatus>(row, 0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (status, count) = row?;
            counts.insert(status, count as usize);
        }
        Ok(counts)
    }

    /// Provider x model x status counts.
    pub fn evaluation_breakdown(&self) -> Result<Vec<BreakdownRow>> {
        let mut stmt = self.db.prepare(
            "SELECT provider, model, status, COUNT(*) FROM evaluation_jobs
             GROUP BY provider, model, status ORDER BY provider, model, status",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(BreakdownRow {
                provider: row.get(0)?,
                model: row.get(1)?,
                status: row.get(2)?,
                count: row.get::<_, i64>(3)? as usize,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ---------------------------------------------------------------------
    // Generation jobs
    // ---------------------------------------------------------------------

    pub fn insert_generation_job(&mut self, concept: &str) -> Result<String> {
        let id = generate_id("job");
        let now = now_ms();
        self.db.execute(
            "INSERT INTO generation_jobs (id, concept, status, created_at, updated_at)
             VALUES (?1, ?2, 'pending', ?3, ?3)",
            params![id, concept, now],
        )?;
        Ok(id)
    }

    /// Concepts of the most recent jobs, newest first.
    pub fn recent_concepts(&self, limit: usize) -> Result<Vec<String>> {
        let mut stmt = self
            .db
            .prepare("SELECT concept FROM generation_jobs ORDER BY created_at DESC, rowid DESC LIMIT ?1")?;
        let rows = stmt.query_map([limit as i64], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
    }

    /// Every concept ever queued, oldest first.
    pub fn all_concepts(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .db
            .prepare("SELECT concept FROM generation_jobs ORDER BY created_at, rowid")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
    }

    /// Pending jobs, oldest first.
    pub fn fetch_pending_generation_jobs(&self, limit: usize) -> Result<Vec<GenerationJob>> {
        let sql = format!(
            "SELECT {} FROM generation_jobs WHERE status = 'pending' ORDER BY created_at, rowid LIMIT ?1",
            GENERATION_JOB_COLUMNS
        );
        let mut stmt = self.db.prepare(&sql)?;
        let rows = stmt.query_map([limit as i64], generation_job_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_generation_job(&self, id: &str) -> Result<Option<GenerationJob>> {
        let sql = format!("SELECT {} FROM generation_jobs WHERE id = ?1", GENERATION_JOB_COLUMNS);
        let job = self.db.query_row(&sql, [id], generation_job_from_row).optional()?;
        Ok(job)
    }

    /// Move a pending job to `running` under the given model label.
    pub fn claim_generation_job(&mut self, id: &str, model_label: &str) -> Result<bool> {
        let changed = self.db.execute(
            "UPDATE generation_jobs SET status = 'running', model = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'pending'",
            params![model_label, now_ms(), id],
        )?;
        Ok(changed == 1)
    }

    /// Return a running job to `pending`, keeping the error for reference.
    pub fn release_generation_job(&mut self, id: &str, error: &str) -> Result<bool> {
        let changed = self.db.execute(
            "UPDATE generation_jobs SET status = 'pending', error_message = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'running'",
            params![error, now_ms(), id],
        )?;
        Ok(changed == 1)
    }

    pub fn fail_generation_job(
        &mut self,
        id: &str,
        error: &str,
        raw_content: Option<&str>,
        time_taken_ms: u64,
    ) -> Result<bool> {
        let changed = self.db.execute(
            "UPDATE generation_jobs
             SET status = 'failed', error_message = ?1, raw_content = ?2, time_taken_ms = ?3, updated_at = ?4
             WHERE id = ?5 AND status = 'running'",
            params![error, raw_content, time_taken_ms as i64, now_ms(), id],
        )?;
        Ok(changed == 1)
    }

    /// Complete a job whose output matched an existing puzzle.
    pub fn complete_generation_job_existing(
        &mut self,
        id: &str,
        puzzle_id: &str,
        tokens_used: u64,
        time_taken_ms: u64,
    ) -> Result<bool> {
        let changed = self.db.execute(
            "UPDATE generation_jobs
             SET status = 'completed', puzzle_id = ?1, tokens_used = ?2, time_taken_ms = ?3, updated_at = ?4
             WHERE id = ?5 AND status = 'running'",
            params![puzzle_id, tokens_used as i64, time_taken_ms as i64, now_ms(), id],
        )?;
        Ok(changed == 1)
    }

    /// Write a generated puzzle and complete its job in one transaction.
    ///
    /// If the puzzle turns out to exist already the job still completes,
    /// pointing at the existing puzzle. Returns `None`, writing nothing, if
    /// the job is no longer `running` (cancelled or reclaimed mid-call).
    pub fn complete_generation_job_with_puzzle(
        &mut self,
        id: &str,
        puzzle: &NewPuzzle,
    ) -> Result<Option<PuzzleInsert>> {
        let tx = self.db.transaction()?;
        let outcome = Self::insert_puzzle_tx(&tx, puzzle)?;
        let changed = tx.execute(
            "UPDATE generation_jobs
             SET status = 'completed', puzzle_id = ?1, tokens_used = ?2, time_taken_ms = ?3, updated_at = ?4
             WHERE id = ?5 AND status = 'running'",
            params![
                puzzle.id,
                puzzle.tokens_used as i64,
                puzzle.time_taken_ms as i64,
                now_ms(),
                id,
            ],
        )?;
        if changed != 1 {
            return Ok(None);
        }
        tx.commit()?;
        Ok(Some(outcome))
    }

    /// Cancel a pending or running job. Terminal jobs are left alone.
    pub fn cancel_generation_job(&mut self, id: &str) -> Result<bool> {
        let changed = self.db.execute(
            "UPDATE generation_jobs SET status = 'cancelled', updated_at = ?1
             WHERE id = ?2 AND status IN ('pending', 'running')",
            params![now_ms(), id],
        )?;
        Ok(changed == 1)
    }

    pub fn count_generation_jobs(&self, status: GenerationStatus) -> Result<usize> {
        let count: i64 = self.db.query_row(
            "SELECT COUNT(*) FROM generation_jobs WHERE status = ?1",
            [status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Generation queue depth for every status, zeros included.
    pub fn generation_counts_by_status(&self) -> Result<BTreeMap<GenerationStatus, usize>> {
        let mut counts: BTreeMap<GenerationStatus, usize> =
            GenerationStatus::ALL.into_iter().map(|s| (s, 0)).collect();
        let mut stmt = self
            .db
            .prepare("SELECT status, COUNT(*) FROM generation_jobs GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((parse_column::<GenerationStatus>(row, 0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (status, count) = row?;
            counts.insert(status, count as usize);
        }
        Ok(counts)
    }

    // ---------------------------------------------------------------------
    // Reclamation
    // ---------------------------------------------------------------------

    /// Reclaim jobs left `running` since before `stale_before` (epoch ms).
    ///
    /// Evaluation jobs with attempts left go back to `queued`, the rest to
    /// `failed`. Their dangling runs are failed. Generation jobs go back to
    /// `pending`.
    pub fn reclaim_stale(&mut self, stale_before: i64) -> Result<ReclaimCounts> {
        let now = now_ms();
        let tx = self.db.transaction()?;

        tx.execute(
            "UPDATE model_runs SET status = 'failed', error_message = ?1, updated_at = ?2
             WHERE status = 'running' AND updated_at < ?3",
            params![STRANDED_MESSAGE, now, stale_before],
        )?;

        let evaluation_failed = tx.execute(
            "UPDATE evaluation_jobs SET status = 'failed', last_error = ?1, completed_at = ?2, updated_at = ?2
             WHERE status = 'running' AND updated_at < ?3 AND attempts >= max_attempts",
            params![STRANDED_MESSAGE, now, stale_before],
        )?;
        let evaluation_requeued = tx.execute(
            "UPDATE evaluation_jobs SET status = 'queued', last_error = ?1, updated_at = ?2
             WHERE status = 'running' AND updated_at < ?3",
            params![STRANDED_MESSAGE, now, stale_before],
        )?;
        let generation_requeued = tx.execute(
            "UPDATE generation_jobs SET status = 'pending', error_message = ?1, updated_at = ?2
             WHERE status = 'running' AND updated_at < ?3",
            params![STRANDED_MESSAGE, now, stale_before],
        )?;

        tx.commit()?;
        Ok(ReclaimCounts {
            evaluation_requeued,
            evaluation_failed,
            generation_requeued,
        })
    }
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parse_column<T: FromStr<Err = String>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| conversion_error(idx, e))
}

fn evaluation_job_from_row(row: &Row<'_>) -> rusqlite::Result<EvaluationJob> {
    Ok(EvaluationJob {
        id: row.get(0)?,
        puzzle_id: row.get(1)?,
        generation_id: row.get(2)?,
        provider: parse_column(row, 3)?,
        model: row.get(4)?,
        priority: row.get(5)?,
        status: parse_column(row, 6)?,
        attempts: row.get(7)?,
        max_attempts: row.get(8)?,
        last_error: row.get(9)?,
        model_run_id: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
        started_at: row.get(13)?,
        completed_at: row.get(14)?,
    })
}

fn generation_job_from_row(row: &Row<'_>) -> rusqlite::Result<GenerationJob> {
    Ok(GenerationJob {
        id: row.get(0)?,
        concept: row.get(1)?,
        status: parse_column(row, 2)?,
        model: row.get(3)?,
        puzzle_id: row.get(4)?,
        error_message: row.get(5)?,
        raw_content: row.get(6)?,
        tokens_used: row.get::<_, i64>(7)? as u64,
        time_taken_ms: row.get::<_, i64>(8)? as u64,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn model_run_from_row(row: &Row<'_>) -> rusqlite::Result<ModelRun> {
    Ok(ModelRun {
        id: row.get(0)?,
        generation_id: row.get(1)?,
        provider: parse_column(row, 2)?,
        model: row.get(3)?,
        status: parse_column::<RunStatus>(row, 4)?,
        reasoning: row.get(5)?,
        correct_count: row.get(6)?,
        total_count: row.get(7)?,
        accuracy: row.get(8)?,
        tokens_used: row.get::<_, i64>(9)? as u64,
        cost_usd: row.get(10)?,
        time_taken_ms: row.get::<_, i64>(11)? as u64,
        error_message: row.get(12)?,
        metadata: json_column(row, 13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::records::{PRIORITY_CHEAP, PRIORITY_ESCALATION};
    use tempfile::TempDir;

    fn sample_puzzle(id: &str, tags: &[&str], with_test_case: bool) -> NewPuzzle {
        let mut pairs = vec![
            Pair::new(vec![vec![1, 0]], vec![vec![0, 1]], 0),
            Pair::new(vec![vec![2, 0]], vec![vec![0, 2]], 1),
            Pair::new(vec![vec![3, 0]], vec![vec![0, 3]], 2),
        ];
        if with_test_case {
            pairs[2].is_test_case = true;
        }
        NewPuzzle {
            id: id.to_string(),
            idea: Some("mirror".to_string()),
            source: "test".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            generation_job_id: None,
            pairs,
            reasoning: String::new(),
            tokens_used: 0,
            time_taken_ms: 0,
        }
    }

    fn seed_generation(store: &mut JobStore, id: &str) -> String {
        match store.insert_puzzle(&sample_puzzle(id, &["training"], true)).unwrap() {
            PuzzleInsert::Created { generation_id } => generation_id,
            PuzzleInsert::Duplicate => panic!("unexpected duplicate"),
        }
    }

    fn metadata() -> RunMetadata {
        RunMetadata {
            temperature: 0.3,
            max_tokens: 4000,
            source: "auto-eval".to_string(),
        }
    }

    /// Claim by ID, returning the opened run.
    fn claim(store: &mut JobStore, id: &str) -> Option<String> {
        let job = store.get_evaluation_job(id).unwrap().unwrap();
        store.claim_and_start_run(&job, &metadata()).unwrap()
    }

    fn scored_run() -> RunResult {
        RunResult {
            reasoning: "mirror".to_string(),
            predictions: vec![PredictionRecord {
                pair_id: "pair-x".to_string(),
                predicted: Some(vec![vec![0, 3]]),
                expected: vec![vec![0, 3]],
                is_correct: true,
            }],
            correct_count: 1,
            total_count: 1,
            accuracy: 1.0,
            tokens_used: 120,
            cost_usd: 0.0,
            time_taken_ms: 50,
        }
    }

    fn new_job(generation_id: &str, provider: Provider, model: &str, priority: u8) -> NewEvaluationJob {
        NewEvaluationJob {
            puzzle_id: "p1".to_string(),
            generation_id: generation_id.to_string(),
            target: ModelTarget::new(provider, model),
            priority,
            max_attempts: 3,
        }
    }

    #[test]
    fn test_open_creates_database_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("gridbench.db");
        let _store = JobStore::open(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_store_persists_across_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("gridbench.db");
        {
            let mut store = JobStore::open(&path).unwrap();
            store.insert_generation_job("rotate shapes").unwrap();
        }
        let store = JobStore::open(&path).unwrap();
        assert_eq!(store.count_generation_jobs(GenerationStatus::Pending).unwrap(), 1);
    }

    #[test]
    fn test_insert_puzzle_and_duplicate() {
        let mut store = JobStore::open_in_memory().unwrap();
        let puzzle = sample_puzzle("p1", &["ConceptARC"], true);
        assert!(matches!(store.insert_puzzle(&puzzle).unwrap(), PuzzleInsert::Created { .. }));
        assert_eq!(store.insert_puzzle(&puzzle).unwrap(), PuzzleInsert::Duplicate);
        assert!(store.puzzle_exists("p1").unwrap());

        let stored = store.get_puzzle("p1").unwrap().unwrap();
        assert_eq!(stored.tags, vec!["ConceptARC".to_string()]);
    }

    #[test]
    fn test_generation_pairs_ordered() {
        let mut store = JobStore::open_in_memory().unwrap();
        let generation_id = seed_generation(&mut store, "p1");
        let pairs = store.generation_pairs(&generation_id).unwrap();
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs.iter().map(|p| p.pair.order).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(pairs[2].pair.is_test_case);
        assert_eq!(pairs[0].pair.input, vec![vec![1, 0]]);
    }

    #[test]
    fn test_eligible_generations_require_test_case() {
        let mut store = JobStore::open_in_memory().unwrap();
        store.insert_puzzle(&sample_puzzle("with", &["training"], true)).unwrap();
        store.insert_puzzle(&sample_puzzle("without", &["training"], false)).unwrap();

        let eligible = store.eligible_generations(&[]).unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].puzzle_id, "with");
        assert_eq!(store.count_eligible_generations().unwrap(), 1);
    }

    #[test]
    fn test_eligible_generations_tag_filter() {
        let mut store = JobStore::open_in_memory().unwrap();
        store.insert_puzzle(&sample_puzzle("a", &["ARC-AGI 2024"], true)).unwrap();
        store.insert_puzzle(&sample_puzzle("b", &["Community"], true)).unwrap();

        let filtered = store.eligible_generations(&["Community".to_string()]).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].puzzle_id, "b");
    }

    #[test]
    fn test_evaluation_job_uniqueness() {
        let mut store = JobStore::open_in_memory().unwrap();
        let generation_id = seed_generation(&mut store, "p1");
        let job = new_job(&generation_id, Provider::Groq, "llama-3.1-8b-instant", PRIORITY_CHEAP);

        assert!(store.insert_evaluation_job(&job).unwrap().is_some());
        assert!(store.insert_evaluation_job(&job).unwrap().is_none());
        assert_eq!(store.count_evaluation_jobs(EvaluationStatus::Queued).unwrap(), 1);
    }

    #[test]
    fn test_bulk_insert_skips_duplicates() {
        let mut store = JobStore::open_in_memory().unwrap();
        let generation_id = seed_generation(&mut store, "p1");
        let a = new_job(&generation_id, Provider::Groq, "llama-3.1-8b-instant", PRIORITY_CHEAP);
        let b = new_job(&generation_id, Provider::Gemini, "gemini-2.0-flash", PRIORITY_CHEAP);

        assert_eq!(store.insert_evaluation_jobs(&[a.clone()]).unwrap(), 1);
        assert_eq!(store.insert_evaluation_jobs(&[a, b.clone(), b]).unwrap(), 1);
        assert_eq!(store.count_evaluation_jobs(EvaluationStatus::Queued).unwrap(), 2);
    }

    #[test]
    fn test_fetch_orders_by_priority_then_age() {
        let mut store = JobStore::open_in_memory().unwrap();
        let generation_id = seed_generation(&mut store, "p1");
        store
            .insert_evaluation_job(&new_job(&generation_id, Provider::Mistral, "mistral-large-latest", PRIORITY_ESCALATION))
            .unwrap();
        store
            .insert_evaluation_job(&new_job(&generation_id, Provider::Groq, "llama-3.1-8b-instant", PRIORITY_CHEAP))
            .unwrap();
        store
            .insert_evaluation_job(&new_job(&generation_id, Provider::Gemini, "gemini-2.0-flash", PRIORITY_CHEAP))
            .unwrap();

        let jobs = store.fetch_queued_evaluation_jobs(10).unwrap();
        let models: Vec<&str> = jobs.iter().map(|j| j.model.as_str()).collect();
        assert_eq!(models, vec!["llama-3.1-8b-instant", "gemini-2.0-flash", "mistral-large-latest"]);

        assert_eq!(store.fetch_queued_evaluation_jobs(1).unwrap().len(), 1);
    }

    #[test]
    fn test_claim_is_conditional() {
        let mut store = JobStore::open_in_memory().unwrap();
        let generation_id = seed_generation(&mut store, "p1");
        let id = store
            .insert_evaluation_job(&new_job(&generation_id, Provider::Groq, "llama-3.1-8b-instant", PRIORITY_CHEAP))
            .unwrap()
            .unwrap();

        let run_id = claim(&mut store, &id).unwrap();
        assert!(claim(&mut store, &id).is_none());

        let job = store.get_evaluation_job(&id).unwrap().unwrap();
        assert_eq!(job.status, EvaluationStatus::Running);
        assert_eq!(job.attempts, 1);
        assert!(job.started_at.is_some());
        assert_eq!(job.model_run_id.as_deref(), Some(run_id.as_str()));

        let run = store.get_model_run(&run_id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.metadata, metadata());
    }

    #[test]
    fn test_failed_run_insert_leaves_job_queued() {
        let mut store = JobStore::open_in_memory().unwrap();
        let generation_id = seed_generation(&mut store, "p1");
        let id = store
            .insert_evaluation_job(&new_job(&generation_id, Provider::Groq, "llama-3.1-8b-instant", PRIORITY_CHEAP))
            .unwrap()
            .unwrap();
        let job = store.get_evaluation_job(&id).unwrap().unwrap();

        store
            .db
            .execute_batch("DROP TABLE model_predictions; DROP TABLE model_runs;")
            .unwrap();
        assert!(store.claim_and_start_run(&job, &metadata()).is_err());

        let job = store.get_evaluation_job(&id).unwrap().unwrap();
        assert_eq!(job.status, EvaluationStatus::Queued);
        assert_eq!(job.attempts, 0);
        assert!(job.started_at.is_none());
        assert!(job.model_run_id.is_none());
    }

    #[test]
    fn test_late_outcome_after_reclaim_is_rejected() {
        let mut store = JobStore::open_in_memory().unwrap();
        let generation_id = seed_generation(&mut store, "p1");
        let id = store
            .insert_evaluation_job(&new_job(&generation_id, Provider::Groq, "llama-3.1-8b-instant", PRIORITY_CHEAP))
            .unwrap()
            .unwrap();
        let run_id = claim(&mut store, &id).unwrap();
        assert_eq!(store.reclaim_stale(now_ms() + 1).unwrap().evaluation_requeued, 1);

        assert!(!store.complete_evaluation(&id, &run_id, &scored_run()).unwrap());
        assert!(
            !store
                .fail_evaluation(&id, Some(&run_id), "late", 5, EvaluationStatus::Failed)
                .unwrap()
        );

        let job = store.get_evaluation_job(&id).unwrap().unwrap();
        assert_eq!(job.status, EvaluationStatus::Queued);
        assert!(job.completed_at.is_none());
        assert_eq!(job.last_error.as_deref(), Some(STRANDED_MESSAGE));
        let run = store.get_model_run(&run_id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(store.predictions_for_run(&run_id).unwrap().is_empty());
        assert!(store.completed_runs().unwrap().is_empty());

        // The requeued job can be claimed again
        assert!(claim(&mut store, &id).is_some());
    }

    #[test]
    fn test_insert_job_for_missing_generation_is_an_error() {
        let mut store = JobStore::open_in_memory().unwrap();
        let job = new_job("no-such-generation", Provider::Groq, "llama-3.1-8b-instant", PRIORITY_CHEAP);
        assert!(store.insert_evaluation_job(&job).is_err());
        assert!(store.fetch_queued_evaluation_jobs(10).unwrap().is_empty());
    }

    #[test]
    fn test_fetch_excludes_exhausted_jobs() {
        let mut store = JobStore::open_in_memory().unwrap();
        let generation_id = seed_generation(&mut store, "p1");
        let mut job = new_job(&generation_id, Provider::Groq, "llama-3.1-8b-instant", PRIORITY_CHEAP);
        job.max_attempts = 1;
        let id = store.insert_evaluation_job(&job).unwrap().unwrap();

        let run_id = claim(&mut store, &id).unwrap();
        assert!(
            store
                .fail_evaluation(&id, Some(&run_id), "boom", 5, EvaluationStatus::Queued)
                .unwrap()
        );

        assert!(store.fetch_queued_evaluation_jobs(10).unwrap().is_empty());
        assert!(claim(&mut store, &id).is_none());
    }

    #[test]
    fn test_complete_evaluation_writes_run_and_predictions() {
        let mut store = JobStore::open_in_memory().unwrap();
        let generation_id = seed_generation(&mut store, "p1");
        let id = store
            .insert_evaluation_job(&new_job(&generation_id, Provider::Groq, "llama-3.1-8b-instant", PRIORITY_CHEAP))
            .unwrap()
            .unwrap();
        let run_id = claim(&mut store, &id).unwrap();

        let result = scored_run();
        assert!(store.complete_evaluation(&id, &run_id, &result).unwrap());

        let job = store.get_evaluation_job(&id).unwrap().unwrap();
        assert_eq!(job.status, EvaluationStatus::Completed);
        assert_eq!(job.model_run_id.as_deref(), Some(run_id.as_str()));
        assert!(job.completed_at.is_some());

        let run = store.get_model_run(&run_id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.accuracy, Some(1.0));
        assert_eq!(run.metadata, metadata());

        let predictions = store.predictions_for_run(&run_id).unwrap();
        assert_eq!(predictions, result.predictions);

        let runs = store.completed_runs().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].target.key(), "groq:llama-3.1-8b-instant");
    }

    #[test]
    fn test_active_job_keys_excludes_terminal_failures() {
        let mut store = JobStore::open_in_memory().unwrap();
        let generation_id = seed_generation(&mut store, "p1");
        let a = store
            .insert_evaluation_job(&new_job(&generation_id, Provider::Groq, "llama-3.1-8b-instant", PRIORITY_CHEAP))
            .unwrap()
            .unwrap();
        store
            .insert_evaluation_job(&new_job(&generation_id, Provider::Gemini, "gemini-2.0-flash", PRIORITY_CHEAP))
            .unwrap();
        store.skip_evaluation_job(&a, "no credential").unwrap();

        let keys = store.active_job_keys().unwrap();
        assert_eq!(keys.len(), 1);
        assert!(keys.contains(&JobKey::new(
            generation_id.clone(),
            &ModelTarget::new(Provider::Gemini, "gemini-2.0-flash")
        )));
    }

    #[test]
    fn test_counts_and_breakdown() {
        let mut store = JobStore::open_in_memory().unwrap();
        let generation_id = seed_generation(&mut store, "p1");
        let a = store
            .insert_evaluation_job(&new_job(&generation_id, Provider::Groq, "llama-3.1-8b-instant", PRIORITY_CHEAP))
            .unwrap()
            .unwrap();
        store
            .insert_evaluation_job(&new_job(&generation_id, Provider::Gemini, "gemini-2.0-flash", PRIORITY_CHEAP))
            .unwrap();
        store.skip_evaluation_job(&a, "no limits").unwrap();

        let counts = store.evaluation_counts_by_status().unwrap();
        assert_eq!(counts[&EvaluationStatus::Queued], 1);
        assert_eq!(counts[&EvaluationStatus::Skipped], 1);
        assert_eq!(counts[&EvaluationStatus::Running], 0);

        let breakdown = store.evaluation_breakdown().unwrap();
        assert_eq!(breakdown.len(), 2);
        assert_eq!(breakdown[0].provider, "gemini");
        assert_eq!(breakdown[1].status, "skipped");
    }

    #[test]
    fn test_generation_job_lifecycle() {
        let mut store = JobStore::open_in_memory().unwrap();
        let id = store.insert_generation_job("gravity").unwrap();

        assert!(store.claim_generation_job(&id, "groq/llama-3.3-70b-versatile").unwrap());
        assert!(!store.claim_generation_job(&id, "groq/llama-3.3-70b-versatile").unwrap());
        assert!(store.release_generation_job(&id, "429").unwrap());
        assert_eq!(store.fetch_pending_generation_jobs(10).unwrap().len(), 1);

        store.claim_generation_job(&id, "gemini/gemini-2.0-flash").unwrap();
        let puzzle = sample_puzzle("gen-p", &["agent"], true);
        let outcome = store.complete_generation_job_with_puzzle(&id, &puzzle).unwrap();
        assert!(matches!(outcome, Some(PuzzleInsert::Created { .. })));

        let job = store.get_generation_job(&id).unwrap().unwrap();
        assert_eq!(job.status, GenerationStatus::Completed);
        assert_eq!(job.puzzle_id.as_deref(), Some("gen-p"));
        assert_eq!(job.model.as_deref(), Some("gemini/gemini-2.0-flash"));
    }

    #[test]
    fn test_fail_generation_job_keeps_raw_content() {
        let mut store = JobStore::open_in_memory().unwrap();
        let id = store.insert_generation_job("symmetry").unwrap();
        store.claim_generation_job(&id, "groq/llama-3.3-70b-versatile").unwrap();
        assert!(store.fail_generation_job(&id, "bad json", Some("not json"), 10).unwrap());

        let job = store.get_generation_job(&id).unwrap().unwrap();
        assert_eq!(job.status, GenerationStatus::Failed);
        assert_eq!(job.raw_content.as_deref(), Some("not json"));
        assert!(job.puzzle_id.is_none());
    }

    #[test]
    fn test_cancelled_job_is_not_completed_by_late_reply() {
        let mut store = JobStore::open_in_memory().unwrap();
        let id = store.insert_generation_job("gravity").unwrap();
        assert!(store.claim_generation_job(&id, "groq/llama-3.3-70b-versatile").unwrap());
        assert!(store.cancel_generation_job(&id).unwrap());

        let mut puzzle = sample_puzzle("late-p", &["agent"], true);
        puzzle.generation_job_id = Some(id.clone());
        assert!(store.complete_generation_job_with_puzzle(&id, &puzzle).unwrap().is_none());
        assert!(!store.complete_generation_job_existing(&id, "p1", 10, 5).unwrap());

        let job = store.get_generation_job(&id).unwrap().unwrap();
        assert_eq!(job.status, GenerationStatus::Cancelled);
        assert!(job.puzzle_id.is_none());
        assert!(!store.puzzle_exists("late-p").unwrap());
    }

    #[test]
    fn test_cancel_generation_job() {
        let mut store = JobStore::open_in_memory().unwrap();
        let id = store.insert_generation_job("counting").unwrap();
        assert!(store.cancel_generation_job(&id).unwrap());
        assert!(!store.cancel_generation_job(&id).unwrap());
        assert!(!store.claim_generation_job(&id, "x/y").unwrap());
    }

    #[test]
    fn test_recent_concepts_newest_first() {
        let mut store = JobStore::open_in_memory().unwrap();
        store.insert_generation_job("first").unwrap();
        store.insert_generation_job("second").unwrap();
        assert_eq!(store.recent_concepts(1).unwrap(), vec!["second".to_string()]);
        assert_eq!(store.recent_concepts(10).unwrap().len(), 2);
    }

    #[test]
    fn test_reclaim_stale() {
        let mut store = JobStore::open_in_memory().unwrap();
        let generation_id = seed_generation(&mut store, "p1");

        let retry = store
            .insert_evaluation_job(&new_job(&generation_id, Provider::Groq, "llama-3.1-8b-instant", PRIORITY_CHEAP))
            .unwrap()
            .unwrap();
        let mut last = new_job(&generation_id, Provider::Gemini, "gemini-2.0-flash", PRIORITY_CHEAP);
        last.max_attempts = 1;
        let exhausted = store.insert_evaluation_job(&last).unwrap().unwrap();
        claim(&mut store, &retry).unwrap();
        claim(&mut store, &exhausted).unwrap();

        let gen_job = store.insert_generation_job("stuck").unwrap();
        store.claim_generation_job(&gen_job, "groq/llama").unwrap();

        // Nothing is older than an hour ago
        let none = store.reclaim_stale(now_ms() - 3_600_000).unwrap();
        assert_eq!(none, ReclaimCounts::default());

        let counts = store.reclaim_stale(now_ms() + 1).unwrap();
        assert_eq!(counts.evaluation_requeued, 1);
        assert_eq!(counts.evaluation_failed, 1);
        assert_eq!(counts.generation_requeued, 1);

        let job = store.get_evaluation_job(&retry).unwrap().unwrap();
        assert_eq!(job.status, EvaluationStatus::Queued);
        assert_eq!(job.last_error.as_deref(), Some(STRANDED_MESSAGE));
        let job = store.get_evaluation_job(&exhausted).unwrap().unwrap();
        assert_eq!(job.status, EvaluationStatus::Failed);
        assert_eq!(
            store.get_generation_job(&gen_job).unwrap().unwrap().status,
            GenerationStatus::Pending
        );
    }
}
