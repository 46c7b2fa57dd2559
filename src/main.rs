use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use gridbench::config::Config;
use gridbench::id::now_ms;
use gridbench::import::{ImportOptions, collect_files, import_files};
use gridbench::llm::{CredentialResolver, EnvCredentials, HttpExecutor, ModelExecutor};
use gridbench::scheduler::{
    BatchCounts, BucketStatus, ConceptBrainstormer, Daemon, EvaluationWorker, FlatPlan, GenerationWorker, Planner,
    RateLimiter, Reaper, SmartPlan, TickSettings, collect_status,
};
use gridbench::store::{JobStore, SharedStore, lock_store, shared};

mod cli;

use cli::Cli;
use cli::commands::{Commands, PlanCommands};

/// Concepts shown to the brainstormer as already taken.
const RECENT_CONCEPTS: usize = 200;

fn setup_logging(config: &Config, verbose: bool) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gridbench")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("gridbench.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let level = if verbose {
        "debug".to_string()
    } else {
        config.log_level.clone().unwrap_or_else(|| "info".to_string())
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

/// Everything a handler needs, built once per process.
struct App {
    config: Config,
    store: SharedStore,
    limiter: Arc<RateLimiter>,
    executor: Arc<dyn ModelExecutor>,
    credentials: Arc<dyn CredentialResolver>,
    cancel: CancellationToken,
}

impl App {
    fn new(config: Config) -> Result<Self> {
        if let Some(parent) = config.store.path.parent() {
            fs::create_dir_all(parent).context("Failed to create store directory")?;
        }
        let store = JobStore::open(&config.store.path)
            .with_context(|| format!("Failed to open store at {}", config.store.path.display()))?;
        let executor = HttpExecutor::new(config.llm.timeout()).context("Failed to build HTTP client")?;

        Ok(Self {
            store: shared(store),
            limiter: Arc::new(RateLimiter::new()),
            executor: Arc::new(executor),
            credentials: Arc::new(EnvCredentials::new(config.credentials.clone())),
            cancel: CancellationToken::new(),
            config,
        })
    }

    fn planner(&self) -> Planner {
        Planner::new(
            self.store.clone(),
            self.credentials.clone(),
            self.config.planner.clone(),
            self.config.worker.max_attempts,
        )
    }

    fn evaluator(&self) -> EvaluationWorker {
        EvaluationWorker::new(
            self.store.clone(),
            self.limiter.clone(),
            self.executor.clone(),
            self.credentials.clone(),
            &self.config,
            self.cancel.clone(),
        )
    }

    fn generator(&self) -> GenerationWorker {
        GenerationWorker::new(
            self.store.clone(),
            self.limiter.clone(),
            self.executor.clone(),
            self.credentials.clone(),
            &self.config,
            self.cancel.clone(),
        )
    }

    fn reaper(&self) -> Reaper {
        Reaper::new(self.store.clone(), self.config.worker.stale_after())
    }

    /// Cancel in-flight work on Ctrl-C.
    fn watch_ctrl_c(&self) {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupted, stopping at the next job boundary");
                cancel.cancel();
            }
        });
    }
}

async fn run_application(cli: &Cli, app: &App) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        None => handle_status_command(app, false),
        Some(Commands::Import {
            paths,
            keep_ids,
            tags,
            source,
        }) => handle_import_command(app, paths, *keep_ids, tags, source),
        Some(Commands::Concepts { count, add }) => handle_concepts_command(app, *count, add).await,
        Some(Commands::Plan { command }) => handle_plan_command(app, command),
        Some(Commands::Drain { batch, json }) => handle_drain_command(app, *batch, *json).await,
        Some(Commands::Generate { batch, json }) => handle_generate_command(app, *batch, *json).await,
        Some(Commands::Status { json }) => handle_status_command(app, *json),
        Some(Commands::Reclaim) => handle_reclaim_command(app),
        Some(Commands::Cancel { id }) => handle_cancel_command(app, id),
        Some(Commands::Daemon { interval }) => handle_daemon_command(app, *interval).await,
    }
}

fn handle_import_command(app: &App, paths: &[String], keep_ids: bool, tags: &[String], source: &str) -> Result<()> {
    let files = collect_files(paths)?;
    if files.is_empty() {
        println!("{}", "No puzzle files found".yellow());
        return Ok(());
    }
    println!("{} {} files", "Importing:".green(), files.len());

    let options = ImportOptions {
        keep_ids,
        tags: tags.to_vec(),
        source: source.to_string(),
    };
    let report = import_files(&app.store, &files, &options)?;

    println!("  imported:   {}", report.imported.to_string().green());
    println!("  duplicates: {}", report.duplicates);
    if !report.failed.is_empty() {
        println!("  failed:     {}", report.failed.len().to_string().red());
        for failure in &report.failed {
            println!("    {} {}", failure.name.red(), failure.reason);
        }
    }
    Ok(())
}

async fn handle_concepts_command(app: &App, count: usize, add: &[String]) -> Result<()> {
    let concepts = if add.is_empty() {
        let existing = lock_store(&app.store)?.recent_concepts(RECENT_CONCEPTS)?;
        app.watch_ctrl_c();
        let brainstormer = ConceptBrainstormer::new(
            app.limiter.clone(),
            app.executor.clone(),
            app.credentials.clone(),
            &app.config,
            app.cancel.clone(),
        );
        let report = brainstormer.brainstorm(count, &existing).await?;
        println!(
            "{} {} concepts from {}",
            "Brainstormed:".green(),
            report.concepts.len(),
            report.providers.join(", ")
        );
        if report.failed_batches > 0 {
            println!("  {} batches failed", report.failed_batches.to_string().yellow());
        }
        report.concepts
    } else {
        add.to_vec()
    };

    let report = app.planner().enqueue_concepts(&concepts)?;
    println!(
        "{} {} generation jobs ({} duplicates skipped)",
        "Queued:".green(),
        report.created,
        report.skipped_duplicates
    );
    Ok(())
}

fn handle_plan_command(app: &App, command: &PlanCommands) -> Result<()> {
    info!("Planning: {:?}", command);
    let planner = app.planner();

    match command {
        PlanCommands::Smart { max, tags, priority } => {
            let plan = SmartPlan {
                max_to_queue: max.unwrap_or(app.config.planner.max_to_queue),
                tags: tags.clone(),
                only_priority: *priority,
            };
            let report = planner.enqueue_smart(&plan)?;
            println!(
                "{} {} jobs from {} generations ({} already covered)",
                "Queued:".green(),
                report.queued,
                report.total_generations_considered,
                report.skipped_existing
            );
            println!("  cheap:     {}", report.available_cheap.join(", "));
            println!("  expensive: {}", report.available_expensive.join(", "));
            for (tag, count) in &report.tag_breakdown {
                println!("  {:<20} {}", tag, count);
            }
        }
        PlanCommands::Flat {
            models,
            providers,
            priority,
            tags,
        } => {
            let plan = FlatPlan {
                models: models.clone(),
                priority: *priority,
                providers: providers.clone(),
                tags: tags.clone(),
            };
            let report = planner.enqueue_flat(&plan)?;
            println!(
                "{} {} jobs, {} already present ({} generations x {} models)",
                "Queued:".green(),
                report.queued,
                report.skipped,
                report.total_generations,
                report.models_per_generation
            );
        }
    }
    Ok(())
}

fn print_counts(counts: &BatchCounts) {
    println!("  processed:    {}", counts.processed);
    println!("  succeeded:    {}", counts.succeeded.to_string().green());
    println!("  failed:       {}", counts.failed.to_string().red());
    println!("  rate limited: {}", counts.rate_limited.to_string().yellow());
    println!("  skipped:      {}", counts.skipped);
}

fn print_rate_limits(buckets: &BTreeMap<String, BucketStatus>) {
    if buckets.is_empty() {
        return;
    }
    println!("{}", "Rate limits:".cyan());
    let now = now_ms();
    for (key, bucket) in buckets {
        let backoff = if bucket.backoff_until > now {
            format!(" backoff {}s", (bucket.backoff_until - now) / 1000).yellow().to_string()
        } else {
            String::new()
        };
        println!(
            "  {:<50} {:>4}/min {:>6}/day{}",
            key, bucket.minute_tokens, bucket.day_tokens, backoff
        );
    }
}

async fn handle_drain_command(app: &App, batch: Option<usize>, json: bool) -> Result<()> {
    app.watch_ctrl_c();
    let report = app.evaluator().drain(batch.unwrap_or(app.config.worker.batch_size)).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    if let Some(reclaimed) = &report.reclaimed {
        let total = reclaimed.evaluation_requeued + reclaimed.evaluation_failed + reclaimed.generation_requeued;
        if total > 0 {
            println!("{} {} stale jobs", "Reclaimed:".yellow(), total);
        }
    }
    println!("{}", "Evaluation batch:".green());
    print_counts(&report.counts);
    println!("  remaining:    {}", report.remaining_queued);
    print_rate_limits(&report.rate_limits);
    Ok(())
}

async fn handle_generate_command(app: &App, batch: Option<usize>, json: bool) -> Result<()> {
    app.watch_ctrl_c();
    let report = app
        .generator()
        .drain(batch.unwrap_or(app.config.generation.batch_size))
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    let counts = &report.counts;
    println!("{}", "Generation batch:".green());
    println!("  processed:    {}", counts.processed);
    println!("  succeeded:    {}", counts.succeeded.to_string().green());
    println!("  duplicates:   {}", counts.duplicates);
    println!("  failed:       {}", counts.failed.to_string().red());
    println!("  rate limited: {}", counts.rate_limited.to_string().yellow());
    println!("  remaining:    {}", report.remaining_pending);
    print_rate_limits(&report.rate_limits);
    Ok(())
}

fn handle_status_command(app: &App, json: bool) -> Result<()> {
    let status = collect_status(&app.store, &app.limiter, app.credentials.as_ref())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("{}", "Evaluation jobs:".cyan());
    for (state, count) in &status.evaluation {
        println!("  {:<10} {}", state.as_str(), count);
    }
    println!("{}", "Generation jobs:".cyan());
    for (state, count) in &status.generation {
        println!("  {:<10} {}", state.as_str(), count);
    }
    println!("{} {}", "Eligible generations:".cyan(), status.eligible_generations);

    let providers: Vec<&str> = status.configured_providers.iter().map(|p| p.as_str()).collect();
    if providers.is_empty() {
        println!("{} {}", "Providers:".cyan(), "none configured".red());
    } else {
        println!("{} {}", "Providers:".cyan(), providers.join(", "));
    }

    if !status.breakdown.is_empty() {
        println!("{}", "By model:".cyan());
        for row in &status.breakdown {
            println!(
                "  {:<12} {:<45} {:<10} {}",
                row.provider, row.model, row.status, row.count
            );
        }
    }
    print_rate_limits(&status.rate_limits);
    Ok(())
}

fn handle_reclaim_command(app: &App) -> Result<()> {
    let counts = app.reaper().sweep()?;
    println!("{}", "Reclaimed:".green());
    println!("  evaluation requeued: {}", counts.evaluation_requeued);
    println!("  evaluation failed:   {}", counts.evaluation_failed);
    println!("  generation requeued: {}", counts.generation_requeued);
    Ok(())
}

fn handle_cancel_command(app: &App, id: &str) -> Result<()> {
    info!("Canceling generation job: {}", id);
    if lock_store(&app.store)?.cancel_generation_job(id)? {
        println!("{} {}", "Cancelled:".red(), id);
    } else {
        println!("{} {} is missing or already finished", "Unchanged:".yellow(), id);
    }
    Ok(())
}

async fn handle_daemon_command(app: &App, interval: Option<u64>) -> Result<()> {
    let interval = Duration::from_secs(interval.unwrap_or(app.config.daemon.interval_secs).max(1));
    let settings = TickSettings {
        plan: SmartPlan {
            max_to_queue: app.config.planner.max_to_queue,
            tags: Vec::new(),
            only_priority: None,
        },
        evaluation_batch: app.config.worker.batch_size,
        generation_batch: app.config.generation.batch_size,
    };
    let daemon = Daemon::new(app.reaper(), app.planner(), app.evaluator(), app.generator(), settings);

    println!(
        "{} every {}s, Ctrl-C to stop",
        "Running daemon".cyan(),
        interval.as_secs()
    );
    app.watch_ctrl_c();
    daemon.run(interval, app.cancel.clone()).await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging once the level is known
    setup_logging(&config, cli.is_verbose()).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    let app = App::new(config)?;

    // Run the main application logic
    run_application(&cli, &app).await.context("Application failed")?;

    Ok(())
}
