use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::{ModelTarget, Provider};
use crate::scheduler::RateLimits;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub store: StoreConfig,
    pub llm: LlmConfig,
    pub worker: WorkerConfig,
    pub planner: PlannerConfig,
    pub generation: GenerationConfig,
    /// Keyed by `provider:model`. Models without an entry are never called.
    pub rate_limits: BTreeMap<String, RateLimits>,
    /// Provider to the environment variable holding its API key.
    pub credentials: BTreeMap<Provider, String>,
    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("gridbench")
                .join("gridbench.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub timeout_ms: u64,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Use the streaming path where the provider supports it.
    pub stream: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 120000,
            max_tokens: 4000,
            temperature: 0.3,
            stream: false,
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub batch_size: usize,
    /// Candidates fetched per batch slot, to leave room for skips.
    pub overfetch_factor: usize,
    pub max_attempts: u32,
    pub stale_running_minutes: u64,
    pub auto_reclaim: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            overfetch_factor: 3,
            max_attempts: 3,
            stale_running_minutes: 30,
            auto_reclaim: true,
        }
    }
}

impl WorkerConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_running_minutes * 60)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub max_to_queue: usize,
    /// Earlier tags are planned first; unknown tags go last.
    pub tag_priority: Vec<String>,
    pub cheap_models: Vec<ModelTarget>,
    pub expensive_models: Vec<ModelTarget>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_to_queue: 500,
            tag_priority: [
                "ARC-AGI 2024",
                "ARC-AGI 2025",
                "ConceptARC",
                "training",
                "evaluation",
                "Community",
            ]
            .iter()
            .map(|t| t.to_string())
            .collect(),
            cheap_models: vec![
                ModelTarget::new(Provider::Groq, "llama-3.3-70b-versatile"),
                ModelTarget::new(Provider::Groq, "llama-3.1-8b-instant"),
                ModelTarget::new(Provider::Gemini, "gemini-2.0-flash"),
            ],
            expensive_models: vec![
                ModelTarget::new(Provider::Mistral, "mistral-large-latest"),
                ModelTarget::new(Provider::Cerebras, "llama-3.3-70b"),
                ModelTarget::new(Provider::Openrouter, "meta-llama/llama-3.3-70b-instruct:free"),
            ],
        }
    }
}

impl PlannerConfig {
    /// Every model the flat planner may target, cheap tier first.
    pub fn all_models(&self) -> Vec<ModelTarget> {
        self.cheap_models.iter().chain(&self.expensive_models).cloned().collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub batch_size: usize,
    /// Round-robin order for puzzle generation.
    pub models: Vec<ModelTarget>,
    /// Providers tried in turn when brainstorming concepts.
    pub concept_models: Vec<ModelTarget>,
    pub concept_batch_size: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        let models = vec![
            ModelTarget::new(Provider::Groq, "llama-3.3-70b-versatile"),
            ModelTarget::new(Provider::Gemini, "gemini-2.0-flash"),
            ModelTarget::new(Provider::Mistral, "mistral-large-latest"),
            ModelTarget::new(Provider::Cerebras, "llama-3.3-70b"),
        ];
        Self {
            batch_size: 10,
            concept_models: vec![
                models[1].clone(),
                models[0].clone(),
                models[2].clone(),
                models[3].clone(),
            ],
            models,
            concept_batch_size: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub interval_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

/// Published free-tier limits, keyed by `provider:model`.
pub fn default_rate_limits() -> BTreeMap<String, RateLimits> {
    [
        ("groq:llama-3.3-70b-versatile", 30, 1000),
        ("groq:llama-3.1-8b-instant", 30, 14400),
        ("groq:mixtral-8x7b-32768", 30, 14400),
        ("gemini:gemini-2.5-flash", 5, 20),
        ("gemini:gemini-2.0-flash", 10, 1500),
        ("gemini:gemini-1.5-flash-latest", 15, 1500),
        ("mistral:mistral-small-latest", 60, 10000),
        ("mistral:mistral-medium-latest", 60, 10000),
        ("mistral:mistral-large-latest", 60, 10000),
        ("cerebras:llama-3.3-70b", 30, 10000),
        ("cerebras:llama-3.1-8b", 30, 10000),
        ("openrouter:meta-llama/llama-3.3-70b-instruct:free", 20, 50),
        ("openrouter:google/gemma-2-9b-it:free", 20, 50),
        ("openrouter:mistralai/mistral-7b-instruct:free", 20, 50),
    ]
    .into_iter()
    .map(|(key, rpm, rpd)| (key.to_string(), RateLimits::new(rpm, rpd)))
    .collect()
}

/// Default environment variable per provider.
pub fn default_credentials() -> BTreeMap<Provider, String> {
    Provider::ALL
        .into_iter()
        .map(|p| (p, format!("{}_API_KEY", p.as_str().to_ascii_uppercase())))
        .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            store: StoreConfig::default(),
            llm: LlmConfig::default(),
            worker: WorkerConfig::default(),
            planner: PlannerConfig::default(),
            generation: GenerationConfig::default(),
            rate_limits: default_rate_limits(),
            credentials: default_credentials(),
            daemon: DaemonConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Limits for a model, if it is configured at all.
    pub fn limits_for(&self, target: &ModelTarget) -> Option<RateLimits> {
        self.rate_limits.get(&target.key()).copied()
    }
}
