//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - import: load ARC puzzle files into the store
//! - concepts: brainstorm or add generation concepts
//! - plan: queue evaluation jobs (smart or flat)
//! - drain / generate: run one evaluation or generation batch
//! - status / reclaim / cancel: queue administration
//! - daemon: run every stage on an interval

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use gridbench::domain::{ModelTarget, Provider};

/// Gridbench - schedule LLM evaluation and generation of grid puzzles
#[derive(Parser, Debug)]
#[command(name = "gridbench")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute; shows status when omitted
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Import ARC-format puzzle files, directories or glob patterns
    Import {
        /// Files, directories or patterns to import
        #[arg(required = true)]
        paths: Vec<String>,

        /// Keep dataset IDs instead of content addresses
        #[arg(short, long)]
        keep_ids: bool,

        /// Tag applied to every imported puzzle (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,

        /// Source recorded on imported puzzles
        #[arg(short, long, default_value = "import")]
        source: String,
    },

    /// Brainstorm concepts and add them to the generation queue
    Concepts {
        /// Number of concepts to brainstorm
        #[arg(short = 'n', long, default_value_t = 20)]
        count: usize,

        /// Add this concept directly instead of brainstorming (repeatable)
        #[arg(short, long = "add")]
        add: Vec<String>,
    },

    /// Queue evaluation jobs
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },

    /// Process one batch of queued evaluation jobs
    Drain {
        /// Maximum jobs to process
        #[arg(short, long)]
        batch: Option<usize>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Process one batch of pending generation jobs
    Generate {
        /// Maximum jobs to process
        #[arg(short, long)]
        batch: Option<usize>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show queue depths and rate-limit state
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Return stale running jobs to their queues
    Reclaim,

    /// Cancel a pending or running generation job
    Cancel {
        /// Generation job ID
        id: String,
    },

    /// Reclaim, plan, evaluate and generate on an interval until Ctrl-C
    Daemon {
        /// Seconds between ticks
        #[arg(short, long)]
        interval: Option<u64>,
    },
}

/// Planning strategies
#[derive(Subcommand, Debug, Clone)]
pub enum PlanCommands {
    /// Cheap models first, escalating unsolved generations
    Smart {
        /// Maximum jobs to queue
        #[arg(short, long)]
        max: Option<usize>,

        /// Only consider puzzles with one of these tags (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,

        /// Only queue jobs of this priority (1 cheap, 2 escalation)
        #[arg(short, long)]
        priority: Option<u8>,
    },

    /// Queue every generation against every selected model
    Flat {
        /// Model as provider:model (repeatable); defaults to the configured tiers
        #[arg(short, long = "model")]
        models: Vec<ModelTarget>,

        /// Restrict to these providers (repeatable)
        #[arg(long = "provider")]
        providers: Vec<Provider>,

        /// Priority for the queued jobs
        #[arg(short, long)]
        priority: Option<u8>,

        /// Only consider puzzles with one of these tags (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    impl PlanCommands {
        fn is_smart(&self) -> bool {
            matches!(self, PlanCommands::Smart { .. })
        }

        fn is_flat(&self) -> bool {
            matches!(self, PlanCommands::Flat { .. })
        }
    }

    #[test]
    fn test_cli_parse_no_args() {
        // No args falls back to status
        let cli = Cli::try_parse_from(["gridbench"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.verbose);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_cli_verbose_flag() {
        let cli = Cli::try_parse_from(["gridbench", "-v"]).unwrap();
        assert!(cli.is_verbose());
    }

    #[test]
    fn test_cli_config_option() {
        let cli = Cli::try_parse_from(["gridbench", "-c", "/path/to/gridbench.yml", "status"]).unwrap();
        assert_eq!(cli.config.as_ref(), Some(&PathBuf::from("/path/to/gridbench.yml")));
    }

    #[test]
    fn test_import_command() {
        let cli = Cli::try_parse_from([
            "gridbench",
            "import",
            "data/training",
            "extra.json",
            "-t",
            "ARC-AGI 2024",
            "-t",
            "training",
            "--keep-ids",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Import {
                paths,
                keep_ids,
                tags,
                source,
            }) => {
                assert_eq!(paths, vec!["data/training", "extra.json"]);
                assert!(keep_ids);
                assert_eq!(tags, vec!["ARC-AGI 2024", "training"]);
                assert_eq!(source, "import");
            }
            _ => panic!("Expected import command"),
        }
    }

    #[test]
    fn test_import_requires_paths() {
        assert!(Cli::try_parse_from(["gridbench", "import"]).is_err());
    }

    #[test]
    fn test_concepts_defaults() {
        let cli = Cli::try_parse_from(["gridbench", "concepts"]).unwrap();
        match cli.command {
            Some(Commands::Concepts { count, add }) => {
                assert_eq!(count, 20);
                assert!(add.is_empty());
            }
            _ => panic!("Expected concepts command"),
        }
    }

    #[test]
    fn test_concepts_add() {
        let cli = Cli::try_parse_from(["gridbench", "concepts", "-a", "gravity", "-a", "mirror"]).unwrap();
        match cli.command {
            Some(Commands::Concepts { add, .. }) => {
                assert_eq!(add, vec!["gravity", "mirror"]);
            }
            _ => panic!("Expected concepts command"),
        }
    }

    #[test]
    fn test_plan_smart() {
        let cli = Cli::try_parse_from(["gridbench", "plan", "smart", "--max", "50", "-t", "ConceptARC"]).unwrap();
        match cli.command {
            Some(Commands::Plan {
                command: PlanCommands::Smart { max, tags, priority },
            }) => {
                assert_eq!(max, Some(50));
                assert_eq!(tags, vec!["ConceptARC"]);
                assert!(priority.is_none());
            }
            _ => panic!("Expected plan smart command"),
        }
    }

    #[test]
    fn test_plan_flat_models_and_providers() {
        let cli = Cli::try_parse_from([
            "gridbench",
            "plan",
            "flat",
            "-m",
            "groq:llama-3.1-8b-instant",
            "-m",
            "openrouter:google/gemma-2-9b-it:free",
            "--provider",
            "Groq",
            "-p",
            "2",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Plan {
                command:
                    PlanCommands::Flat {
                        models,
                        providers,
                        priority,
                        tags,
                    },
            }) => {
                assert_eq!(models.len(), 2);
                assert_eq!(models[1], ModelTarget::new(Provider::Openrouter, "google/gemma-2-9b-it:free"));
                assert_eq!(providers, vec![Provider::Groq]);
                assert_eq!(priority, Some(2));
                assert!(tags.is_empty());
            }
            _ => panic!("Expected plan flat command"),
        }
    }

    #[test]
    fn test_plan_flat_rejects_bad_model() {
        assert!(Cli::try_parse_from(["gridbench", "plan", "flat", "-m", "llama"]).is_err());
        assert!(Cli::try_parse_from(["gridbench", "plan", "flat", "--provider", "bedrock"]).is_err());
    }

    #[test]
    fn test_plan_requires_strategy() {
        assert!(Cli::try_parse_from(["gridbench", "plan"]).is_err());
    }

    #[test]
    fn test_drain_command() {
        let cli = Cli::try_parse_from(["gridbench", "drain", "-b", "5", "--json"]).unwrap();
        match cli.command {
            Some(Commands::Drain { batch, json }) => {
                assert_eq!(batch, Some(5));
                assert!(json);
            }
            _ => panic!("Expected drain command"),
        }
    }

    #[test]
    fn test_generate_command() {
        let cli = Cli::try_parse_from(["gridbench", "generate"]).unwrap();
        match cli.command {
            Some(Commands::Generate { batch, json }) => {
                assert!(batch.is_none());
                assert!(!json);
            }
            _ => panic!("Expected generate command"),
        }
    }

    #[test]
    fn test_status_json() {
        let cli = Cli::try_parse_from(["gridbench", "status", "--json"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Status { json: true })));
    }

    #[test]
    fn test_reclaim_command() {
        let cli = Cli::try_parse_from(["gridbench", "reclaim"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Reclaim)));
    }

    #[test]
    fn test_cancel_command() {
        let cli = Cli::try_parse_from(["gridbench", "cancel", "gen-123"]).unwrap();
        match cli.command {
            Some(Commands::Cancel { id }) => {
                assert_eq!(id, "gen-123");
            }
            _ => panic!("Expected cancel command"),
        }
    }

    #[test]
    fn test_daemon_interval() {
        let cli = Cli::try_parse_from(["gridbench", "daemon", "-i", "30"]).unwrap();
        match cli.command {
            Some(Commands::Daemon { interval }) => {
                assert_eq!(interval, Some(30));
            }
            _ => panic!("Expected daemon command"),
        }
    }

    #[test]
    fn test_plan_commands_helpers() {
        let smart = PlanCommands::Smart {
            max: None,
            tags: Vec::new(),
            priority: None,
        };
        assert!(smart.is_smart());
        assert!(!smart.is_flat());

        let flat = PlanCommands::Flat {
            models: Vec::new(),
            providers: Vec::new(),
            priority: None,
            tags: Vec::new(),
        };
        assert!(flat.is_flat());
    }

    #[test]
    fn test_help_works() {
        // Verify help doesn't panic
        Cli::command().debug_assert();
    }

    #[test]
    fn test_version_flag() {
        let result = Cli::try_parse_from(["gridbench", "--version"]);
        // Version flag causes early exit with error (expected)
        assert!(result.is_err());
    }
}
