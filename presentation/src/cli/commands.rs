//! CLI command definitions

use clap::{Parser, Subcommand, ValueEnum};
use diligence_domain::{ConflictHandling, OptimizationStrategy};
use std::path::PathBuf;

/// Output format for session views
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable, colored text
    Text,
    /// JSON
    Json,
}

/// How conflicts are labeled; overrides `conflicts.handling` from config
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConflictHandlingArg {
    /// Label each conflict with the strategy for its type
    AutoLabel,
    /// Label every conflict present-both for manual review
    ReviewAll,
}

impl From<ConflictHandlingArg> for ConflictHandling {
    fn from(arg: ConflictHandlingArg) -> Self {
        match arg {
            ConflictHandlingArg::AutoLabel => ConflictHandling::AutoLabel,
            ConflictHandlingArg::ReviewAll => ConflictHandling::ReviewAll,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    Speed,
    Resource,
    Reliability,
}

impl From<StrategyArg> for OptimizationStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Speed => OptimizationStrategy::Speed,
            StrategyArg::Resource => OptimizationStrategy::Resource,
            StrategyArg::Reliability => OptimizationStrategy::Reliability,
        }
    }
}

/// CLI arguments for diligence
#[derive(Parser, Debug)]
#[command(name = "diligence")]
#[command(author, version, about = "Orchestrate research agents over a dependency graph")]
#[command(long_about = r#"
Diligence runs a plan of research agents against a single query.

Agents are grouped into levels by their prerequisites. Each level runs in
parallel with bounded concurrency, retries and fallbacks; conflicting
findings are flagged after every level and the session is checkpointed so
it can be resumed after an interruption.

Configuration files are loaded from (in priority order):
1. --config <path>                      Explicit config file
2. ./diligence.toml or ./.diligence.toml Project-level config
3. ~/.config/diligence/config.toml      Global config
DILIGENCE_* environment variables override all files.

Example:
  diligence run --plan acme.toml --auto-approve
  diligence status 6f1c0a52-...
  diligence resume 6f1c0a52-...
"#)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity level (-v = info, -vv = debug, -vvv = trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Use built-in defaults only, ignoring config files and environment
    #[arg(long, global = true)]
    pub no_config: bool,

    /// Conflict handling, required unless set in config
    #[arg(long, global = true, value_enum, value_name = "MODE")]
    pub conflict_handling: Option<ConflictHandlingArg>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Plan, approve and execute a research session
    Run {
        /// Plan file (TOML) listing the agents
        #[arg(short, long, value_name = "FILE")]
        plan: PathBuf,

        /// Research query; overrides the plan file's query
        #[arg(long)]
        query: Option<String>,

        /// Approve the plan without prompting
        #[arg(short = 'y', long)]
        auto_approve: bool,

        /// Level packing strategy; overrides config
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,
    },

    /// Resume a paused or interrupted session from its latest checkpoint
    Resume {
        session_id: String,

        /// Plan file the session was started from
        #[arg(short, long, value_name = "FILE")]
        plan: PathBuf,
    },

    /// Show a session
    Status { session_id: String },

    /// List stored sessions
    List,

    /// Archive a completed or failed session
    Archive { session_id: String },

    /// Show configuration sources and the effective configuration
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_arguments() {
        let cli = Cli::parse_from([
            "diligence",
            "-vv",
            "run",
            "--plan",
            "acme.toml",
            "-y",
            "--conflict-handling",
            "review-all",
        ]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.conflict_handling, Some(ConflictHandlingArg::ReviewAll));
        match cli.command {
            Command::Run {
                plan, auto_approve, ..
            } => {
                assert_eq!(plan, PathBuf::from("acme.toml"));
                assert!(auto_approve);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_resume_requires_plan() {
        assert!(Cli::try_parse_from(["diligence", "resume", "abc"]).is_err());
        let cli =
            Cli::try_parse_from(["diligence", "resume", "abc", "--plan", "acme.toml"]).unwrap();
        assert!(matches!(cli.command, Command::Resume { .. }));
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
