//! CLI entrypoint for diligence
//!
//! This is the main binary that wires together all layers using
//! dependency injection.

use anyhow::{Context, Result, bail};
use clap::Parser;
use diligence_application::{
    AgentRegistry, CheckpointStore, OrchestratorConfig, OrchestratorError, ResearchOrchestrator,
    SessionError,
};
use diligence_domain::{
    ConflictHandling, DependencyResolver, ResearchSession, SessionId, SessionPhase, SessionStatus,
};
use diligence_infrastructure::{
    ConfigLoader, FileCheckpointStore, FileConfig, JsonReportWriter, JsonlEventLog, TomlPlanFile,
    TracingEventSubscriber, scripted_registry,
};
use diligence_presentation::{
    Cli, Command, ConsoleFormatter, OutputFormat, ProgressReporter, SimpleProgress,
};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let file_config = if cli.no_config {
        ConfigLoader::load_defaults()
    } else {
        ConfigLoader::load(cli.config.as_deref()).context("failed to load configuration")?
    };

    let _guard = init_logging(cli.verbose, file_config.output.log_file.as_deref())?;
    if !file_config.output.color {
        colored::control::set_override(false);
    }

    info!("Starting diligence");

    match &cli.command {
        Command::Run {
            plan,
            query,
            auto_approve,
            strategy,
        } => {
            let mut config = orchestrator_config(&cli, &file_config)?;
            if let Some(strategy) = strategy {
                config.strategy = (*strategy).into();
            }
            let plan_file = TomlPlanFile::load(plan.as_path())?;
            let query = match query.clone().or_else(|| plan_file.plan().query.clone()) {
                Some(query) => query,
                None => bail!("No query given. Pass --query or set `query` in the plan file."),
            };
            let registry = scripted_registry(plan_file.plan());
            let orchestrator = Arc::new(
                build_orchestrator(config, registry, &file_config)
                    .with_planner(Arc::new(plan_file)),
            );
            attach_subscribers(&orchestrator, &cli, &file_config);

            let id = orchestrator.plan_and_start(&query).await?;
            println!("Session: {id}");
            if !approve(&orchestrator, id, *auto_approve).await? {
                println!("Plan not approved; session {id} is left awaiting approval.");
                return Ok(());
            }
            let session = run_to_end(&orchestrator, id).await?;
            print_session(&cli, &session, plan);
        }

        Command::Resume { session_id, plan } => {
            let id = parse_id(session_id)?;
            let config = orchestrator_config(&cli, &file_config)?;
            let plan_file = TomlPlanFile::load(plan.as_path())?;
            let registry = scripted_registry(plan_file.plan());
            let orchestrator = Arc::new(build_orchestrator(config, registry, &file_config));
            attach_subscribers(&orchestrator, &cli, &file_config);

            let restored = orchestrator.resume(id).await?;
            info!(
                session_id = %id,
                phase = %restored.phase(),
                completed_levels = restored.completed_levels(),
                "Session restored"
            );
            if restored.phase() == SessionPhase::AwaitingApproval
                && !approve(&orchestrator, id, false).await?
            {
                println!("Plan not approved; session {id} is left awaiting approval.");
                return Ok(());
            }
            let session = run_to_end(&orchestrator, id).await?;
            print_session(&cli, &session, plan);
        }

        Command::Status { session_id } => {
            let id = parse_id(session_id)?;
            let orchestrator = read_only_orchestrator(&cli, &file_config)?;
            let session = orchestrator.get_status(id).await?;
            match cli.output {
                OutputFormat::Text => print!("{}", ConsoleFormatter::format_session(&session)),
                OutputFormat::Json => println!("{}", ConsoleFormatter::format_json(&session)),
            }
        }

        Command::List => {
            let orchestrator = read_only_orchestrator(&cli, &file_config)?;
            let sessions = orchestrator.list_sessions().await?;
            match cli.output {
                OutputFormat::Text => print!("{}", ConsoleFormatter::format_list(&sessions)),
                OutputFormat::Json => println!("{}", ConsoleFormatter::format_json(&sessions)),
            }
        }

        Command::Archive { session_id } => {
            let id = parse_id(session_id)?;
            let orchestrator = read_only_orchestrator(&cli, &file_config)?;
            let session = orchestrator.archive(id).await?;
            println!(
                "Session {} {}",
                session.id(),
                ConsoleFormatter::status_label(session.status())
            );
        }

        Command::Config => show_config(&cli, &file_config),
    }

    Ok(())
}

/// stderr logging filtered by `-v` (RUST_LOG wins), plus an optional log file.
fn init_logging(verbose: u8, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .with_context(|| format!("log file {} has no file name", path.display()))?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .init();
    Ok(guard)
}

fn orchestrator_config(cli: &Cli, file_config: &FileConfig) -> Result<OrchestratorConfig> {
    let handling = cli.conflict_handling.map(ConflictHandling::from);
    file_config
        .to_orchestrator_config(handling)
        .context("invalid configuration (set conflicts.handling or pass --conflict-handling)")
}

fn build_orchestrator(
    config: OrchestratorConfig,
    registry: AgentRegistry,
    file_config: &FileConfig,
) -> ResearchOrchestrator {
    let store: Arc<dyn CheckpointStore> =
        Arc::new(FileCheckpointStore::new(file_config.persistence.checkpoint_dir()));
    ResearchOrchestrator::new(config, Arc::new(registry), store).with_report_generator(Arc::new(
        JsonReportWriter::new(file_config.output.report_dir.clone()),
    ))
}

/// Orchestrator for commands that only read or archive stored sessions.
fn read_only_orchestrator(cli: &Cli, file_config: &FileConfig) -> Result<ResearchOrchestrator> {
    // No conflict detection runs for these commands, so any handling will do.
    let handling = cli
        .conflict_handling
        .map(ConflictHandling::from)
        .unwrap_or(ConflictHandling::ReviewAll);
    let config = file_config
        .to_orchestrator_config(Some(handling))
        .context("invalid configuration")?;
    Ok(build_orchestrator(config, AgentRegistry::new(), file_config))
}

fn attach_subscribers(orchestrator: &ResearchOrchestrator, cli: &Cli, file_config: &FileConfig) {
    orchestrator.subscribe_all(Arc::new(TracingEventSubscriber));

    if let Some(path) = &file_config.output.event_log {
        match JsonlEventLog::open(path) {
            Some(log) => {
                orchestrator.subscribe_all(Arc::new(log));
            }
            None => warn!(path = %path.display(), "Event log unavailable"),
        }
    }

    if cli.quiet || cli.output == OutputFormat::Json {
        return;
    }
    if file_config.output.show_progress {
        orchestrator.subscribe_all(Arc::new(ProgressReporter::new()));
    } else {
        orchestrator.subscribe_all(Arc::new(SimpleProgress));
    }
}

/// Show the proposed levels and approve them, asking unless `auto_approve`.
async fn approve(
    orchestrator: &ResearchOrchestrator,
    id: SessionId,
    auto_approve: bool,
) -> Result<bool> {
    let session = orchestrator.get_status(id).await?;
    let config = orchestrator.config();
    let proposed = DependencyResolver::new(config.execution.max_parallel_agents)
        .resolve(session.plan().to_vec(), config.strategy)?;
    print!("{}", ConsoleFormatter::format_graph(&proposed));

    if !auto_approve && !confirm("Approve plan?").await? {
        return Ok(false);
    }
    orchestrator.approve_plan(id, None).await?;
    Ok(true)
}

async fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;
    let answer = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| line)
    })
    .await??;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

/// Execute until the session finishes or pauses. The first Ctrl-C pauses at
/// the next level barrier, the second cancels.
async fn run_to_end(
    orchestrator: &Arc<ResearchOrchestrator>,
    id: SessionId,
) -> Result<ResearchSession> {
    let interrupts = {
        let orchestrator = Arc::clone(orchestrator);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            match orchestrator.pause(id).await {
                Ok(()) => eprintln!("\nPausing after the current level (Ctrl-C again to cancel)..."),
                Err(OrchestratorError::Session(SessionError::NothingToPause { .. })) => {
                    eprintln!("\nAll levels have run; finishing the report...")
                }
                Err(e) => warn!(session_id = %id, error = %e, "Pause failed"),
            }
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            if let Err(e) = orchestrator.cancel(id).await {
                warn!(session_id = %id, error = %e, "Cancel failed");
            }
        })
    };

    let result = orchestrator.execute(id).await;
    interrupts.abort();
    Ok(result?)
}

fn print_session(cli: &Cli, session: &ResearchSession, plan: &Path) {
    match cli.output {
        OutputFormat::Text => print!("{}", ConsoleFormatter::format_session(session)),
        OutputFormat::Json => println!("{}", ConsoleFormatter::format_json(session)),
    }
    if session.status() == SessionStatus::Paused {
        println!(
            "Resume with: diligence resume {} --plan {}",
            session.id(),
            plan.display()
        );
    }
}

fn parse_id(raw: &str) -> Result<SessionId> {
    raw.parse()
        .with_context(|| format!("'{raw}' is not a session id"))
}

fn show_config(cli: &Cli, file_config: &FileConfig) {
    println!("Configuration sources (highest priority first):");
    println!("  Environment: DILIGENCE_* (nested keys separated by __)");
    for source in ConfigLoader::sources(cli.config.as_deref()) {
        let marker = if source.found { "found" } else { "not found" };
        println!("  {}: {} ({marker})", source.label, source.path.display());
    }
    if cli.no_config {
        println!("  (files ignored: --no-config)");
    }
    println!();
    println!(
        "Checkpoints: {}",
        file_config.persistence.checkpoint_dir().display()
    );
    println!();
    println!("{}", ConsoleFormatter::format_json(file_config));

    let handling = cli.conflict_handling.map(ConflictHandling::from);
    if let Err(e) = file_config.to_orchestrator_config(handling) {
        println!();
        println!("Configuration is not usable yet: {e}");
    }
}
