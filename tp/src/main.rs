//! taskpilot - retrying task runner and document co-author for coding agents
//!
//! CLI entry point.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{CommandFactory, Parser};
use colored::Colorize;
use eyre::{Context, Result};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use taskpilot::agent::{ClaudeAgent, ClaudeAgentConfig};
use taskpilot::cli::{Cli, Command, OutputFormat};
use taskpilot::config::Config;
use taskpilot::conversation::{ConversationConfig, ConversationEngine};
use taskpilot::domain::{Phase, Plan, PlanStatus, TaskStatus, is_valid_session_name};
use taskpilot::events::{Event, EventBus, EventSink, spawn_event_logger};
use taskpilot::prompts::PromptLoader;
use taskpilot::r#loop::{ExecutionLoop, LoopConfig};
use taskpilot::repl::{ChatPrinter, ChatSession};
use taskpilot::runner::{CommandRunner, CommandRunnerConfig, DemoRunner, TaskRunner};
use taskpilot::state::{
    LockError, LockStatus, PlanStore, SessionError, SessionStore, force_clear, lock_status, read_definition,
};

/// Step delay of the simulated agent
const DEMO_STEP_DELAY: Duration = Duration::from_millis(300);

fn setup_logging(level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskpilot")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Write to a log file, never to the terminal
    let level = level
        .and_then(|l| l.parse::<tracing::Level>().ok())
        .unwrap_or(tracing::Level::INFO);
    let log_file = fs::File::create(log_dir.join("taskpilot.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    let level = cli.log_level.as_deref().or(config.log_level.as_deref());
    setup_logging(level).context("Failed to setup logging")?;

    match cli.command {
        Some(Command::New { file }) => cmd_new(&config, &file),
        Some(Command::Run {
            plan_id,
            max_attempts,
            demo,
        }) => cmd_run(&config, &plan_id, max_attempts, demo).await,
        Some(Command::Plans { format }) => cmd_plans(&config, format),
        Some(Command::Show { plan_id, format }) => cmd_show(&config, &plan_id, format),
        Some(Command::Unlock { plan_id, force }) => cmd_unlock(&config, &plan_id, force),
        Some(Command::Chat {
            phase,
            name,
            from_document,
            new,
        }) => cmd_chat(&config, phase, &name, from_document, new).await,
        Some(Command::Sessions { phase, format }) => cmd_sessions(&config, phase, format),
        None => {
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}

/// Create a plan from a definition file
fn cmd_new(config: &Config, file: &Path) -> Result<()> {
    let plan = read_definition(file)?;
    let store = PlanStore::new(&config.storage.plans_dir);
    let dir = store.create(&plan)?;

    println!("Created plan {} \"{}\" with {} tasks", plan.id.bright_white().bold(), plan.name, plan.tasks.len());
    println!("  {}", dir.display().to_string().dimmed());
    println!("Run it with {}", format!("tp run {}", plan.id).yellow());
    Ok(())
}

/// Run a plan to the end
async fn cmd_run(config: &Config, plan_id: &str, max_attempts: Option<u32>, demo: bool) -> Result<()> {
    let store = PlanStore::new(&config.storage.plans_dir);
    let plan = store.load(plan_id)?;
    let plan_dir = store.plan_dir(plan_id);

    let work_dir = std::env::current_dir().context("Failed to determine working directory")?;
    let runner: Arc<dyn TaskRunner> = if demo {
        Arc::new(DemoRunner::flaky(DEMO_STEP_DELAY))
    } else {
        let prompts = Arc::new(PromptLoader::new(&work_dir));
        Arc::new(CommandRunner::new(
            CommandRunnerConfig {
                program: config.agent.command.clone(),
                args: config.agent.args.clone(),
                work_dir: work_dir.clone(),
                validation_command: config.agent.validation_command.clone(),
                timeout: config.agent.attempt_timeout(),
            },
            prompts,
        ))
    };

    let loop_config = LoopConfig::new(max_attempts.unwrap_or(config.execution.max_attempts))
        .with_retry_delay(config.execution.retry_delay());

    let bus = Arc::new(EventBus::with_default_capacity());
    let logger = spawn_event_logger(&bus, store.root());
    let printer = tokio::spawn(print_run_events(bus.subscribe()));

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, cancelling run");
                cancel.cancel();
            }
        })
    };

    println!(
        "Running plan {} \"{}\" ({} tasks, up to {} attempts each{})",
        plan.id.bright_white().bold(),
        plan.name,
        plan.tasks.len(),
        loop_config.max_attempts,
        if demo { ", demo" } else { "" }
    );

    let sink: Arc<dyn EventSink> = bus.clone();
    let execution = ExecutionLoop::new(runner, sink, loop_config);
    let result = execution.run(&plan_dir, &cancel).await;

    ctrl_c.abort();
    drop(execution);
    drop(bus);
    let _ = printer.await;
    let _ = logger.await;

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            if let Some(lock_error) = e.downcast_ref::<LockError>() {
                eprintln!("{} {}", "✗".red(), lock_error);
                std::process::exit(2);
            }
            return Err(e);
        }
    };

    println!();
    print_summary(&outcome.plan);
    match outcome.status() {
        PlanStatus::Completed => Ok(()),
        PlanStatus::Interrupted => {
            println!("{}", "⚠ Run interrupted; rerun to continue where it stopped".yellow());
            std::process::exit(130);
        }
        _ => std::process::exit(1),
    }
}

/// Render run events until the bus closes
async fn print_run_events(mut rx: broadcast::Receiver<Event>) {
    loop {
        match rx.recv().await {
            Ok(event) => print_run_event(&event),
            Err(broadcast::error::RecvError::Lagged(n)) => warn!(missed = n, "Run printer lagged"),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_run_event(event: &Event) {
    match event {
        Event::TaskStarted { task_id, title, .. } => {
            println!();
            println!("{} {} {}", "▶".bright_cyan(), task_id.bright_white().bold(), title);
        }
        Event::AttemptStarted {
            attempt, max_attempts, ..
        } => {
            println!("  {}", format!("attempt {}/{}", attempt, max_attempts).dimmed());
        }
        Event::AttemptOutput { line, is_stderr, .. } => {
            if *is_stderr {
                println!("    {}", line.yellow());
            } else {
                println!("    {}", line.dimmed());
            }
        }
        Event::AttemptFailed { attempt, error, .. } => {
            println!("  {} attempt {} failed: {}", "✗".red(), attempt, error);
        }
        Event::TaskFinished {
            task_id,
            status,
            attempts,
            ..
        } => match status {
            TaskStatus::Completed => println!("  {} {} completed ({} attempts)", "✓".green(), task_id, attempts),
            _ => println!("  {} {} failed after {} attempts", "✗".red(), task_id, attempts),
        },
        _ => {}
    }
}

fn print_summary(plan: &Plan) {
    let status = match plan.status {
        PlanStatus::Completed => plan.status.to_string().green().bold(),
        PlanStatus::Failed => plan.status.to_string().red().bold(),
        _ => plan.status.to_string().yellow().bold(),
    };
    println!("Plan {} {}", plan.id.bright_white(), status);
    for task in &plan.tasks {
        println!(
            "  {}  {:12} {:>2} attempts  {}",
            task.id,
            task.status.to_string(),
            task.attempts,
            task.title
        );
    }
}

/// List plans
fn cmd_plans(config: &Config, format: OutputFormat) -> Result<()> {
    let store = PlanStore::new(&config.storage.plans_dir);
    let plans = store.list()?;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&plans)?);
        return Ok(());
    }

    if plans.is_empty() {
        println!("No plans in {}", store.root().display());
        println!("Create one with {}", "tp new <plan.yml>".yellow());
        return Ok(());
    }

    for plan in &plans {
        let lock = match lock_status(&store.plan_dir(&plan.id)) {
            Ok(LockStatus::Held) => " (running)".green().to_string(),
            Ok(LockStatus::Stale) => " (stale lock)".red().to_string(),
            Ok(LockStatus::Free) | Err(_) => String::new(),
        };
        println!(
            "{}  {:12} {}/{} done  {}{}",
            plan.id.bright_white(),
            plan.status.to_string(),
            plan.count(TaskStatus::Completed),
            plan.tasks.len(),
            plan.name,
            lock
        );
    }
    Ok(())
}

/// Show one plan
fn cmd_show(config: &Config, plan_id: &str, format: OutputFormat) -> Result<()> {
    let store = PlanStore::new(&config.storage.plans_dir);
    let plan = store.load(plan_id)?;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!("{} {}", plan.name.bright_cyan().bold(), format!("({})", plan.id).dimmed());
    if !plan.description.is_empty() {
        println!("{}", plan.description);
    }
    println!();
    for task in &plan.tasks {
        println!("{} {}  [{}]", task.id.bright_white(), task.title, task.status);
        for criterion in &task.acceptance_criteria {
            println!("    - {}", criterion);
        }
    }
    Ok(())
}

/// Clear a plan's lock marker
fn cmd_unlock(config: &Config, plan_id: &str, force: bool) -> Result<()> {
    let store = PlanStore::new(&config.storage.plans_dir);
    store.load(plan_id)?;
    let plan_dir = store.plan_dir(plan_id);

    match lock_status(&plan_dir)? {
        LockStatus::Free => {
            println!("Plan {} is not locked", plan_id);
            return Ok(());
        }
        LockStatus::Held if !force => {
            eyre::bail!(
                "Plan {} is being run by a live process; use --force to remove the lock anyway",
                plan_id
            );
        }
        LockStatus::Held | LockStatus::Stale => {}
    }

    if force_clear(&plan_dir)? {
        println!("{} Removed lock on plan {}", "✓".green(), plan_id);
    }
    Ok(())
}

/// Co-author a document
async fn cmd_chat(
    config: &Config,
    phase: Phase,
    name: &str,
    from_document: Option<String>,
    new: bool,
) -> Result<()> {
    if !is_valid_session_name(name) {
        eyre::bail!("Session name '{}' needs at least one letter or digit", name);
    }

    let work_dir = std::env::current_dir().context("Failed to determine working directory")?;
    let store = SessionStore::new(&config.storage.sessions_dir);
    let settings = config.conversation.phase(phase);

    let mut conversation = ConversationConfig::new(phase, name, settings.output_dir.clone(), work_dir.clone());
    conversation.channel_capacity = config.conversation.channel_capacity;
    conversation.skill_name = settings.skill.clone();
    if let Some(from) = from_document {
        if !work_dir.join(&from).exists() {
            println!("{} {} does not exist yet", "!".yellow(), from);
        }
        conversation = conversation.with_from_document(from);
    }

    let existing = if new {
        None
    } else {
        match store.load(phase, name) {
            Ok(session) if session.is_resumable() => Some(session),
            Ok(_) | Err(SessionError::NotFound { .. }) => None,
            Err(e) => return Err(e).context("Use --new to start a fresh session"),
        }
    };

    if existing.is_none()
        && let Ok(Some(other)) = store.latest_in_progress(phase)
        && other.file_name() != taskpilot::domain::session_file_name(phase, name)
    {
        println!(
            "{} \"{}\" is still in progress ({})",
            "note:".dimmed(),
            other.name,
            format!("tp chat {} {}", phase, other.name).yellow()
        );
    }

    let agent = Arc::new(ClaudeAgent::new(ClaudeAgentConfig::new(
        config.agent.command.clone(),
        work_dir.clone(),
    )));
    let prompts = Arc::new(PromptLoader::new(&work_dir));
    let printer = Arc::new(ChatPrinter::new());

    let engine = match existing {
        Some(session) => {
            println!("Resuming session from {}", session.updated_at.format("%Y-%m-%d %H:%M"));
            ConversationEngine::resume(conversation, agent, store, prompts, printer, session)
        }
        None => ConversationEngine::new(conversation, agent, store, prompts, printer),
    };

    ChatSession::new(engine).run().await
}

/// List sessions
fn cmd_sessions(config: &Config, phase: Option<Phase>, format: OutputFormat) -> Result<()> {
    let store = SessionStore::new(&config.storage.sessions_dir);
    let sessions: Vec<_> = store
        .list()?
        .into_iter()
        .filter(|s| phase.is_none_or(|p| s.phase == p))
        .collect();

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }

    if sessions.is_empty() {
        println!("No sessions in {}", store.dir().display());
        return Ok(());
    }

    for session in &sessions {
        println!(
            "{}  {:12} {:12} {}  {}",
            session.updated_at.format("%Y-%m-%d %H:%M").to_string().dimmed(),
            session.phase.to_string(),
            session.status.to_string(),
            session.name.bright_white(),
            session.document_path.dimmed()
        );
    }
    Ok(())
}
