//! forgectl: CLI entry point for the autonomous code-change orchestrator.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eyre::{Context, Result};

use forge_core::cli::{Cli, Command, PlanCommand};
use forge_core::command::CommandRunner;
use forge_core::config::Config;
use forge_core::guardrail::GuardrailHook;
use forge_core::llm::{KeyResolver, Registry, RegistryConfig};
use forge_core::repository::Repository;
use forge_core::{Orchestrator, OrchestratorDeps, StartRequest};

fn setup_logging(level: Option<&str>) -> Result<()> {
    let filter = level
        .map(|l| tracing_subscriber::EnvFilter::new(l.to_string()))
        .unwrap_or_else(|| tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    tracing::info!("logging initialized");
    Ok(())
}

fn build_orchestrator_with_events(config: &Config) -> (Orchestrator, tokio::sync::mpsc::UnboundedReceiver<forge_core::OrchestratorEvent>) {
    let command_runner = Arc::new(CommandRunner::new(config.concurrency.max_commands as usize));

    let registry = Registry::new(
        KeyResolver::new(HashMap::new()),
        RegistryConfig {
            max_tokens: config.llm.max_tokens,
            timeout: Duration::from_millis(config.llm.timeout_ms),
            command_runner: Arc::clone(&command_runner),
            ..RegistryConfig::default()
        },
    );
    let llm_provider = registry.get(&config.llm.provider).ok();
    if llm_provider.is_none() {
        tracing::warn!(provider = %config.llm.provider, "no llm provider configured; planning and repair will use heuristic fallbacks only");
    }

    let repository = Repository::new(config.repository.plan_path.clone(), config.repository.status_path.clone());

    let deps = OrchestratorDeps {
        command_runner,
        llm_provider,
        guardrail: GuardrailHook::new(config.guardrail.sensitive_task_types.clone()),
        repository: Some(Arc::new(repository)),
        max_execute_attempts: 3,
        max_repair_attempts: 3,
    };
    Orchestrator::new(deps)
}

/// For subcommands that don't need to observe a task's own lifecycle; the
/// event stream is drained to debug logs instead of being read back.
fn build_orchestrator(config: &Config) -> Orchestrator {
    let (orchestrator, mut events_rx) = build_orchestrator_with_events(config);
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            tracing::debug!(?event, "orchestrator event");
        }
    });
    orchestrator
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.log_level.as_deref()).context("failed to set up logging")?;

    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    tracing::info!(provider = %config.llm.provider, model = %config.llm.model, "forgectl started");

    match cli.command {
        Command::Start { task, project_path, sla_policy } => {
            // This process is the only thing that will ever observe the
            // task's progress (state lives in-memory, per the Orchestrator
            // being a transport-agnostic library handle rather than a
            // daemon), so `start` blocks here until the task reaches a
            // terminal state instead of returning as soon as it's accepted.
            let (orchestrator, mut events_rx) = build_orchestrator_with_events(&config);
            let outcome = orchestrator
                .start(StartRequest::new(task, project_path, sla_policy))
                .await
                .map_err(|e| eyre::eyre!(e.to_string()))?;
            println!("{{\"taskId\": \"{}\", \"status\": \"accepted\"}}", outcome.task_id);

            while let Some(event) = events_rx.recv().await {
                if event.task_id() != outcome.task_id {
                    continue;
                }
                let done = matches!(event, forge_core::OrchestratorEvent::TaskCompleted { .. } | forge_core::OrchestratorEvent::TaskFailed { .. });
                tracing::info!(?event, "task event");
                if done {
                    break;
                }
            }

            let status = orchestrator.status(&outcome.task_id).map_err(|e| eyre::eyre!(e.to_string()))?;
            let view = forge_core::status::project(&status);
            println!(
                "{{\"taskId\": \"{}\", \"status\": \"{}\", \"progress\": {:.1}, \"message\": \"{}\"}}",
                view.task_id, view.state, view.progress_percent, view.message
            );
        }
        Command::Status { task_id } => {
            let orchestrator = build_orchestrator(&config);
            match orchestrator.status(&task_id) {
                Ok(status) => {
                    let view = forge_core::status::project(&status);
                    println!(
                        "{{\"taskId\": \"{}\", \"status\": \"{}\", \"progress\": {:.1}, \"message\": \"{}\", \"eta_secs\": {}}}",
                        view.task_id, view.state, view.progress_percent, view.message, view.estimated_time_remaining_secs
                    );
                }
                Err(err) => eprintln!("error: {err}"),
            }
        }
        Command::Cancel { task_id } => {
            let orchestrator = build_orchestrator(&config);
            match orchestrator.cancel(&task_id).await {
                Ok(()) => println!("{{\"taskId\": \"{task_id}\", \"status\": \"cancelled\"}}"),
                Err(err) => eprintln!("error: {err}"),
            }
        }
        Command::List { project_path } => {
            let orchestrator = build_orchestrator(&config);
            for task in orchestrator.list(project_path.as_deref()) {
                println!("{}\t{}", task.id, task.name);
            }
        }
        Command::Logs { task_id } => {
            let orchestrator = build_orchestrator(&config);
            match orchestrator.logs(&task_id) {
                Ok(entries) => {
                    for entry in entries {
                        println!("[{}] {}: {}", entry.timestamp, entry.task_id, entry.message);
                    }
                }
                Err(err) => eprintln!("error: {err}"),
            }
        }
        Command::Pause { task_id } => {
            let orchestrator = build_orchestrator(&config);
            if let Err(err) = orchestrator.pause(&task_id) {
                eprintln!("error: {err}");
            }
        }
        Command::Resume { task_id } => {
            let orchestrator = build_orchestrator(&config);
            if let Err(err) = orchestrator.resume(&task_id) {
                eprintln!("error: {err}");
            }
        }
        Command::Plan { command: PlanCommand::Validate { plan_path } } => {
            let repository = Repository::new(plan_path, config.repository.status_path.clone());
            match repository.validate() {
                Ok(()) => println!("plan is valid"),
                Err(err) => {
                    eprintln!("plan is invalid: {err}");
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
