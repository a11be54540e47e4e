//! CLI command definitions.
//!
//! Grounded on the teacher's `td::cli::Cli`/`Command` shape (global
//! `--config`/`--log-level`, one variant per top-level verb).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "forgectl", about = "Autonomous code-change orchestrator", version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long = "log-level", global = true, help = "Log level (trace, debug, info, warn, error)")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// StartAutonomousTask: submit a new task for planning and execution.
    ///
    /// Runs to completion in the foreground and prints the final status;
    /// there is no background daemon for a later invocation to attach to,
    /// so `status`/`cancel`/`logs`/`pause`/`resume` only see a task while
    /// the `start` that created it is still running.
    Start {
        /// Natural-language task description
        task: String,

        /// Target project directory
        #[arg(long = "project")]
        project_path: String,

        /// SLA tier: lite, standard, or strict
        #[arg(long = "sla", default_value = "standard")]
        sla_policy: String,
    },

    /// GetAutonomousTaskStatus
    Status {
        task_id: String,
    },

    /// CancelAutonomousTask
    Cancel {
        task_id: String,
    },

    /// ListAutonomousTasks
    List {
        #[arg(long = "project")]
        project_path: Option<String>,
    },

    /// GetTaskLogs
    Logs {
        task_id: String,
    },

    Pause {
        task_id: String,
    },

    Resume {
        task_id: String,
    },

    /// Task Catalog Repository utilities
    Plan {
        #[command(subcommand)]
        command: PlanCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum PlanCommand {
    /// Validate a task plan file: unique ids, acyclic graph, step files exist.
    Validate {
        #[arg(long = "plan")]
        plan_path: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start_command() {
        let cli = Cli::parse_from(["forgectl", "start", "add endpoint", "--project", "/p", "--sla", "strict"]);
        match cli.command {
            Command::Start { task, project_path, sla_policy } => {
                assert_eq!(task, "add endpoint");
                assert_eq!(project_path, "/p");
                assert_eq!(sla_policy, "strict");
            }
            other => panic!("expected Start, got {other:?}"),
        }
    }

    #[test]
    fn test_sla_defaults_to_standard() {
        let cli = Cli::parse_from(["forgectl", "start", "add endpoint", "--project", "/p"]);
        match cli.command {
            Command::Start { sla_policy, .. } => assert_eq!(sla_policy, "standard"),
            other => panic!("expected Start, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_global_config_flag() {
        let cli = Cli::parse_from(["forgectl", "-c", "/path/to/config.yml", "status", "autonomous_1"]);
        assert_eq!(cli.config, Some(PathBuf::from("/path/to/config.yml")));
    }

    #[test]
    fn test_parse_plan_validate() {
        let cli = Cli::parse_from(["forgectl", "plan", "validate", "--plan", "plan.yml"]);
        match cli.command {
            Command::Plan { command: PlanCommand::Validate { plan_path } } => {
                assert_eq!(plan_path, PathBuf::from("plan.yml"));
            }
            other => panic!("expected Plan Validate, got {other:?}"),
        }
    }
}
