//! CLI argument parsing for taskstore

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "taskstore")]
#[command(author, version, about = "Plan file and status file persistence", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate a plan document: unique ids, acyclic deps, step files exist
    Validate {
        /// Path to the plan document
        #[arg(required = true)]
        plan: PathBuf,
    },

    /// List tasks declared in a plan document
    List {
        /// Path to the plan document
        #[arg(required = true)]
        plan: PathBuf,
    },

    /// Show persisted statuses
    Status {
        /// Path to the status file
        #[arg(required = true)]
        status: PathBuf,
    },
}
