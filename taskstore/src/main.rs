use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;

use taskstore::cli::{Cli, Command};
use taskstore::config::Config;
use taskstore::{PlanDocument, load_statuses};

fn setup_logging() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
    Ok(())
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    let _config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("taskstore starting");

    match cli.command {
        Command::Validate { plan } => {
            let doc = PlanDocument::load(&plan)?;
            let base_dir = plan.parent().unwrap_or_else(|| std::path::Path::new("."));
            doc.validate(base_dir)?;
            println!("{} plan is valid ({} tasks)", "✓".green(), doc.tasks.len());
        }
        Command::List { plan } => {
            let doc = PlanDocument::load(&plan)?;
            for task in &doc.tasks {
                println!(
                    "{} {} deps={:?} status={}",
                    task.id.cyan(),
                    task.name,
                    task.depends_on,
                    task.status.yellow()
                );
            }
        }
        Command::Status { status } => {
            let statuses = load_statuses(&status)?;
            if statuses.is_empty() {
                println!("No statuses recorded");
            } else {
                for (id, state) in statuses {
                    println!("{}: {}", id.cyan(), state.yellow());
                }
            }
        }
    }

    Ok(())
}
