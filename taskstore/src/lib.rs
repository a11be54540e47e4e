//! taskstore — plan file and status file persistence
//!
//! Backs the Task Catalog Repository: parses the declarative YAML plan
//! document, validates its dependency graph, and persists the terminal-state
//! JSON status file atomically. Kept as an independent workspace member so it
//! can be reused or swapped without touching the orchestration engine.

pub mod cli;
pub mod config;
mod error;
mod eventlog;
mod plan;
mod statusfile;

pub use error::StoreError;
pub use eventlog::EventLog;
pub use plan::{Budgets, PlanDocument, PlanTask, SUPPORTED_VERSION};
pub use statusfile::{load_statuses, save_statuses};
