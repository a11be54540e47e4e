//! Task and step identifier generation
//!
//! Task ids allocated by the orchestrator follow `autonomous_<unix-seconds>`.
//! Step ids are deterministically derived from the owning task id and the
//! step's name so that two plans built for the same task are referentially
//! comparable — no randomness, no uuid, just a stable format.

/// Allocate a new task id from a Unix-seconds timestamp.
pub fn autonomous_task_id(unix_seconds: i64) -> String {
    format!("autonomous_{unix_seconds}")
}

/// Derive a deterministic step id from a task id and a step name.
///
/// The name is slugified (lowercase, non-alphanumeric runs collapsed to a
/// single hyphen) so the same step name always yields the same id for a
/// given task, which is what lets the executor and repair loop compare two
/// plans of the same task by id.
pub fn derive_step_id(task_id: &str, step_name: &str) -> String {
    format!("{task_id}::{}", slugify(step_name))
}

fn slugify(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_autonomous_task_id_format() {
        assert_eq!(autonomous_task_id(1_700_000_000), "autonomous_1700000000");
    }

    #[test]
    fn test_derive_step_id_is_deterministic() {
        let a = derive_step_id("autonomous_1", "Build Project");
        let b = derive_step_id("autonomous_1", "Build Project");
        assert_eq!(a, b);
        assert_eq!(a, "autonomous_1::build-project");
    }

    #[test]
    fn test_derive_step_id_differs_by_task() {
        let a = derive_step_id("autonomous_1", "Build");
        let b = derive_step_id("autonomous_2", "Build");
        assert_ne!(a, b);
    }

    #[test]
    fn test_slugify_collapses_punctuation() {
        assert_eq!(slugify("Run /ping Endpoint!!"), "run-ping-endpoint");
    }
}
