//! Exercises the `forgectl` binary itself, per §2.1's assert_cmd guidance:
//! `StartAutonomousTask` validation rejections surfaced at the process
//! boundary rather than through the library API directly.

use assert_cmd::Command;
use predicates::str::contains;

#[test]
fn start_with_invalid_sla_policy_exits_nonzero() {
    Command::cargo_bin("forgectl")
        .unwrap()
        .args(["start", "add endpoint", "--project", "/tmp", "--sla", "bogus"])
        .assert()
        .failure()
        .stderr(contains("sla policy must be lite, standard, or strict"));
}

#[test]
fn start_with_empty_task_description_exits_nonzero() {
    Command::cargo_bin("forgectl")
        .unwrap()
        .args(["start", "", "--project", "/tmp"])
        .assert()
        .failure()
        .stderr(contains("task description must not be empty"));
}

#[test]
fn plan_validate_rejects_a_circular_dependency_plan() {
    let dir = tempfile::tempdir().unwrap();
    let plan_path = dir.path().join("plan.yml");
    std::fs::write(
        &plan_path,
        "version: 1\ntasks:\n  - id: a\n    name: A\n    dependsOn: [b]\n  - id: b\n    name: B\n    dependsOn: [a]\n",
    )
    .unwrap();

    Command::cargo_bin("forgectl")
        .unwrap()
        .args(["plan", "validate", "--plan", plan_path.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(contains("circular dependency"));
}
