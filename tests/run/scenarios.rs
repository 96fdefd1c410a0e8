//! BDD scenarios for the verification run workflow.

use rstest_bdd_macros::scenario;

use super::test_helpers::{RunContext, run_context};

#[scenario(
    path = "tests/features/run.feature",
    name = "A failing check does not abort the run"
)]
fn scenario_failing_check_continues(run_context: RunContext) {
    let _ = run_context;
}

#[scenario(
    path = "tests/features/run.feature",
    name = "A fully passing run reports success"
)]
fn scenario_passing_run(run_context: RunContext) {
    let _ = run_context;
}

#[scenario(
    path = "tests/features/run.feature",
    name = "An unreachable shell is fatal but still cleans up"
)]
fn scenario_unreachable_shell_cleans_up(run_context: RunContext) {
    let _ = run_context;
}
