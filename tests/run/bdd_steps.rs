//! BDD step definitions for the verification run workflow.

use std::time::Duration;

use gauntlet::test_support::{FakeProvider, ScriptedRunner};
use gauntlet::{CostGuard, CostLimits, ResourceController, RunOutcome, TestOrchestrator};
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;

use super::test_helpers::{RunContext, RunResult, SESSION_TAG, checks, target};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("a provisioned target with a reachable shell")]
fn reachable_shell(run_context: RunContext) -> RunContext {
    run_context.runner.push_success(); // connect probe
    run_context
}

#[given("the first check fails and the second succeeds")]
fn first_check_fails(run_context: RunContext) -> RunContext {
    run_context.runner.push_exit_code(1);
    run_context.runner.push_output(Some(0), "Linux gauntlet", "");
    run_context
}

#[given("both checks succeed")]
fn both_checks_succeed(run_context: RunContext) -> RunContext {
    run_context.runner.push_success();
    run_context.runner.push_output(Some(0), "Linux gauntlet", "");
    run_context
}

#[given("a provisioned target with an unreachable shell")]
fn unreachable_shell(run_context: RunContext) -> RunContext {
    run_context.runner.push_failure(255);
    run_context.runner.push_failure(255);
    run_context
}

#[when("I execute the verification run")]
fn execute_run(mut run_context: RunContext) -> Result<RunContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;

    let controller = ResourceController::new(run_context.provider.clone())
        .with_poll_interval(Duration::from_millis(1));
    let guard = CostGuard::new(CostLimits::new(6, 60, 0.00893));
    let mut orchestrator: TestOrchestrator<FakeProvider, ScriptedRunner> = TestOrchestrator::new(
        controller,
        guard,
        run_context.remote.clone(),
        run_context.runner.clone(),
        "nyc3",
        "s-1vcpu-1gb",
        SESSION_TAG,
    )
    .with_settle_delay(Duration::ZERO)
    .with_provision_timeout(Duration::from_secs(1))
    .with_connect_retries(2)
    .with_connect_retry_delay(Duration::ZERO);

    let scenario_target = target();
    let scenario_checks = checks();
    let result = runtime.block_on(async {
        orchestrator
            .execute(&scenario_target, &scenario_checks, None)
            .await
    });

    run_context.outcome = Some(match result {
        Ok(outcome) => RunResult::Completed(outcome),
        Err(err) => RunResult::Fatal(err.to_string()),
    });
    Ok(run_context)
}

fn completed_summary(run_context: &RunContext) -> Result<&gauntlet::RunSummary, StepError> {
    match &run_context.outcome {
        Some(RunResult::Completed(RunOutcome::Completed(summary))) => Ok(summary),
        Some(other) => Err(StepError::Assertion(format!(
            "expected a completed run, got {other:?}"
        ))),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

#[then("the summary records one failing and one passing check")]
fn one_failing_one_passing(run_context: &RunContext) -> Result<(), StepError> {
    let summary = completed_summary(run_context)?;
    if summary.passed_count() == 1 && summary.failed_count() == 1 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected 1 pass / 1 fail, got {} / {}",
            summary.passed_count(),
            summary.failed_count()
        )))
    }
}

#[then("the summary records two passing checks")]
fn two_passing(run_context: &RunContext) -> Result<(), StepError> {
    let summary = completed_summary(run_context)?;
    if summary.passed() && summary.checks.len() == 2 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected 2 passing checks, got {} passing of {}",
            summary.passed_count(),
            summary.checks.len()
        )))
    }
}

#[then("the run fails with a connection error")]
fn fails_with_connection_error(run_context: &RunContext) -> Result<(), StepError> {
    match &run_context.outcome {
        Some(RunResult::Fatal(message)) if message.contains("unreachable") => Ok(()),
        Some(other) => Err(StepError::Assertion(format!(
            "expected a connection failure, got {other:?}"
        ))),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

#[then("no tagged instances remain")]
fn no_tagged_instances_remain(run_context: &RunContext) -> Result<(), StepError> {
    if run_context.provider.live_instances().is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "instances remain: {:?}",
            run_context.provider.live_instances()
        )))
    }
}
