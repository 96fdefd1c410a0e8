//! Binary entry point for the Gauntlet CLI.

use std::io::{self, Write};
use std::process;

use camino::Utf8Path;
use clap::Parser;
use thiserror::Error;
use tokio::task::JoinSet;

use gauntlet::{
    CatalogError, ConfigError, CostGuard, DigitalOceanProvider, GuardOutcome, HarnessConfig,
    OsFamily, OsTarget, OsTargetCatalog, ProbeSpec, ProcessCommandRunner, ProviderConfig,
    RemoteConfig, ResourceController, RunOutcome, SessionGuard, TestOrchestrator, default_checks,
    report,
};

mod cli;
use cli::Cli;

const EXIT_INTERRUPTED: i32 = 130;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("unknown OS target: {0}")]
    UnknownTarget(String),
    #[error("unknown OS family: {0} (expected debian or rhel)")]
    UnknownFamily(String),
}

impl From<ConfigError> for CliError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}

/// Everything one worker needs, loaded once and cloned per target.
struct Session {
    provider: ProviderConfig,
    harness: HarnessConfig,
    remote: RemoteConfig,
    catalog: OsTargetCatalog,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Run(command) => {
            let session = load_session()?;
            let target = session
                .catalog
                .get(&command.target)
                .cloned()
                .ok_or_else(|| CliError::UnknownTarget(command.target.clone()))?;
            run_targets(vec![target], &session).await
        }
        Cli::Matrix(command) => {
            let session = load_session()?;
            let targets = select_targets(&session.catalog, command.family.as_deref())?;
            run_targets(targets, &session).await
        }
        Cli::Targets => {
            let catalog = load_catalog()?;
            list_targets(&catalog)
        }
    }
}

fn load_catalog() -> Result<OsTargetCatalog, CliError> {
    let harness = HarnessConfig::load_without_cli_args()?;
    harness.validate()?;
    Ok(OsTargetCatalog::with_overrides(Utf8Path::new(
        &harness.snapshot_file,
    ))?)
}

fn load_session() -> Result<Session, CliError> {
    let provider = ProviderConfig::load_without_cli_args()?;
    provider.validate()?;
    let harness = HarnessConfig::load_without_cli_args()?;
    harness.validate()?;
    let remote =
        RemoteConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    remote
        .validate()
        .map_err(|err| CliError::Config(err.to_string()))?;
    let catalog = OsTargetCatalog::with_overrides(Utf8Path::new(&harness.snapshot_file))?;

    Ok(Session {
        provider,
        harness,
        remote,
        catalog,
    })
}

fn select_targets(
    catalog: &OsTargetCatalog,
    family: Option<&str>,
) -> Result<Vec<OsTarget>, CliError> {
    match family {
        None => Ok(catalog.get_all().to_vec()),
        Some(name) => {
            let parsed = OsFamily::from_name(name)
                .ok_or_else(|| CliError::UnknownFamily(name.to_owned()))?;
            Ok(catalog
                .get_by_family(parsed)
                .into_iter()
                .cloned()
                .collect())
        }
    }
}

fn list_targets(catalog: &OsTargetCatalog) -> Result<i32, CliError> {
    let mut stdout = io::stdout();
    for target in catalog.get_all() {
        writeln!(
            stdout,
            "{}\t{}\t{}\t{}",
            target.name,
            target.image,
            target.family.as_str(),
            target.package_manager
        )
        .ok();
    }
    Ok(0)
}

/// Output and verdict produced by one matrix worker.
struct WorkerReport {
    target: String,
    passed: bool,
    interrupted: bool,
    lines: Vec<String>,
}

async fn run_targets(targets: Vec<OsTarget>, session: &Session) -> Result<i32, CliError> {
    // One independent worker per matrix entry: each owns its own
    // controller, guard, credential, and connection. Guardrail limits are
    // enforced per worker only.
    let mut workers = JoinSet::new();
    for target in targets {
        workers.spawn(run_worker(
            target,
            session.provider.clone(),
            session.harness.clone(),
            session.remote.clone(),
        ));
    }

    let mut reports = Vec::new();
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(worker) => reports.push(worker),
            Err(err) => reports.push(WorkerReport {
                target: String::from("unknown"),
                passed: false,
                interrupted: false,
                lines: vec![format!("worker failed to complete: {err}")],
            }),
        }
    }
    reports.sort_by(|a, b| a.target.cmp(&b.target));

    let mut stdout = io::stdout();
    for worker in &reports {
        for line in &worker.lines {
            writeln!(stdout, "{line}").ok();
        }
    }

    Ok(exit_code(&reports))
}

fn exit_code(reports: &[WorkerReport]) -> i32 {
    if reports.iter().any(|report| report.interrupted) {
        return EXIT_INTERRUPTED;
    }
    if reports.iter().all(|report| report.passed) {
        0
    } else {
        1
    }
}

async fn run_worker(
    target: OsTarget,
    provider_config: ProviderConfig,
    harness: HarnessConfig,
    remote: RemoteConfig,
) -> WorkerReport {
    let mut verdict = WorkerReport {
        target: target.name.clone(),
        passed: false,
        interrupted: false,
        lines: Vec::new(),
    };

    let provider = match DigitalOceanProvider::new(&provider_config.token) {
        Ok(provider) => provider,
        Err(err) => {
            verdict.lines.push(format!("{}: {err}", target.name));
            return verdict;
        }
    };

    let controller = ResourceController::new(provider.clone());
    let guard = CostGuard::new(harness.cost_limits());
    let mut orchestrator = TestOrchestrator::new(
        controller,
        guard,
        remote,
        ProcessCommandRunner,
        provider_config.region.clone(),
        provider_config.size.clone(),
        harness.session_tag.clone(),
    );
    let mut session_guard = SessionGuard::new(
        ResourceController::new(provider),
        harness.session_tag.clone(),
    );

    let checks = default_checks(&target);
    let probe = harness
        .probe_credential()
        .map(|(url, token)| ProbeSpec { url, token });

    let (outcome, sweep) = session_guard
        .shield(orchestrator.execute(&target, &checks, probe.as_ref()))
        .await;

    if !sweep.notes.is_empty() {
        verdict.lines.push(format!(
            "{}: cleanup notes: {}",
            target.name,
            sweep.notes.join("; ")
        ));
    }

    match outcome {
        GuardOutcome::Interrupted => {
            verdict.interrupted = true;
            verdict.lines.push(format!(
                "{}: interrupted; swept {} tagged instance(s)",
                target.name, sweep.swept
            ));
        }
        GuardOutcome::Completed(Err(err)) => {
            verdict.lines.push(format!("{}: {err}", target.name));
        }
        GuardOutcome::Completed(Ok(RunOutcome::Skipped { reason, .. })) => {
            verdict.passed = true;
            verdict
                .lines
                .push(format!("{}: skipped: {reason}", target.name));
        }
        GuardOutcome::Completed(Ok(RunOutcome::Completed(summary))) => {
            verdict.passed = summary.passed();
            let line = format!(
                "{}: {}/{} checks passed in {:.0}s, estimated cost ${:.4}",
                target.name,
                summary.passed_count(),
                summary.checks.len(),
                summary.duration.as_secs_f64(),
                summary.cost.estimated_cost
            );
            match report::write(Utf8Path::new(&harness.report_dir), &summary) {
                Ok(path) => verdict.lines.push(format!("{line}, report {path}")),
                Err(err) => {
                    verdict
                        .lines
                        .push(format!("{line}; report not written: {err}"));
                }
            }
        }
    }

    verdict
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker_report(target: &str, passed: bool, interrupted: bool) -> WorkerReport {
        WorkerReport {
            target: target.to_owned(),
            passed,
            interrupted,
            lines: Vec::new(),
        }
    }

    #[test]
    fn select_targets_rejects_unknown_families() {
        let catalog = OsTargetCatalog::new();
        let err = select_targets(&catalog, Some("bsd")).expect_err("bsd is not in the matrix");
        assert!(matches!(err, CliError::UnknownFamily(name) if name == "bsd"));
    }

    #[test]
    fn select_targets_filters_by_family() {
        let catalog = OsTargetCatalog::new();
        let targets =
            select_targets(&catalog, Some("debian")).unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(targets.len(), 3);
        assert!(targets.iter().all(|target| target.family == OsFamily::Debian));
    }

    #[test]
    fn select_targets_defaults_to_the_full_matrix() {
        let catalog = OsTargetCatalog::new();
        let targets = select_targets(&catalog, None).unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(targets.len(), catalog.get_all().len());
    }

    #[test]
    fn exit_code_is_zero_only_when_every_worker_passed() {
        assert_eq!(exit_code(&[worker_report("a", true, false)]), 0);
        assert_eq!(
            exit_code(&[
                worker_report("a", true, false),
                worker_report("b", false, false)
            ]),
            1
        );
    }

    #[test]
    fn exit_code_reports_interrupts() {
        assert_eq!(
            exit_code(&[
                worker_report("a", true, false),
                worker_report("b", false, true)
            ]),
            EXIT_INTERRUPTED
        );
    }

    #[test]
    fn write_error_writes_cli_error() {
        let mut buf = Vec::new();
        let err = CliError::UnknownTarget(String::from("windows-11"));
        write_error(&mut buf, &err);
        let rendered = String::from_utf8(buf).unwrap_or_else(|err| panic!("utf8: {err}"));
        assert!(
            rendered.contains("unknown OS target: windows-11"),
            "rendered: {rendered}"
        );
    }
}
