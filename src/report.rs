//! Persisted report artifacts, one markdown document per run.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use chrono::Local;
use thiserror::Error;

use crate::orchestrator::RunSummary;

/// Errors raised while persisting a report.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Raised when file system operations fail.
    #[error("failed to write report to {path}: {message}")]
    Io {
        /// Path that could not be written.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
}

/// Renders the markdown report for one completed run.
#[must_use]
pub fn render(summary: &RunSummary) -> String {
    let mut lines = vec![
        format!("# Test Report: {}", summary.target),
        String::new(),
        format!("**Date:** {}", Local::now().format("%Y-%m-%d %H:%M:%S")),
        format!("**OS Target:** {}", summary.target),
        format!(
            "**Duration:** {:.2} seconds",
            summary.duration.as_secs_f64()
        ),
        String::new(),
        String::from("## Cost Summary"),
        format!("- Instances created: {}", summary.cost.created),
        format!("- Estimated cost: ${:.4}", summary.cost.estimated_cost),
        String::new(),
        String::from("## Test Results"),
        String::new(),
        String::from("| Check | Status | Details |"),
        String::from("|-------|--------|---------|"),
    ];

    for check in &summary.checks {
        let status = if check.passed { "✅ PASS" } else { "❌ FAIL" };
        lines.push(format!(
            "| {} | {status} | {} |",
            check.name,
            table_cell(&check.detail)
        ));
    }

    let cleanup = &summary.cleanup;
    lines.extend([
        String::new(),
        String::from("## Cleanup Status"),
        checklist_line("Instances destroyed", cleanup.instances_destroyed > 0),
        checklist_line("SSH key revoked", cleanup.key_revoked),
        checklist_line(
            "No orphaned resources",
            cleanup.remaining_tagged == Some(0),
        ),
    ]);

    for note in &cleanup.notes {
        lines.push(format!("- note: {note}"));
    }

    lines.push(String::new());
    lines.join("\n")
}

/// Writes the rendered report under `dir`, keyed by timestamp and target.
///
/// The directory is created on demand.
///
/// # Errors
///
/// Returns [`ReportError::Io`] when the directory or file cannot be
/// written.
pub fn write(dir: &Utf8Path, summary: &RunSummary) -> Result<Utf8PathBuf, ReportError> {
    let stamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
    let file_name = format!("{stamp}_{}.md", summary.target);
    let path = dir.join(&file_name);

    Dir::create_ambient_dir_all(dir, ambient_authority()).map_err(|err| ReportError::Io {
        path: dir.to_path_buf(),
        message: err.to_string(),
    })?;
    let handle = Dir::open_ambient_dir(dir, ambient_authority()).map_err(|err| ReportError::Io {
        path: dir.to_path_buf(),
        message: err.to_string(),
    })?;
    handle
        .write(&file_name, render(summary))
        .map_err(|err| ReportError::Io {
            path: path.clone(),
            message: err.to_string(),
        })?;
    Ok(path)
}

fn checklist_line(label: &str, done: bool) -> String {
    let mark = if done { "x" } else { " " };
    format!("- [{mark}] {label}")
}

fn table_cell(raw: &str) -> String {
    raw.replace('|', "\\|").replace(['\n', '\r'], " ")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::guardrails::{CostGuard, CostLimits};
    use crate::orchestrator::{CheckResult, CleanupOutcome};
    use rstest::rstest;
    use tempfile::TempDir;

    fn summary() -> RunSummary {
        RunSummary {
            target: String::from("ubuntu-24-04"),
            checks: vec![
                CheckResult {
                    name: String::from("basic shell access"),
                    passed: true,
                    detail: String::from("Linux gauntlet 6.8"),
                },
                CheckResult {
                    name: String::from("os verification"),
                    passed: false,
                    detail: String::from("No such file | directory"),
                },
            ],
            duration: Duration::from_secs(90),
            cost: CostGuard::new(CostLimits::new(6, 60, 0.00893)).summary(),
            cleanup: CleanupOutcome {
                instances_destroyed: 1,
                key_revoked: true,
                remaining_tagged: Some(0),
                notes: Vec::new(),
            },
        }
    }

    #[rstest]
    fn render_emits_one_row_per_check() {
        let rendered = render(&summary());

        assert!(rendered.contains("| basic shell access | ✅ PASS |"));
        assert!(rendered.contains("| os verification | ❌ FAIL |"));
        assert!(rendered.contains("- [x] Instances destroyed"));
        assert!(rendered.contains("- [x] No orphaned resources"));
    }

    #[rstest]
    fn render_escapes_table_cells() {
        let rendered = render(&summary());
        assert!(
            rendered.contains("No such file \\| directory"),
            "pipes in details must not break the table"
        );
    }

    #[rstest]
    fn write_persists_the_artifact_keyed_by_target() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let dir = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|err| panic!("utf8 path: {}", err.display()));

        let path = write(&dir, &summary()).unwrap_or_else(|err| panic!("write: {err}"));

        assert!(path.as_str().ends_with("_ubuntu-24-04.md"), "path: {path}");
        let contents =
            std::fs::read_to_string(&path).unwrap_or_else(|err| panic!("read back: {err}"));
        assert!(contents.starts_with("# Test Report: ubuntu-24-04"));
    }
}
