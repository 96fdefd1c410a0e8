//! Shared fixtures for run BDD scenarios.

use std::sync::Arc;

use gauntlet::test_support::{FakeProvider, ScriptedRunner};
use gauntlet::{Check, OsFamily, OsTarget, RemoteConfig, RunOutcome};
use rstest::fixture;
use tempfile::TempDir;
use thiserror::Error;

/// Tag shared by every scenario run.
pub const SESSION_TAG: &str = "gauntlet-test";

#[derive(Clone, Debug)]
pub struct RunContext {
    pub provider: FakeProvider,
    pub runner: ScriptedRunner,
    pub remote: RemoteConfig,
    pub outcome: Option<RunResult>,
    pub(crate) key_tmp: Arc<TempDir>,
}

#[derive(Clone, Debug)]
pub enum RunResult {
    Completed(RunOutcome),
    Fatal(String),
}

#[derive(Clone, Debug, Error)]
pub enum RunTestError {
    #[error("failed to create key material: {0}")]
    KeyMaterial(String),
}

#[fixture]
pub fn run_context() -> RunContext {
    build_run_context().unwrap_or_else(|err| panic!("run context fixture should initialise: {err}"))
}

pub fn build_run_context() -> Result<RunContext, RunTestError> {
    let tmp_dir =
        TempDir::new().map_err(|err| RunTestError::KeyMaterial(format!("tempdir: {err}")))?;
    let key_path = tmp_dir.path().join("id_ed25519.pub");
    std::fs::write(&key_path, "ssh-ed25519 AAAA gauntlet\n")
        .map_err(|err| RunTestError::KeyMaterial(err.to_string()))?;

    Ok(RunContext {
        provider: FakeProvider::new(),
        runner: ScriptedRunner::new(),
        remote: remote_config(&key_path.to_string_lossy()),
        outcome: None,
        key_tmp: Arc::new(tmp_dir),
    })
}

pub fn target() -> OsTarget {
    OsTarget {
        name: String::from("ubuntu-24-04"),
        image: String::from("ubuntu-24-04-x64"),
        family: OsFamily::Debian,
        package_manager: String::from("apt"),
        setup_commands: Vec::new(),
    }
}

pub fn checks() -> Vec<Check> {
    vec![
        Check::new("exec false", "false"),
        Check::new("basic shell access", "uname -a"),
    ]
}

fn remote_config(public_key_file: &str) -> RemoteConfig {
    RemoteConfig {
        ssh_bin: String::from("ssh"),
        scp_bin: String::from("scp"),
        ssh_user: String::from("root"),
        ssh_port: 22,
        ssh_batch_mode: true,
        ssh_strict_host_key_checking: false,
        ssh_known_hosts_file: String::from("/dev/null"),
        ssh_identity_file: None,
        ssh_public_key_file: Some(public_key_file.to_owned()),
    }
}
