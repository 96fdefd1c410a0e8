//! Orchestrates end-to-end verification runs with guaranteed teardown.
//!
//! A run provisions one instance for one OS target, waits out the opaque
//! boot window, connects over SSH with an extended retry budget, executes
//! the ordered verification checks, and always funnels through the same
//! teardown block before reporting, whatever happened in between.

use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use cap_std::{ambient_authority, fs_utf8::Dir};
use shell_escape::unix::escape;
use thiserror::Error;
use tokio::time::sleep;
use uuid::Uuid;

use crate::catalog::OsTarget;
use crate::controller::{ControllerError, ResourceController};
use crate::guardrails::{CostGuard, CostSummary};
use crate::provider::{InstanceRecord, InstanceSpec, Provider, SshKeyRecord};
use crate::remote::{CommandRunner, ExecOptions, RemoteConfig, RemoteError, RemoteExecutor};

const SETTLE_DELAY: Duration = Duration::from_secs(30);
const PROVISION_TIMEOUT: Duration = Duration::from_secs(300);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
// Extended budget: boot readiness is not observable from outside, so the
// connect loop absorbs the uncertainty.
const CONNECT_RETRIES: u32 = 20;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(5);
const SETUP_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);
const DETAIL_LIMIT: usize = 100;
const PROBE_SCRIPT_PATH: &str = "/tmp/gauntlet_probe.sh";

/// One verification command with its display name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Check {
    /// Display name used in results and reports.
    pub name: String,
    /// Command executed on the instance.
    pub command: String,
    /// Whether to run the command elevated.
    pub sudo: bool,
}

impl Check {
    /// Creates a check that runs unelevated.
    #[must_use]
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            sudo: false,
        }
    }
}

/// Builds the standard connectivity checks for one target.
#[must_use]
pub fn default_checks(target: &OsTarget) -> Vec<Check> {
    vec![
        Check::new("basic shell access", "uname -a"),
        Check::new("os verification", "cat /etc/os-release"),
        Check::new(
            format!("{} package manager", target.package_manager),
            format!("which {}", target.package_manager),
        ),
        Check::new("systemd version", "systemctl --version"),
    ]
}

/// Downstream service endpoint probed with a dedicated credential.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProbeSpec {
    /// HTTPS endpoint to call from the instance.
    pub url: String,
    /// Bearer credential presented to the endpoint.
    pub token: String,
}

/// Recorded outcome of one check.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CheckResult {
    /// Display name of the check.
    pub name: String,
    /// Whether the remote exit status was zero.
    pub passed: bool,
    /// Truncated stdout (pass) or stderr (fail) captured for the report.
    pub detail: String,
}

/// Accounting for the run's unconditional cleanup block.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CleanupOutcome {
    /// Tracked instances destroyed during teardown.
    pub instances_destroyed: usize,
    /// Whether the issued credential was revoked.
    pub key_revoked: bool,
    /// Instances still carrying the session tag after teardown, when the
    /// verification query succeeded.
    pub remaining_tagged: Option<usize>,
    /// Notes for teardown failures that were swallowed.
    pub notes: Vec<String>,
}

/// Structured summary of one completed run.
#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    /// Name of the OS target exercised.
    pub target: String,
    /// Ordered check results.
    pub checks: Vec<CheckResult>,
    /// Wall-clock duration of the run.
    pub duration: Duration,
    /// Guardrail counters at the end of the run.
    pub cost: CostSummary,
    /// Teardown accounting.
    pub cleanup: CleanupOutcome,
}

impl RunSummary {
    /// Returns `true` when every check passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|check| check.passed)
    }

    /// Returns how many checks passed.
    #[must_use]
    pub fn passed_count(&self) -> usize {
        self.checks.iter().filter(|check| check.passed).count()
    }

    /// Returns how many checks failed.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.checks.len() - self.passed_count()
    }
}

/// Result of asking the orchestrator for one run.
#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    /// A guardrail was already exceeded, so no resources were touched.
    Skipped {
        /// Target that would have been exercised.
        target: String,
        /// Which guardrail triggered the skip.
        reason: String,
    },
    /// The run executed and produced a summary.
    Completed(RunSummary),
}

impl RunOutcome {
    /// Returns `true` unless a completed run recorded a failing check.
    #[must_use]
    pub fn passed(&self) -> bool {
        match self {
            Self::Skipped { .. } => true,
            Self::Completed(summary) => summary.passed(),
        }
    }
}

/// Errors surfaced while performing a run.
///
/// Every fatal error raised after provisioning began has already passed
/// through the teardown block; the message carries any teardown notes.
#[derive(Debug, Error)]
pub enum RunError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when key material cannot be read from disk.
    #[error("failed to read key material from {path}: {message}")]
    KeyMaterial {
        /// Path that was expected to hold the public key.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when no public key path is configured.
    #[error("no SSH key configured: set GAUNTLET_REMOTE_SSH_IDENTITY_FILE or ssh_public_key_file")]
    MissingKeyMaterial,
    /// Raised when the credential cannot be prepared.
    #[error("failed to prepare credential: {0}")]
    Credential(#[source] ControllerError<E>),
    /// Raised when the instance spec cannot be assembled from the
    /// configured region and size.
    #[error("invalid instance spec: {message}")]
    InvalidSpec {
        /// Validation failure description including teardown notes.
        message: String,
    },
    /// Raised when provisioning fails or times out.
    #[error("provisioning failed: {message}")]
    Provision {
        /// Failure description including teardown notes.
        message: String,
        /// Underlying controller error.
        #[source]
        source: ControllerError<E>,
    },
    /// Raised when an active instance has no public address to connect to.
    #[error("instance {name} has no public address: {message}")]
    MissingAddress {
        /// Instance name.
        name: String,
        /// Teardown notes recorded while failing.
        message: String,
    },
    /// Raised when the shell stayed unreachable after the retry budget.
    #[error("remote shell unreachable: {message}")]
    Connect {
        /// Failure description including teardown notes.
        message: String,
        /// Underlying connection error.
        #[source]
        source: RemoteError,
    },
    /// Raised when remote execution fails at the transport level.
    #[error("remote execution failed: {message}")]
    Remote {
        /// Failure description including teardown notes.
        message: String,
        /// Underlying remote error.
        #[source]
        source: RemoteError,
    },
}

/// Drives one end-to-end run: guard check, provision, connect, verify,
/// unconditional teardown, summary.
#[derive(Debug)]
pub struct TestOrchestrator<P: Provider, R: CommandRunner + Clone> {
    controller: ResourceController<P>,
    guard: CostGuard,
    remote_config: RemoteConfig,
    runner: R,
    region: String,
    size: String,
    session_tag: String,
    settle_delay: Duration,
    provision_timeout: Duration,
    connect_timeout: Duration,
    connect_retries: u32,
    connect_retry_delay: Duration,
}

impl<P, R> TestOrchestrator<P, R>
where
    P: Provider,
    R: CommandRunner + Clone,
{
    /// Creates a new orchestrator.
    #[must_use]
    pub fn new(
        controller: ResourceController<P>,
        guard: CostGuard,
        remote_config: RemoteConfig,
        runner: R,
        region: impl Into<String>,
        size: impl Into<String>,
        session_tag: impl Into<String>,
    ) -> Self {
        Self {
            controller,
            guard,
            remote_config,
            runner,
            region: region.into(),
            size: size.into(),
            session_tag: session_tag.into(),
            settle_delay: SETTLE_DELAY,
            provision_timeout: PROVISION_TIMEOUT,
            connect_timeout: CONNECT_TIMEOUT,
            connect_retries: CONNECT_RETRIES,
            connect_retry_delay: CONNECT_RETRY_DELAY,
        }
    }

    /// Overrides the post-provision settle delay.
    ///
    /// This is primarily used by tests to keep runs fast.
    #[must_use]
    pub const fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Overrides the provisioning wait budget.
    ///
    /// This is primarily used by tests to keep timeout scenarios fast.
    #[must_use]
    pub const fn with_provision_timeout(mut self, timeout: Duration) -> Self {
        self.provision_timeout = timeout;
        self
    }

    /// Overrides the connect retry budget.
    #[must_use]
    pub const fn with_connect_retries(mut self, retries: u32) -> Self {
        self.connect_retries = retries;
        self
    }

    /// Overrides the delay between connection attempts.
    ///
    /// This is primarily used by tests to keep retry scenarios fast.
    #[must_use]
    pub const fn with_connect_retry_delay(mut self, delay: Duration) -> Self {
        self.connect_retry_delay = delay;
        self
    }

    /// Returns the current guardrail counters.
    #[must_use]
    pub fn cost_summary(&self) -> CostSummary {
        self.guard.summary()
    }

    /// Performs one run against `target`.
    ///
    /// Guardrail violations skip the run without touching any resource.
    /// The teardown block executes on every exit path once provisioning has
    /// been attempted, including fatal errors.
    ///
    /// # Errors
    ///
    /// Returns [`RunError`] for configuration, provisioning, and connection
    /// failures. Failing checks are recorded in the summary, not raised.
    pub async fn execute(
        &mut self,
        target: &OsTarget,
        checks: &[Check],
        probe: Option<&ProbeSpec>,
    ) -> Result<RunOutcome, RunError<P::Error>> {
        if !self.guard.check_instance_limit() {
            return Ok(RunOutcome::Skipped {
                target: target.name.clone(),
                reason: String::from("instance limit reached"),
            });
        }
        if !self.guard.check_timeout() {
            return Ok(RunOutcome::Skipped {
                target: target.name.clone(),
                reason: String::from("session time limit reached"),
            });
        }

        let started = Instant::now();
        let public_key = self.read_public_key()?;
        let key = self
            .controller
            .get_or_create_ssh_key(&public_key, &format!("{}-key", self.session_tag))
            .await
            .map_err(RunError::Credential)?;

        let instance = self.provision_or_teardown(target, &key).await?;
        self.guard.record_instance();

        // The instance's boot process is not observable from outside; give
        // it a fixed head start before probing.
        sleep(self.settle_delay).await;

        let mut executor = self.connect_or_teardown(&instance, &key).await?;
        let results = self
            .run_checks_or_teardown(&executor, target, checks, probe, &key)
            .await?;
        executor.close();

        let cleanup = self.teardown(Some(&key)).await;
        Ok(RunOutcome::Completed(RunSummary {
            target: target.name.clone(),
            checks: results,
            duration: started.elapsed(),
            cost: self.guard.summary(),
            cleanup,
        }))
    }

    async fn provision_or_teardown(
        &mut self,
        target: &OsTarget,
        key: &SshKeyRecord,
    ) -> Result<InstanceRecord, RunError<P::Error>> {
        let built = InstanceSpec::builder()
            .name(format!(
                "gauntlet-{}-{}",
                target.name,
                Uuid::new_v4().simple()
            ))
            .image(&target.image)
            .region(&self.region)
            .size(&self.size)
            .ssh_key_ids(vec![key.id.clone()])
            .tags(vec![self.session_tag.clone()])
            .build();
        let spec = match built {
            Ok(spec) => spec,
            Err(err) => {
                let cleanup = self.teardown(Some(key)).await;
                return Err(RunError::InvalidSpec {
                    message: append_teardown_notes(err.to_string(), &cleanup.notes),
                });
            }
        };

        match self
            .controller
            .create(&spec, true, self.provision_timeout)
            .await
        {
            Ok(record) => Ok(record),
            Err(err) => {
                let cleanup = self.teardown(Some(key)).await;
                Err(RunError::Provision {
                    message: append_teardown_notes(err.to_string(), &cleanup.notes),
                    source: err,
                })
            }
        }
    }

    async fn connect_or_teardown(
        &mut self,
        instance: &InstanceRecord,
        key: &SshKeyRecord,
    ) -> Result<RemoteExecutor<R>, RunError<P::Error>> {
        let Some(address) = instance.public_ip else {
            let cleanup = self.teardown(Some(key)).await;
            return Err(RunError::MissingAddress {
                name: instance.name.clone(),
                message: join_notes(&cleanup.notes),
            });
        };

        let built = RemoteExecutor::new(self.remote_config.clone(), self.runner.clone(), address);
        let mut executor = match built {
            Ok(executor) => executor.with_retry_delay(self.connect_retry_delay),
            Err(err) => {
                let cleanup = self.teardown(Some(key)).await;
                return Err(RunError::Connect {
                    message: append_teardown_notes(err.to_string(), &cleanup.notes),
                    source: err,
                });
            }
        };

        match executor
            .connect(self.connect_timeout, self.connect_retries)
            .await
        {
            Ok(()) => Ok(executor),
            Err(err) => {
                let cleanup = self.teardown(Some(key)).await;
                Err(RunError::Connect {
                    message: append_teardown_notes(err.to_string(), &cleanup.notes),
                    source: err,
                })
            }
        }
    }

    async fn run_checks_or_teardown(
        &mut self,
        executor: &RemoteExecutor<R>,
        target: &OsTarget,
        checks: &[Check],
        probe: Option<&ProbeSpec>,
        key: &SshKeyRecord,
    ) -> Result<Vec<CheckResult>, RunError<P::Error>> {
        match run_checks(executor, target, checks, probe) {
            Ok(results) => Ok(results),
            Err(err) => {
                let cleanup = self.teardown(Some(key)).await;
                Err(RunError::Remote {
                    message: append_teardown_notes(err.to_string(), &cleanup.notes),
                    source: err,
                })
            }
        }
    }

    /// Unconditional teardown: destroy tracked instances, revoke the
    /// credential, re-query the tag to confirm nothing remains.
    ///
    /// Failures are swallowed into notes so the remaining steps always run.
    async fn teardown(&mut self, key: Option<&SshKeyRecord>) -> CleanupOutcome {
        let mut outcome = CleanupOutcome::default();

        let report = self.controller.cleanup().await;
        outcome.instances_destroyed = report.destroyed;
        outcome.notes.extend(report.notes);

        if let Some(record) = key {
            match self.controller.revoke_ssh_key(&record.id).await {
                Ok(()) => outcome.key_revoked = true,
                Err(err) => outcome
                    .notes
                    .push(format!("failed to revoke key {}: {err}", record.name)),
            }
        }

        match self.controller.list_by_tag(&self.session_tag).await {
            Ok(remaining) => outcome.remaining_tagged = Some(remaining.len()),
            Err(err) => outcome
                .notes
                .push(format!("post-cleanup tag query failed: {err}")),
        }

        outcome
    }

    fn read_public_key(&self) -> Result<String, RunError<P::Error>> {
        let path = self
            .remote_config
            .public_key_path()
            .ok_or(RunError::MissingKeyMaterial)?;
        let parent = path
            .parent()
            .map_or_else(|| Utf8PathBuf::from("."), camino::Utf8Path::to_path_buf);
        let file_name = path.file_name().ok_or_else(|| RunError::KeyMaterial {
            path: path.clone(),
            message: String::from("key path is missing a filename"),
        })?;

        let dir = Dir::open_ambient_dir(&parent, ambient_authority()).map_err(|err| {
            RunError::KeyMaterial {
                path: path.clone(),
                message: err.to_string(),
            }
        })?;
        let contents = dir
            .read_to_string(file_name)
            .map_err(|err| RunError::KeyMaterial {
                path: path.clone(),
                message: err.to_string(),
            })?;
        Ok(contents.trim().to_owned())
    }
}

fn run_checks<R: CommandRunner>(
    executor: &RemoteExecutor<R>,
    target: &OsTarget,
    checks: &[Check],
    probe: Option<&ProbeSpec>,
) -> Result<Vec<CheckResult>, RemoteError> {
    let mut results = Vec::new();

    for command in &target.setup_commands {
        let output = executor.exec(
            command,
            ExecOptions {
                timeout: Some(SETUP_COMMAND_TIMEOUT),
                sudo: true,
            },
        )?;
        results.push(CheckResult {
            name: format!("setup: {command}"),
            passed: output.is_success(),
            detail: pick_detail(output.is_success(), &output.stdout, &output.stderr),
        });
    }

    for check in checks {
        let output = executor.exec(
            &check.command,
            ExecOptions {
                sudo: check.sudo,
                ..ExecOptions::default()
            },
        )?;
        results.push(CheckResult {
            name: check.name.clone(),
            passed: output.is_success(),
            detail: pick_detail(output.is_success(), &output.stdout, &output.stderr),
        });
    }

    if let Some(spec) = probe {
        results.push(run_probe(executor, spec)?);
    }

    Ok(results)
}

fn run_probe<R: CommandRunner>(
    executor: &RemoteExecutor<R>,
    spec: &ProbeSpec,
) -> Result<CheckResult, RemoteError> {
    executor.upload_content(&probe_script(spec), PROBE_SCRIPT_PATH)?;
    let output = executor.exec(&format!("sh {PROBE_SCRIPT_PATH}"), ExecOptions::default())?;
    Ok(CheckResult {
        name: String::from("service api connectivity"),
        passed: output.is_success(),
        detail: pick_detail(output.is_success(), &output.stdout, &output.stderr),
    })
}

fn probe_script(spec: &ProbeSpec) -> String {
    let header = escape(format!("Authorization: Bearer {}", spec.token).into()).into_owned();
    let url = escape(spec.url.as_str().into()).into_owned();
    format!("#!/bin/sh\ncurl -fsS -m 30 -H {header} {url}\n")
}

fn pick_detail(passed: bool, stdout: &str, stderr: &str) -> String {
    let raw = if passed { stdout } else { stderr };
    truncate_detail(raw.trim())
}

fn truncate_detail(raw: &str) -> String {
    let mut out: String = raw.chars().take(DETAIL_LIMIT).collect();
    if raw.chars().count() > DETAIL_LIMIT {
        out.push('…');
    }
    out
}

fn join_notes(notes: &[String]) -> String {
    if notes.is_empty() {
        String::from("teardown completed")
    } else {
        notes.join("; ")
    }
}

fn append_teardown_notes(message: String, notes: &[String]) -> String {
    if notes.is_empty() {
        message
    } else {
        format!("{message} (teardown notes: {})", notes.join("; "))
    }
}
