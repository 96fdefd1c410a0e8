//! Remote command execution and file transfer over the system SSH client.
//!
//! One [`RemoteExecutor`] owns one logical connection to one instance and
//! performs no internal locking; concurrent use from multiple threads is
//! undefined and callers must serialise. Exit codes are preserved so the
//! caller observes the remote status unchanged.

use std::ffi::OsString;
use std::net::IpAddr;
use std::time::Duration;

use camino::Utf8Path;
use shell_escape::unix::escape;

use crate::poll::{Budget, PollError, poll};

mod config;
mod types;

pub use config::{RemoteConfig, RemoteConfigLoadError, RemoteError, expand_tilde};
pub use types::{CommandOutput, CommandResult, CommandRunner, ProcessCommandRunner};

const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-command execution settings.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExecOptions {
    /// Upper bound on the remote command's run time. `None` runs unbounded.
    pub timeout: Option<Duration>,
    /// Whether to prefix the command with the elevation directive.
    pub sudo: bool,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            timeout: Some(DEFAULT_COMMAND_TIMEOUT),
            sudo: false,
        }
    }
}

impl ExecOptions {
    /// Returns options that run the command with `sudo`.
    #[must_use]
    pub fn elevated() -> Self {
        Self {
            sudo: true,
            ..Self::default()
        }
    }
}

/// Exclusive handle to one remote shell target.
#[derive(Clone, Debug)]
pub struct RemoteExecutor<R: CommandRunner> {
    config: RemoteConfig,
    runner: R,
    host: IpAddr,
    connected: bool,
    retry_delay: Duration,
}

impl RemoteExecutor<ProcessCommandRunner> {
    /// Convenience constructor that wires the real process runner.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidConfig`] when validation fails.
    pub fn with_process_runner(config: RemoteConfig, host: IpAddr) -> Result<Self, RemoteError> {
        Self::new(config, ProcessCommandRunner, host)
    }
}

impl<R: CommandRunner> RemoteExecutor<R> {
    /// Creates a new executor for one instance address.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidConfig`] when configuration validation
    /// fails.
    pub fn new(config: RemoteConfig, runner: R, host: IpAddr) -> Result<Self, RemoteError> {
        config.validate()?;
        Ok(Self {
            config,
            runner,
            host,
            connected: false,
            retry_delay: CONNECT_RETRY_DELAY,
        })
    }

    /// Overrides the delay between connection attempts.
    ///
    /// This is primarily used by tests to keep retry scenarios fast.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Returns `true` while the connection is considered live.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connected
    }

    /// Attempts to authenticate against the instance, probing once per
    /// attempt with a fixed inter-attempt delay.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Connect`] embedding the attempt count once
    /// exactly `retries` attempts have failed.
    pub async fn connect(&mut self, timeout: Duration, retries: u32) -> Result<(), RemoteError> {
        let args = self.connect_probe_args(timeout);
        let mut last_failure = String::from("no connection attempts were made");

        let outcome: Result<(), PollError<RemoteError>> =
            poll(Budget::Attempts(retries), self.retry_delay, || {
                let ready = match self.runner.run(&self.config.ssh_bin, &args) {
                    Ok(output) if output.is_success() => true,
                    Ok(output) => {
                        last_failure = describe_probe_failure(&output);
                        false
                    }
                    Err(err) => {
                        last_failure = err.to_string();
                        false
                    }
                };
                async move { Ok(ready.then_some(())) }
            })
            .await;

        match outcome {
            Ok(()) => {
                self.connected = true;
                Ok(())
            }
            Err(PollError::Exhausted { attempts }) => Err(RemoteError::Connect {
                attempts,
                message: last_failure,
            }),
            Err(PollError::Probe(err)) => Err(err),
        }
    }

    /// Executes `command` on the instance and returns its result.
    ///
    /// The command runs synchronously. With `options.sudo` the elevation
    /// directive is prefixed; with a timeout the command is wrapped in the
    /// remote `timeout` utility over a shell-escaped payload. Output streams
    /// are decoded permissively and the exit status is returned verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::NotConnected`] before a successful
    /// [`connect`](Self::connect), or [`RemoteError::Spawn`] when the SSH
    /// client cannot be started.
    pub fn exec(&self, command: &str, options: ExecOptions) -> Result<CommandResult, RemoteError> {
        self.require_connected()?;
        let remote_command = build_remote_command(command, options);
        let args = self.ssh_command_args(&remote_command);
        let output = self.runner.run(&self.config.ssh_bin, &args)?;
        Ok(CommandResult {
            exit_code: output.code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    /// Uploads a local file to `remote_path` on the instance.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::MissingSource`] when the local file does not
    /// exist, or [`RemoteError::Transfer`] when `scp` fails.
    pub fn upload(&self, local_path: &Utf8Path, remote_path: &str) -> Result<(), RemoteError> {
        self.require_connected()?;
        if !local_path.is_file() {
            return Err(RemoteError::MissingSource {
                path: local_path.to_path_buf(),
            });
        }

        let mut args = self.common_options("-P");
        args.push(OsString::from(local_path.as_str()));
        args.push(OsString::from(format!(
            "{}:{remote_path}",
            self.destination()
        )));
        let output = self.runner.run(&self.config.scp_bin, &args)?;
        check_transfer(&self.config.scp_bin, output)
    }

    /// Writes `content` to `remote_path` on the instance.
    ///
    /// The content is piped over the connection's standard input; no local
    /// temporary file is created.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Transfer`] when the remote write fails.
    pub fn upload_content(&self, content: &str, remote_path: &str) -> Result<(), RemoteError> {
        self.require_connected()?;
        let command = format!("cat > {}", escape(remote_path.into()));
        let args = self.ssh_command_args(&command);
        let output = self
            .runner
            .run_with_input(&self.config.ssh_bin, &args, content)?;
        check_transfer(&self.config.ssh_bin, output)
    }

    /// Downloads `remote_path` from the instance to a local file.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Transfer`] when `scp` fails.
    pub fn download(&self, remote_path: &str, local_path: &Utf8Path) -> Result<(), RemoteError> {
        self.require_connected()?;
        let mut args = self.common_options("-P");
        args.push(OsString::from(format!(
            "{}:{remote_path}",
            self.destination()
        )));
        args.push(OsString::from(local_path.as_str()));
        let output = self.runner.run(&self.config.scp_bin, &args)?;
        check_transfer(&self.config.scp_bin, output)
    }

    /// Releases the connection; calling it again is a no-op.
    pub const fn close(&mut self) {
        self.connected = false;
    }

    const fn require_connected(&self) -> Result<(), RemoteError> {
        if self.connected {
            Ok(())
        } else {
            Err(RemoteError::NotConnected)
        }
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.config.ssh_user, self.host)
    }

    fn ssh_command_args(&self, remote_command: &str) -> Vec<OsString> {
        let mut args = self.common_options("-p");
        args.push(OsString::from(self.destination()));
        args.push(OsString::from(remote_command));
        args
    }

    fn connect_probe_args(&self, timeout: Duration) -> Vec<OsString> {
        let mut args = self.common_options("-p");
        args.push(OsString::from("-o"));
        args.push(OsString::from(format!(
            "ConnectTimeout={}",
            timeout.as_secs()
        )));
        args.push(OsString::from(self.destination()));
        args.push(OsString::from("true"));
        args
    }

    fn common_options(&self, port_flag: &str) -> Vec<OsString> {
        let mut args = vec![
            OsString::from(port_flag),
            OsString::from(self.config.ssh_port.to_string()),
        ];

        if let Some(ref identity_file) = self.config.ssh_identity_file {
            let expanded = expand_tilde(identity_file);
            args.push(OsString::from("-i"));
            args.push(OsString::from(expanded));
        }

        if self.config.ssh_batch_mode {
            args.push(OsString::from("-o"));
            args.push(OsString::from("BatchMode=yes"));
        }

        if !self.config.ssh_strict_host_key_checking {
            args.push(OsString::from("-o"));
            args.push(OsString::from("StrictHostKeyChecking=no"));
        }

        if !self.config.ssh_known_hosts_file.trim().is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "UserKnownHostsFile={}",
                self.config.ssh_known_hosts_file
            )));
        }

        args
    }
}

fn check_transfer(program: &str, output: CommandOutput) -> Result<(), RemoteError> {
    if output.is_success() {
        return Ok(());
    }
    let status_text = output
        .code
        .map_or_else(|| String::from("unknown"), |code| code.to_string());
    Err(RemoteError::Transfer {
        program: program.to_owned(),
        status: output.code,
        status_text,
        stderr: output.stderr,
    })
}

fn build_remote_command(command: &str, options: ExecOptions) -> String {
    let bounded = options.timeout.map_or_else(
        || command.to_owned(),
        |limit| {
            format!(
                "timeout {} sh -c {}",
                limit.as_secs(),
                escape(command.into())
            )
        },
    );
    if options.sudo {
        format!("sudo {bounded}")
    } else {
        bounded
    }
}

fn describe_probe_failure(output: &CommandOutput) -> String {
    let stderr = output.stderr.trim();
    let status_text = output
        .code
        .map_or_else(|| String::from("unknown"), |code| code.to_string());
    if stderr.is_empty() {
        format!("probe exited with status {status_text}")
    } else {
        format!("probe exited with status {status_text}: {stderr}")
    }
}
