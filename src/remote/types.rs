//! Core remote-execution types and the command runner abstraction.

use std::ffi::OsString;
use std::io::Write;
use std::process::{Command, Stdio};

use crate::remote::RemoteError;

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Result of one remote command, as observed by the caller.
///
/// The exit status is the authoritative pass/fail signal; nothing in this
/// layer infers success from output text.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandResult {
    /// Exit status reported by the remote shell, if available.
    pub exit_code: Option<i32>,
    /// Captured standard output, decoded permissively.
    pub stdout: String,
    /// Captured standard error, decoded permissively.
    pub stderr: String,
}

impl CommandResult {
    /// Returns `true` when the remote exit status equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Spawn`] if the command cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RemoteError>;

    /// Runs `program` feeding `input` to its standard input.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Spawn`] if the command cannot be started or
    /// its stdin cannot be written.
    fn run_with_input(
        &self,
        program: &str,
        args: &[OsString],
        input: &str,
    ) -> Result<CommandOutput, RemoteError>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner;

fn spawn_error(program: &str, err: &std::io::Error) -> RemoteError {
    RemoteError::Spawn {
        program: program.to_owned(),
        message: err.to_string(),
    }
}

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RemoteError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| spawn_error(program, &err))?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn run_with_input(
        &self,
        program: &str,
        args: &[OsString],
        input: &str,
    ) -> Result<CommandOutput, RemoteError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| spawn_error(program, &err))?;

        if let Some(stdin) = child.stdin.take() {
            let mut handle = stdin;
            handle
                .write_all(input.as_bytes())
                .map_err(|err| spawn_error(program, &err))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|err| spawn_error(program, &err))?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
