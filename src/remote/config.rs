//! Remote shell configuration and validation.
//!
//! [`RemoteConfig`] holds the SSH and SCP settings loaded via
//! `ortho-config`, which merges defaults, configuration files, and
//! environment variables.

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// SSH and transfer settings loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "GAUNTLET_REMOTE",
    discovery(
        app_name = "gauntlet",
        env_var = "GAUNTLET_CONFIG_PATH",
        config_file_name = "gauntlet.toml",
        dotfile_name = ".gauntlet.toml",
        project_file_name = "gauntlet.toml"
    )
)]
pub struct RemoteConfig {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `scp` executable used for file transfer.
    #[ortho_config(default = "scp".to_owned())]
    pub scp_bin: String,
    /// Remote user to connect as.
    #[ortho_config(default = "root".to_owned())]
    pub ssh_user: String,
    /// TCP port for SSH on the target instance.
    #[ortho_config(default = 22)]
    pub ssh_port: u16,
    /// Whether to force batch mode for SSH to avoid password prompts.
    #[ortho_config(default = true)]
    pub ssh_batch_mode: bool,
    /// Whether to enforce host key checking; defaults to disabling to smooth
    /// ephemeral hosts.
    #[ortho_config(default = false)]
    pub ssh_strict_host_key_checking: bool,
    /// Known hosts file override; defaults to `/dev/null` for ephemeral hosts.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub ssh_known_hosts_file: String,
    /// Path to the SSH private key file for remote authentication. Supports
    /// tilde expansion (`~/.ssh/id_ed25519`). Optional; when not provided,
    /// SSH falls back to its default key locations. Validation rejects empty
    /// or whitespace-only values.
    pub ssh_identity_file: Option<String>,
    /// Path to the public key that gets uploaded to the provider. Defaults
    /// to the identity file path with `.pub` appended when unset.
    pub ssh_public_key_file: Option<String>,
}

/// Errors raised when loading the remote configuration from layered sources.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum RemoteConfigLoadError {
    /// Indicates that parsing or merging configuration layers failed.
    #[error("remote configuration parsing failed: {0}")]
    Parse(String),
}

impl RemoteConfig {
    /// Ensures configuration values are present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidConfig`] when any required field is
    /// empty.
    pub fn validate(&self) -> Result<(), RemoteError> {
        Self::require_value(&self.ssh_bin, "ssh_bin")?;
        Self::require_value(&self.scp_bin, "scp_bin")?;
        Self::require_value(&self.ssh_user, "ssh_user")?;
        Self::require_optional_value(self.ssh_identity_file.as_deref(), "ssh_identity_file")?;
        Self::require_optional_value(self.ssh_public_key_file.as_deref(), "ssh_public_key_file")?;
        Ok(())
    }

    /// Loads configuration using defaults, configuration files, and
    /// environment variables, without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteConfigLoadError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, RemoteConfigLoadError> {
        Self::load_from_iter([std::ffi::OsString::from("gauntlet")])
            .map_err(|err| RemoteConfigLoadError::Parse(err.to_string()))
    }

    /// Returns the public key path, deriving `<identity>.pub` when unset.
    #[must_use]
    pub fn public_key_path(&self) -> Option<Utf8PathBuf> {
        match self.ssh_public_key_file {
            Some(ref explicit) => Some(Utf8PathBuf::from(expand_tilde(explicit))),
            None => self
                .ssh_identity_file
                .as_ref()
                .map(|identity| Utf8PathBuf::from(format!("{}.pub", expand_tilde(identity)))),
        }
    }

    fn require_optional_value(value: Option<&str>, field: &str) -> Result<(), RemoteError> {
        match value {
            None => Ok(()),
            Some(v) if !v.trim().is_empty() => Ok(()),
            Some(_) => Err(RemoteError::InvalidConfig {
                field: field.to_owned(),
            }),
        }
    }

    fn require_value(value: &str, field: &str) -> Result<(), RemoteError> {
        Self::require_optional_value(Some(value), field)
    }
}

/// Expands a leading `~/` prefix to the user's home directory.
///
/// If the `HOME` environment variable is not set, the input is returned
/// unchanged.
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}

/// Errors surfaced while connecting, executing, or transferring files.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RemoteError {
    /// Raised when configuration is missing required values. The error
    /// message includes guidance on how to provide the value.
    #[error("missing {field}: set GAUNTLET_REMOTE_{env_suffix} or add {field} to [remote] in gauntlet.toml", env_suffix = field.to_uppercase())]
    InvalidConfig {
        /// Configuration field that failed validation.
        field: String,
    },
    /// Raised when a command is issued before [`connect`] succeeded.
    ///
    /// [`connect`]: crate::remote::RemoteExecutor::connect
    #[error("no open connection; call connect first")]
    NotConnected,
    /// Raised when authentication never succeeded within the retry budget.
    #[error("failed to connect after {attempts} attempts: {message}")]
    Connect {
        /// Number of attempts performed before giving up.
        attempts: u32,
        /// Failure detail from the final attempt.
        message: String,
    },
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when a local file expected for transfer does not exist.
    #[error("transfer source missing: {path}")]
    MissingSource {
        /// Path that was expected to exist locally.
        path: Utf8PathBuf,
    },
    /// Raised when a transfer command completes with a non-zero exit code.
    #[error("{program} exited with status {status_text}: {stderr}")]
    Transfer {
        /// Command name used for the attempted operation.
        program: String,
        /// Exit status as reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the process.
        stderr: String,
    },
}
