//! Command-line interface definitions for the `gauntlet` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `gauntlet` binary.
#[derive(Debug, Parser)]
#[command(
    name = "gauntlet",
    about = "Provision ephemeral VMs across an OS matrix and run verification checks",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Run the verification checks against one OS target.
    #[command(name = "run", about = "Run the verification checks against one OS target")]
    Run(RunCommand),
    /// Run the verification checks against every matrix target.
    #[command(
        name = "matrix",
        about = "Run the verification checks against every matrix target"
    )]
    Matrix(MatrixCommand),
    /// List the OS targets the matrix currently resolves to.
    #[command(name = "targets", about = "List the OS targets and their images")]
    Targets,
}

/// Arguments for the `gauntlet run` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct RunCommand {
    /// OS target name from the matrix (for example `ubuntu-24-04`).
    #[arg(long, value_name = "NAME", default_value = "ubuntu-24-04")]
    pub(crate) target: String,
}

/// Arguments for the `gauntlet matrix` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct MatrixCommand {
    /// Restrict the matrix to one family (`debian` or `rhel`).
    #[arg(long, value_name = "FAMILY")]
    pub(crate) family: Option<String>,
}
