//! Core library for the Gauntlet OS-matrix verification harness.
//!
//! The crate provisions short-lived virtual machines across a matrix of
//! operating-system targets, executes verification commands on them over
//! SSH, enforces advisory cost/time guardrails on the session, and
//! guarantees that every provisioned resource is torn down regardless of
//! how the run ends.

pub mod catalog;
pub mod config;
pub mod controller;
pub mod digitalocean;
pub mod guardrails;
pub mod orchestrator;
pub mod poll;
pub mod provider;
pub mod remote;
pub mod report;
pub mod session;
pub mod test_support;

pub use catalog::{CatalogError, OsFamily, OsTarget, OsTargetCatalog};
pub use config::{ConfigError, HarnessConfig, ProviderConfig};
pub use controller::{
    CleanupReport, ControllerError, DestroyTarget, ResourceController,
};
pub use digitalocean::{DigitalOceanError, DigitalOceanProvider};
pub use guardrails::{CostGuard, CostLimits, CostSummary};
pub use orchestrator::{
    Check, CheckResult, CleanupOutcome, ProbeSpec, RunError, RunOutcome, RunSummary,
    TestOrchestrator, default_checks,
};
pub use provider::{
    InstanceRecord, InstanceSpec, InstanceStatus, Provider, ProviderError, SshKeyRecord,
};
pub use remote::{
    CommandResult, CommandRunner, ExecOptions, ProcessCommandRunner, RemoteConfig, RemoteError,
    RemoteExecutor,
};
pub use report::ReportError;
pub use session::{GuardOutcome, SessionGuard, SweepSummary};
