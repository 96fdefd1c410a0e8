//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeSet, HashMap};
use std::env;
use std::ffi::OsString;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::provider::{
    InstanceRecord, InstanceSpec, InstanceStatus, Provider, ProviderFuture, SshKeyRecord,
};
use crate::remote::{CommandOutput, CommandRunner, RemoteError};

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: std::rc::Rc<std::cell::RefCell<std::collections::VecDeque<CommandOutput>>>,
    invocations: std::rc::Rc<std::cell::RefCell<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Standard input content, when the invocation piped any.
    pub input: Option<String>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a specific exit code.
    pub fn push_exit_code(&self, code: i32) {
        self.push_output(Some(code), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes a response with no exit code to simulate abnormal termination.
    pub fn push_missing_exit_code(&self) {
        self.push_output(None, "", "");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses.borrow_mut().push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }

    fn record_and_pop(
        &self,
        program: &str,
        args: &[OsString],
        input: Option<&str>,
    ) -> Result<CommandOutput, RemoteError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
            input: input.map(str::to_owned),
        });
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| RemoteError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RemoteError> {
        self.record_and_pop(program, args, None)
    }

    fn run_with_input(
        &self,
        program: &str,
        args: &[OsString],
        input: &str,
    ) -> Result<CommandOutput, RemoteError> {
        self.record_and_pop(program, args, Some(input))
    }
}

/// Error type raised by [`FakeProvider`] when scripted to fail.
#[derive(Clone, Debug, thiserror::Error, Eq, PartialEq)]
#[error("{0}")]
pub struct FakeProviderError(pub String);

/// Address assigned to fake instances once they report active.
pub const FAKE_PUBLIC_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 10));

#[derive(Debug, Default)]
struct FakeProviderState {
    instances: Vec<InstanceRecord>,
    polls_until_active: HashMap<String, u32>,
    never_activate: bool,
    fail_destroy_ids: BTreeSet<String>,
    keys: Vec<SshKeyRecord>,
    key_uploads: u32,
    next_id: u64,
}

/// In-memory provider double with scripted activation behaviour.
///
/// Instances created through the fake progress from provisioning to active
/// after a configurable number of status polls, mirroring how a real
/// provider exposes boot latency.
#[derive(Clone, Debug, Default)]
pub struct FakeProvider {
    state: Arc<Mutex<FakeProviderState>>,
}

fn lock_state(state: &Arc<Mutex<FakeProviderState>>) -> MutexGuard<'_, FakeProviderState> {
    state
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl FakeProvider {
    /// Creates a fake provider whose instances activate on the first poll.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires `polls` status polls before a new instance reports active.
    pub fn set_polls_until_active(&self, polls: u32) {
        let mut state = lock_state(&self.state);
        state.polls_until_active.insert(String::new(), polls);
    }

    /// Keeps every instance provisioning forever, for timeout scenarios.
    pub fn set_never_activate(&self) {
        lock_state(&self.state).never_activate = true;
    }

    /// Makes destroy calls for `id` fail.
    pub fn fail_destroy(&self, id: impl Into<String>) {
        lock_state(&self.state).fail_destroy_ids.insert(id.into());
    }

    /// Seeds a pre-existing instance record.
    pub fn seed_instance(&self, record: InstanceRecord) {
        lock_state(&self.state).instances.push(record);
    }

    /// Seeds a pre-existing SSH key record.
    pub fn seed_key(&self, record: SshKeyRecord) {
        lock_state(&self.state).keys.push(record);
    }

    /// Returns how many key uploads have been issued.
    #[must_use]
    pub fn key_uploads(&self) -> u32 {
        lock_state(&self.state).key_uploads
    }

    /// Returns a snapshot of the live (non-destroyed) instances.
    #[must_use]
    pub fn live_instances(&self) -> Vec<InstanceRecord> {
        lock_state(&self.state)
            .instances
            .iter()
            .filter(|record| record.status != InstanceStatus::Destroyed)
            .cloned()
            .collect()
    }
}

impl Provider for FakeProvider {
    type Error = FakeProviderError;

    fn create_instance<'a>(
        &'a self,
        spec: &'a InstanceSpec,
    ) -> ProviderFuture<'a, InstanceRecord, Self::Error> {
        Box::pin(async move {
            let mut state = lock_state(&self.state);
            state.next_id += 1;
            let id = state.next_id.to_string();
            let polls = state
                .polls_until_active
                .get("")
                .copied()
                .unwrap_or_default();
            state.polls_until_active.insert(id.clone(), polls);
            let record = InstanceRecord {
                id: id.clone(),
                name: spec.name.clone(),
                public_ip: None,
                status: InstanceStatus::Provisioning,
                tags: spec.tags.clone(),
            };
            state.instances.push(record.clone());
            Ok(record)
        })
    }

    fn get_instance<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, InstanceRecord, Self::Error> {
        Box::pin(async move {
            let mut state = lock_state(&self.state);
            if state.never_activate {
                return state
                    .instances
                    .iter()
                    .find(|record| record.id == id)
                    .cloned()
                    .ok_or_else(|| FakeProviderError(format!("unknown instance {id}")));
            }

            let remaining = state.polls_until_active.get(id).copied().unwrap_or(0);
            if remaining > 0 {
                state
                    .polls_until_active
                    .insert(id.to_owned(), remaining - 1);
            }
            let activate = remaining == 0;
            let record = state
                .instances
                .iter_mut()
                .find(|record| record.id == id)
                .ok_or_else(|| FakeProviderError(format!("unknown instance {id}")))?;
            if activate && record.status == InstanceStatus::Provisioning {
                record.status = InstanceStatus::Active;
                record.public_ip = Some(FAKE_PUBLIC_IP);
            }
            Ok(record.clone())
        })
    }

    fn list_instances<'a>(
        &'a self,
        tag: Option<&'a str>,
    ) -> ProviderFuture<'a, Vec<InstanceRecord>, Self::Error> {
        Box::pin(async move {
            let state = lock_state(&self.state);
            Ok(state
                .instances
                .iter()
                .filter(|record| record.status != InstanceStatus::Destroyed)
                .filter(|record| {
                    tag.is_none_or(|wanted| record.tags.iter().any(|t| t == wanted))
                })
                .cloned()
                .collect())
        })
    }

    fn destroy_instance<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = lock_state(&self.state);
            if state.fail_destroy_ids.contains(id) {
                return Err(FakeProviderError(format!("destroy of {id} refused")));
            }
            if let Some(record) = state.instances.iter_mut().find(|record| record.id == id) {
                record.status = InstanceStatus::Destroyed;
            }
            Ok(())
        })
    }

    fn list_ssh_keys(&self) -> ProviderFuture<'_, Vec<SshKeyRecord>, Self::Error> {
        Box::pin(async move { Ok(lock_state(&self.state).keys.clone()) })
    }

    fn create_ssh_key<'a>(
        &'a self,
        name: &'a str,
        public_key: &'a str,
    ) -> ProviderFuture<'a, SshKeyRecord, Self::Error> {
        Box::pin(async move {
            let mut state = lock_state(&self.state);
            state.key_uploads += 1;
            state.next_id += 1;
            let record = SshKeyRecord {
                id: state.next_id.to_string(),
                name: name.to_owned(),
                public_key: public_key.to_owned(),
            };
            state.keys.push(record.clone());
            Ok(record)
        })
    }

    fn destroy_ssh_key<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = lock_state(&self.state);
            state.keys.retain(|key| key.id != id);
            Ok(())
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: tokio::sync::MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets one environment variable while holding the global mutex.
    pub async fn set_var(key: &str, value: &str) -> Self {
        Self::set_vars(&[(key, value)]).await
    }

    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
