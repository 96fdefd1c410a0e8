//! Instance lifecycle control and credential management.
//!
//! The controller owns the bookkeeping for every instance it creates so a
//! later [`cleanup`](ResourceController::cleanup) can sweep stragglers even
//! when individual destroy calls were skipped by an earlier failure.

use std::time::Duration;

use thiserror::Error;

use crate::poll::{Budget, PollError, poll};
use crate::provider::{InstanceRecord, InstanceSpec, InstanceStatus, Provider, SshKeyRecord};

const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Identifies the instance a destroy call should act on.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DestroyTarget {
    /// A live record previously returned by [`ResourceController::create`].
    Record(InstanceRecord),
    /// A name or provider identifier, resolved by scanning known instances.
    Named(String),
}

impl From<InstanceRecord> for DestroyTarget {
    fn from(value: InstanceRecord) -> Self {
        Self::Record(value)
    }
}

impl From<&str> for DestroyTarget {
    fn from(value: &str) -> Self {
        Self::Named(value.to_owned())
    }
}

impl From<String> for DestroyTarget {
    fn from(value: String) -> Self {
        Self::Named(value)
    }
}

/// Errors surfaced by the controller.
#[derive(Debug, Error)]
pub enum ControllerError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when the creation request itself fails.
    #[error("failed to create instance: {0}")]
    Provision(#[source] E),
    /// Raised when an instance never reached the active state in time.
    #[error("instance {name} did not become active within {}s", timeout.as_secs())]
    ProvisioningTimeout {
        /// Name of the instance that timed out.
        name: String,
        /// Wait budget that was exhausted.
        timeout: Duration,
    },
    /// Wrapper for provider failures on any other operation.
    #[error("provider error: {0}")]
    Provider(#[source] E),
}

/// Outcome of a best-effort cleanup pass.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CleanupReport {
    /// Number of tracked instances destroyed.
    pub destroyed: usize,
    /// Human-readable notes for destroy calls that failed and were
    /// swallowed.
    pub notes: Vec<String>,
}

/// Creates, polls, and destroys instances through a [`Provider`].
#[derive(Clone, Debug)]
pub struct ResourceController<P: Provider> {
    provider: P,
    poll_interval: Duration,
    tracked: Vec<InstanceRecord>,
}

impl<P: Provider> ResourceController<P> {
    /// Creates a controller over the given provider.
    #[must_use]
    pub const fn new(provider: P) -> Self {
        Self {
            provider,
            poll_interval: STATUS_POLL_INTERVAL,
            tracked: Vec::new(),
        }
    }

    /// Overrides the status polling interval.
    ///
    /// This is primarily used by tests to keep timeout scenarios fast.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Returns the instances created through this controller that have not
    /// yet been destroyed by it.
    #[must_use]
    pub fn tracked_instances(&self) -> &[InstanceRecord] {
        &self.tracked
    }

    /// Creates a new instance and tracks it for later cleanup.
    ///
    /// When `wait` is set, the instance status is polled at a fixed interval
    /// until it reports active or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Provision`] when the creation request
    /// fails and [`ControllerError::ProvisioningTimeout`] naming the
    /// instance when the wait budget runs out.
    pub async fn create(
        &mut self,
        spec: &InstanceSpec,
        wait: bool,
        timeout: Duration,
    ) -> Result<InstanceRecord, ControllerError<P::Error>> {
        let record = self
            .provider
            .create_instance(spec)
            .await
            .map_err(ControllerError::Provision)?;
        self.tracked.push(record.clone());

        if !wait {
            return Ok(record);
        }

        let provider = &self.provider;
        let id = record.id.clone();
        let outcome = poll(Budget::Deadline(timeout), self.poll_interval, || {
            let instance_id = id.clone();
            async move {
                let refreshed = provider.get_instance(&instance_id).await?;
                Ok((refreshed.status == InstanceStatus::Active).then_some(refreshed))
            }
        })
        .await;

        match outcome {
            Ok(active) => {
                if let Some(tracked) = self.tracked.iter_mut().find(|item| item.id == active.id) {
                    *tracked = active.clone();
                }
                Ok(active)
            }
            Err(PollError::Exhausted { .. }) => Err(ControllerError::ProvisioningTimeout {
                name: record.name,
                timeout,
            }),
            Err(PollError::Probe(err)) => Err(ControllerError::Provider(err)),
        }
    }

    /// Destroys one instance, by record or by name/id string.
    ///
    /// A name or id that matches no known instance is a silent no-op: the
    /// resource is already gone and that is the desired state.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Provider`] when the provider rejects the
    /// destroy for a reason other than the instance being absent.
    pub async fn destroy(
        &mut self,
        target: impl Into<DestroyTarget>,
    ) -> Result<(), ControllerError<P::Error>> {
        let resolved = match target.into() {
            DestroyTarget::Record(record) => Some(record.id),
            DestroyTarget::Named(needle) => self.resolve(&needle).await?,
        };
        let Some(id) = resolved else {
            return Ok(());
        };

        self.provider
            .destroy_instance(&id)
            .await
            .map_err(ControllerError::Provider)?;
        self.tracked.retain(|record| record.id != id);
        Ok(())
    }

    /// Resolves a name or id string by scanning all known instances.
    async fn resolve(&self, needle: &str) -> Result<Option<String>, ControllerError<P::Error>> {
        let known = self
            .provider
            .list_instances(None)
            .await
            .map_err(ControllerError::Provider)?;
        Ok(known
            .into_iter()
            .find(|record| record.name == needle || record.id == needle)
            .map(|record| record.id))
    }

    /// Destroys every instance carrying `tag` and returns how many were
    /// destroyed.
    ///
    /// The provider's at-least-once destroy semantics make repeat sweeps
    /// safe.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Provider`] when discovery or a destroy
    /// call fails.
    pub async fn destroy_all(&mut self, tag: &str) -> Result<usize, ControllerError<P::Error>> {
        let tagged = self
            .provider
            .list_instances(Some(tag))
            .await
            .map_err(ControllerError::Provider)?;

        let mut count = 0;
        for record in tagged {
            self.provider
                .destroy_instance(&record.id)
                .await
                .map_err(ControllerError::Provider)?;
            self.tracked.retain(|item| item.id != record.id);
            count += 1;
        }
        Ok(count)
    }

    /// Returns an existing SSH key record matching the content or name, or
    /// uploads the key and returns the new record.
    ///
    /// Calling this twice with identical content never issues a second
    /// upload.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Provider`] when listing or uploading
    /// fails.
    pub async fn get_or_create_ssh_key(
        &self,
        public_key: &str,
        name: &str,
    ) -> Result<SshKeyRecord, ControllerError<P::Error>> {
        let existing = self
            .provider
            .list_ssh_keys()
            .await
            .map_err(ControllerError::Provider)?;
        if let Some(record) = existing
            .into_iter()
            .find(|key| key.public_key == public_key || key.name == name)
        {
            return Ok(record);
        }

        self.provider
            .create_ssh_key(name, public_key)
            .await
            .map_err(ControllerError::Provider)
    }

    /// Revokes one SSH key record.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Provider`] when the provider rejects the
    /// revocation.
    pub async fn revoke_ssh_key(&self, id: &str) -> Result<(), ControllerError<P::Error>> {
        self.provider
            .destroy_ssh_key(id)
            .await
            .map_err(ControllerError::Provider)
    }

    /// Lists instances carrying `tag`, for post-cleanup verification.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Provider`] when discovery fails.
    pub async fn list_by_tag(
        &self,
        tag: &str,
    ) -> Result<Vec<InstanceRecord>, ControllerError<P::Error>> {
        self.provider
            .list_instances(Some(tag))
            .await
            .map_err(ControllerError::Provider)
    }

    /// Best-effort destroy of every tracked instance.
    ///
    /// Individual failures are swallowed into the report so one refusal
    /// never prevents attempting the rest.
    pub async fn cleanup(&mut self) -> CleanupReport {
        let mut report = CleanupReport::default();
        for record in std::mem::take(&mut self.tracked) {
            match self.provider.destroy_instance(&record.id).await {
                Ok(()) => report.destroyed += 1,
                Err(err) => report.notes.push(format!(
                    "failed to destroy {} ({}): {err}",
                    record.name, record.id
                )),
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeProvider;
    use rstest::rstest;

    fn spec(name: &str) -> InstanceSpec {
        InstanceSpec::builder()
            .name(name)
            .image("ubuntu-24-04-x64")
            .region("nyc3")
            .size("s-1vcpu-1gb")
            .tags(vec![String::from("gauntlet-test")])
            .build()
            .unwrap_or_else(|err| panic!("spec: {err}"))
    }

    fn make_controller(provider: &FakeProvider) -> ResourceController<FakeProvider> {
        ResourceController::new(provider.clone()).with_poll_interval(Duration::from_millis(1))
    }

    #[rstest]
    #[tokio::test]
    async fn create_waits_until_the_instance_is_active() {
        let provider = FakeProvider::new();
        provider.set_polls_until_active(2);
        let mut controller = make_controller(&provider);

        let record = controller
            .create(&spec("gauntlet-ubuntu"), true, Duration::from_secs(1))
            .await
            .unwrap_or_else(|err| panic!("create: {err}"));

        assert_eq!(record.status, InstanceStatus::Active);
        assert!(record.public_ip.is_some());
        assert_eq!(controller.tracked_instances().len(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn create_timeout_names_the_instance() {
        let provider = FakeProvider::new();
        provider.set_never_activate();
        let mut controller = make_controller(&provider);

        let err = controller
            .create(&spec("gauntlet-fedora"), true, Duration::from_millis(10))
            .await
            .expect_err("create should time out");

        let rendered = err.to_string();
        assert!(
            rendered.contains("gauntlet-fedora"),
            "timeout should name the instance: {rendered}"
        );
        // The stuck instance stays tracked so cleanup can sweep it.
        assert_eq!(controller.tracked_instances().len(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn create_without_wait_returns_immediately() {
        let provider = FakeProvider::new();
        provider.set_polls_until_active(5);
        let mut controller = make_controller(&provider);

        let record = controller
            .create(&spec("gauntlet-debian"), false, Duration::from_secs(1))
            .await
            .unwrap_or_else(|err| panic!("create: {err}"));

        assert_eq!(record.status, InstanceStatus::Provisioning);
    }

    #[rstest]
    #[tokio::test]
    async fn destroy_of_an_unknown_name_is_a_no_op() {
        let provider = FakeProvider::new();
        let mut controller = make_controller(&provider);

        controller
            .destroy("no-such-instance")
            .await
            .unwrap_or_else(|err| panic!("destroy should be a no-op: {err}"));
    }

    #[rstest]
    #[case(true)]
    #[case(false)]
    #[tokio::test]
    async fn destroy_resolves_strings_by_name_or_id(#[case] by_name: bool) {
        let provider = FakeProvider::new();
        let mut controller = make_controller(&provider);
        let record = controller
            .create(&spec("gauntlet-alma"), true, Duration::from_secs(1))
            .await
            .unwrap_or_else(|err| panic!("create: {err}"));

        let needle = if by_name {
            record.name.clone()
        } else {
            record.id.clone()
        };
        controller
            .destroy(needle)
            .await
            .unwrap_or_else(|err| panic!("destroy: {err}"));

        assert!(provider.live_instances().is_empty());
        assert!(controller.tracked_instances().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn destroy_all_sweeps_only_tagged_instances() {
        let provider = FakeProvider::new();
        let mut controller = make_controller(&provider);
        controller
            .create(&spec("gauntlet-a"), true, Duration::from_secs(1))
            .await
            .unwrap_or_else(|err| panic!("create: {err}"));
        controller
            .create(&spec("gauntlet-b"), true, Duration::from_secs(1))
            .await
            .unwrap_or_else(|err| panic!("create: {err}"));
        let mut untagged = spec("bystander");
        untagged.tags = vec![String::from("other")];
        controller
            .create(&untagged, true, Duration::from_secs(1))
            .await
            .unwrap_or_else(|err| panic!("create: {err}"));

        let count = controller
            .destroy_all("gauntlet-test")
            .await
            .unwrap_or_else(|err| panic!("destroy_all: {err}"));

        assert_eq!(count, 2);
        let remaining = provider.live_instances();
        assert_eq!(remaining.len(), 1);
        assert_eq!(
            remaining.first().map(|record| record.name.as_str()),
            Some("bystander")
        );
    }

    #[rstest]
    #[tokio::test]
    async fn get_or_create_never_uploads_identical_content_twice() {
        let provider = FakeProvider::new();
        let controller = make_controller(&provider);

        let first = controller
            .get_or_create_ssh_key("ssh-ed25519 AAAA gauntlet", "gauntlet-key")
            .await
            .unwrap_or_else(|err| panic!("first key: {err}"));
        let second = controller
            .get_or_create_ssh_key("ssh-ed25519 AAAA gauntlet", "gauntlet-key")
            .await
            .unwrap_or_else(|err| panic!("second key: {err}"));

        assert_eq!(first, second);
        assert_eq!(provider.key_uploads(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn get_or_create_matches_existing_names() {
        let provider = FakeProvider::new();
        provider.seed_key(crate::provider::SshKeyRecord {
            id: String::from("99"),
            name: String::from("gauntlet-key"),
            public_key: String::from("ssh-ed25519 BBBB other"),
        });
        let controller = make_controller(&provider);

        let record = controller
            .get_or_create_ssh_key("ssh-ed25519 AAAA gauntlet", "gauntlet-key")
            .await
            .unwrap_or_else(|err| panic!("key: {err}"));

        assert_eq!(record.id, "99");
        assert_eq!(provider.key_uploads(), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn cleanup_swallows_individual_failures() {
        let provider = FakeProvider::new();
        let mut controller = make_controller(&provider);
        let stubborn = controller
            .create(&spec("gauntlet-stuck"), true, Duration::from_secs(1))
            .await
            .unwrap_or_else(|err| panic!("create: {err}"));
        controller
            .create(&spec("gauntlet-fine"), true, Duration::from_secs(1))
            .await
            .unwrap_or_else(|err| panic!("create: {err}"));
        provider.fail_destroy(stubborn.id.clone());

        let report = controller.cleanup().await;

        assert_eq!(report.destroyed, 1);
        assert_eq!(report.notes.len(), 1);
        assert!(controller.tracked_instances().is_empty());
    }
}
