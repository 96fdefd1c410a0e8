//! Cloud-provider boundary for provisioning disposable virtual machines.

use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;

use thiserror::Error;

/// Parameters required to create a new instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceSpec {
    /// Instance name shown in the provider console.
    pub name: String,
    /// Provider image identifier or slug to boot from.
    pub image: String,
    /// Region in which to place the instance (for example `nyc3`).
    pub region: String,
    /// Size slug to request (for example `s-1vcpu-1gb`).
    pub size: String,
    /// Identifiers of SSH keys to authorise on the instance.
    pub ssh_key_ids: Vec<String>,
    /// Tags applied at creation for later discovery.
    pub tags: Vec<String>,
}

impl InstanceSpec {
    /// Starts a builder for an [`InstanceSpec`].
    #[must_use]
    pub fn builder() -> InstanceSpecBuilder {
        InstanceSpecBuilder::new()
    }

    /// Validates the spec, returning a descriptive error when a required
    /// field is missing.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Validation`] when any required string field
    /// is empty.
    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.name.is_empty() {
            return Err(ProviderError::Validation("name".to_owned()));
        }
        if self.image.is_empty() {
            return Err(ProviderError::Validation("image".to_owned()));
        }
        if self.region.is_empty() {
            return Err(ProviderError::Validation("region".to_owned()));
        }
        if self.size.is_empty() {
            return Err(ProviderError::Validation("size".to_owned()));
        }
        Ok(())
    }
}

/// Builder for [`InstanceSpec`] that defers trimming and validation to
/// construction.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InstanceSpecBuilder {
    name: String,
    image: String,
    region: String,
    size: String,
    ssh_key_ids: Vec<String>,
    tags: Vec<String>,
}

impl InstanceSpecBuilder {
    /// Creates an empty builder; fields must be populated before build.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the instance name.
    #[must_use]
    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.name = value.into();
        self
    }

    /// Sets the boot image identifier.
    #[must_use]
    pub fn image(mut self, value: impl Into<String>) -> Self {
        self.image = value.into();
        self
    }

    /// Sets the region.
    #[must_use]
    pub fn region(mut self, value: impl Into<String>) -> Self {
        self.region = value.into();
        self
    }

    /// Sets the size slug.
    #[must_use]
    pub fn size(mut self, value: impl Into<String>) -> Self {
        self.size = value.into();
        self
    }

    /// Sets the SSH key identifiers to authorise.
    #[must_use]
    pub fn ssh_key_ids(mut self, value: Vec<String>) -> Self {
        self.ssh_key_ids = value;
        self
    }

    /// Sets the discovery tags.
    #[must_use]
    pub fn tags(mut self, value: Vec<String>) -> Self {
        self.tags = value;
        self
    }

    /// Builds and validates the [`InstanceSpec`], trimming string inputs.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Validation`] when any required field is
    /// empty.
    pub fn build(self) -> Result<InstanceSpec, ProviderError> {
        let spec = InstanceSpec {
            name: self.name.trim().to_owned(),
            image: self.image.trim().to_owned(),
            region: self.region.trim().to_owned(),
            size: self.size.trim().to_owned(),
            ssh_key_ids: self.ssh_key_ids,
            tags: self.tags,
        };
        spec.validate()?;
        Ok(spec)
    }
}

/// Lifecycle state reported by the provider for one instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InstanceStatus {
    /// The instance has been requested but is not yet reachable.
    Provisioning,
    /// The instance is booted and has networking assigned.
    Active,
    /// The instance has been destroyed.
    Destroyed,
}

impl InstanceStatus {
    /// Maps a provider status string onto the lifecycle state.
    ///
    /// Unknown strings are treated as still provisioning so pollers keep
    /// waiting rather than failing on provider vocabulary drift.
    #[must_use]
    pub fn from_provider(raw: &str) -> Self {
        match raw {
            "active" => Self::Active,
            "archive" | "destroyed" => Self::Destroyed,
            _ => Self::Provisioning,
        }
    }

    /// Returns the canonical lowercase name for the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Provisioning => "provisioning",
            Self::Active => "active",
            Self::Destroyed => "destroyed",
        }
    }
}

/// Snapshot of one provider instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceRecord {
    /// Provider-assigned identifier.
    pub id: String,
    /// Instance name.
    pub name: String,
    /// Public IPv4 address, present once networking is assigned.
    pub public_ip: Option<IpAddr>,
    /// Current lifecycle state.
    pub status: InstanceStatus,
    /// Tags attached to the instance.
    pub tags: Vec<String>,
}

/// Record of one uploaded SSH public key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshKeyRecord {
    /// Provider-assigned identifier.
    pub id: String,
    /// Display name of the key.
    pub name: String,
    /// Public key content as uploaded.
    pub public_key: String,
}

/// Errors raised at the provider boundary before a request is submitted.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ProviderError {
    /// Raised when a spec is missing a required field.
    #[error("missing or empty field: {0}")]
    Validation(String),
}

/// Future returned by provider operations.
pub type ProviderFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Minimal interface implemented by cloud providers.
///
/// Destroy operations carry at-least-once semantics: destroying an
/// identifier the provider no longer knows must succeed.
pub trait Provider {
    /// Provider specific error type returned by the implementation.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Submits an instance creation request and returns the initial record.
    fn create_instance<'a>(
        &'a self,
        spec: &'a InstanceSpec,
    ) -> ProviderFuture<'a, InstanceRecord, Self::Error>;

    /// Fetches the current record for one instance.
    fn get_instance<'a>(&'a self, id: &'a str)
    -> ProviderFuture<'a, InstanceRecord, Self::Error>;

    /// Lists instances, optionally filtered by tag.
    fn list_instances<'a>(
        &'a self,
        tag: Option<&'a str>,
    ) -> ProviderFuture<'a, Vec<InstanceRecord>, Self::Error>;

    /// Destroys one instance by identifier.
    fn destroy_instance<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, (), Self::Error>;

    /// Lists all SSH key records on the account.
    fn list_ssh_keys(&self) -> ProviderFuture<'_, Vec<SshKeyRecord>, Self::Error>;

    /// Uploads a public key and returns the new record.
    fn create_ssh_key<'a>(
        &'a self,
        name: &'a str,
        public_key: &'a str,
    ) -> ProviderFuture<'a, SshKeyRecord, Self::Error>;

    /// Revokes one SSH key by identifier.
    fn destroy_ssh_key<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, (), Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn builder_trims_and_validates() {
        let spec = InstanceSpec::builder()
            .name("  web-1  ")
            .image("ubuntu-24-04-x64")
            .region(" nyc3 ")
            .size("s-1vcpu-1gb")
            .build()
            .expect("spec should build");
        assert_eq!(spec.name, "web-1");
        assert_eq!(spec.region, "nyc3");
    }

    #[rstest]
    #[case("name", "", "img", "nyc3", "s-1vcpu-1gb")]
    #[case("image", "web-1", "", "nyc3", "s-1vcpu-1gb")]
    #[case("region", "web-1", "img", "  ", "s-1vcpu-1gb")]
    #[case("size", "web-1", "img", "nyc3", "")]
    fn builder_rejects_missing_fields(
        #[case] expected_field: &str,
        #[case] name: &str,
        #[case] image: &str,
        #[case] region: &str,
        #[case] size: &str,
    ) {
        let err = InstanceSpec::builder()
            .name(name)
            .image(image)
            .region(region)
            .size(size)
            .build()
            .expect_err("expected validation failure");
        assert_eq!(err, ProviderError::Validation(expected_field.to_owned()));
    }

    #[rstest]
    #[case("active", InstanceStatus::Active)]
    #[case("new", InstanceStatus::Provisioning)]
    #[case("off", InstanceStatus::Provisioning)]
    #[case("archive", InstanceStatus::Destroyed)]
    fn status_maps_provider_vocabulary(#[case] raw: &str, #[case] expected: InstanceStatus) {
        assert_eq!(InstanceStatus::from_provider(raw), expected);
    }
}
