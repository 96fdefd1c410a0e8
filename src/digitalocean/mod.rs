//! DigitalOcean implementation of the provider boundary.
//!
//! A thin typed client over the v2 REST API. Destroy calls treat a 404 as
//! success so the at-least-once contract of the boundary holds.

mod error;
mod types;

use std::sync::LazyLock;
use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::provider::{InstanceRecord, InstanceSpec, Provider, ProviderFuture, SshKeyRecord};
use types::{
    ApiErrorBody, CreateDropletBody, CreateSshKeyBody, DropletEnvelope, DropletListEnvelope,
    SshKeyEnvelope, SshKeyListEnvelope,
};

pub use error::DigitalOceanError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_API_BASE: &str = "https://api.digitalocean.com/v2";
const LIST_PAGE_SIZE: u32 = 200;
const STATUS_NOT_FOUND: u16 = 404;

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Provider that provisions droplets through the DigitalOcean v2 API.
#[derive(Clone, Debug)]
pub struct DigitalOceanProvider {
    token: String,
    api_base: String,
}

impl DigitalOceanProvider {
    /// Constructs a provider from an API token.
    ///
    /// # Errors
    ///
    /// Returns [`DigitalOceanError::Config`] when the token is blank.
    pub fn new(token: impl Into<String>) -> Result<Self, DigitalOceanError> {
        let trimmed = token.into().trim().to_owned();
        if trimmed.is_empty() {
            return Err(DigitalOceanError::Config(String::from(
                "missing DigitalOcean API token",
            )));
        }
        Ok(Self {
            token: trimmed,
            api_base: DEFAULT_API_BASE.to_owned(),
        })
    }

    /// Overrides the API base URL.
    ///
    /// This is primarily used by tests to point at a local stub server.
    #[must_use]
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_owned();
        self
    }

    fn request(&self, method: Method, endpoint: &str) -> RequestBuilder {
        HTTP_CLIENT
            .request(method, format!("{}{endpoint}", self.api_base))
            .bearer_auth(&self.token)
    }

    async fn send(
        &self,
        builder: RequestBuilder,
        endpoint: &str,
    ) -> Result<Response, DigitalOceanError> {
        let response = builder
            .send()
            .await
            .map_err(|err| DigitalOceanError::Transport {
                endpoint: endpoint.to_owned(),
                message: err.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = match response.json::<ApiErrorBody>().await {
            Ok(body) if !body.message.is_empty() => body.message,
            _ => String::from("no error detail provided"),
        };
        Err(DigitalOceanError::Api {
            endpoint: endpoint.to_owned(),
            status: status.as_u16(),
            message,
        })
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        endpoint: &str,
    ) -> Result<T, DigitalOceanError> {
        let response = self.send(builder, endpoint).await?;
        response
            .json::<T>()
            .await
            .map_err(|err| DigitalOceanError::Decode {
                endpoint: endpoint.to_owned(),
                message: err.to_string(),
            })
    }

    async fn delete_allowing_missing(&self, endpoint: &str) -> Result<(), DigitalOceanError> {
        match self
            .send(self.request(Method::DELETE, endpoint), endpoint)
            .await
        {
            Ok(_) => Ok(()),
            Err(DigitalOceanError::Api { status, .. }) if status == STATUS_NOT_FOUND => Ok(()),
            Err(other) => Err(other),
        }
    }
}

impl Provider for DigitalOceanProvider {
    type Error = DigitalOceanError;

    fn create_instance<'a>(
        &'a self,
        spec: &'a InstanceSpec,
    ) -> ProviderFuture<'a, InstanceRecord, Self::Error> {
        Box::pin(async move {
            spec.validate()?;
            let endpoint = "/droplets";
            let body = CreateDropletBody {
                name: &spec.name,
                region: &spec.region,
                size: &spec.size,
                image: &spec.image,
                ssh_keys: &spec.ssh_key_ids,
                tags: &spec.tags,
            };
            let envelope: DropletEnvelope = self
                .send_json(self.request(Method::POST, endpoint).json(&body), endpoint)
                .await?;
            Ok(InstanceRecord::from(envelope.droplet))
        })
    }

    fn get_instance<'a>(
        &'a self,
        id: &'a str,
    ) -> ProviderFuture<'a, InstanceRecord, Self::Error> {
        Box::pin(async move {
            let endpoint = format!("/droplets/{id}");
            let envelope: DropletEnvelope = self
                .send_json(self.request(Method::GET, &endpoint), &endpoint)
                .await?;
            Ok(InstanceRecord::from(envelope.droplet))
        })
    }

    fn list_instances<'a>(
        &'a self,
        tag: Option<&'a str>,
    ) -> ProviderFuture<'a, Vec<InstanceRecord>, Self::Error> {
        Box::pin(async move {
            let endpoint = tag.map_or_else(
                || format!("/droplets?per_page={LIST_PAGE_SIZE}"),
                |name| format!("/droplets?per_page={LIST_PAGE_SIZE}&tag_name={name}"),
            );
            let envelope: DropletListEnvelope = self
                .send_json(self.request(Method::GET, &endpoint), &endpoint)
                .await?;
            Ok(envelope
                .droplets
                .into_iter()
                .map(InstanceRecord::from)
                .collect())
        })
    }

    fn destroy_instance<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let endpoint = format!("/droplets/{id}");
            self.delete_allowing_missing(&endpoint).await
        })
    }

    fn list_ssh_keys(&self) -> ProviderFuture<'_, Vec<SshKeyRecord>, Self::Error> {
        Box::pin(async move {
            let endpoint = format!("/account/keys?per_page={LIST_PAGE_SIZE}");
            let envelope: SshKeyListEnvelope = self
                .send_json(self.request(Method::GET, &endpoint), &endpoint)
                .await?;
            Ok(envelope
                .ssh_keys
                .into_iter()
                .map(SshKeyRecord::from)
                .collect())
        })
    }

    fn create_ssh_key<'a>(
        &'a self,
        name: &'a str,
        public_key: &'a str,
    ) -> ProviderFuture<'a, SshKeyRecord, Self::Error> {
        Box::pin(async move {
            let endpoint = "/account/keys";
            let body = CreateSshKeyBody { name, public_key };
            let envelope: SshKeyEnvelope = self
                .send_json(self.request(Method::POST, endpoint).json(&body), endpoint)
                .await?;
            Ok(SshKeyRecord::from(envelope.ssh_key))
        })
    }

    fn destroy_ssh_key<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let endpoint = format!("/account/keys/{id}");
            self.delete_allowing_missing(&endpoint).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn new_rejects_blank_tokens() {
        let err = DigitalOceanProvider::new("   ").expect_err("blank token should fail");
        assert!(matches!(err, DigitalOceanError::Config(_)));
    }

    #[rstest]
    fn with_api_base_strips_trailing_slashes() {
        let provider = DigitalOceanProvider::new("tok")
            .unwrap_or_else(|err| panic!("provider: {err}"))
            .with_api_base("http://127.0.0.1:8080/");
        assert_eq!(provider.api_base, "http://127.0.0.1:8080");
    }
}
