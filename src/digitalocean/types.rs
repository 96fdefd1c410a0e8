//! Wire types for the DigitalOcean v2 API.

use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::provider::{InstanceRecord, InstanceStatus, SshKeyRecord};

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(crate) struct Droplet {
    pub(crate) id: u64,
    pub(crate) name: String,
    pub(crate) status: String,
    #[serde(default)]
    pub(crate) tags: Vec<String>,
    #[serde(default)]
    pub(crate) networks: Networks,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub(crate) struct Networks {
    #[serde(default)]
    pub(crate) v4: Vec<NetworkV4>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(crate) struct NetworkV4 {
    pub(crate) ip_address: String,
    #[serde(rename = "type")]
    pub(crate) kind: String,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(crate) struct DropletEnvelope {
    pub(crate) droplet: Droplet,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(crate) struct DropletListEnvelope {
    #[serde(default)]
    pub(crate) droplets: Vec<Droplet>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(crate) struct SshKey {
    pub(crate) id: u64,
    pub(crate) name: String,
    pub(crate) public_key: String,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(crate) struct SshKeyEnvelope {
    pub(crate) ssh_key: SshKey,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(crate) struct SshKeyListEnvelope {
    #[serde(default)]
    pub(crate) ssh_keys: Vec<SshKey>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub(crate) message: String,
}

#[derive(Clone, Debug, Serialize)]
pub(crate) struct CreateDropletBody<'a> {
    pub(crate) name: &'a str,
    pub(crate) region: &'a str,
    pub(crate) size: &'a str,
    pub(crate) image: &'a str,
    pub(crate) ssh_keys: &'a [String],
    pub(crate) tags: &'a [String],
}

#[derive(Clone, Debug, Serialize)]
pub(crate) struct CreateSshKeyBody<'a> {
    pub(crate) name: &'a str,
    pub(crate) public_key: &'a str,
}

impl Droplet {
    /// Extracts the public IPv4 address when networking has been assigned.
    pub(crate) fn public_ip(&self) -> Option<IpAddr> {
        self.networks
            .v4
            .iter()
            .find(|net| net.kind == "public")
            .and_then(|net| IpAddr::from_str(&net.ip_address).ok())
    }
}

impl From<Droplet> for InstanceRecord {
    fn from(value: Droplet) -> Self {
        let public_ip = value.public_ip();
        Self {
            id: value.id.to_string(),
            name: value.name,
            public_ip,
            status: InstanceStatus::from_provider(&value.status),
            tags: value.tags,
        }
    }
}

impl From<SshKey> for SshKeyRecord {
    fn from(value: SshKey) -> Self {
        Self {
            id: value.id.to_string(),
            name: value.name,
            public_key: value.public_key,
        }
    }
}
