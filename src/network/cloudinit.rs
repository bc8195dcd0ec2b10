//! Cloud-init payloads
//!
//! NoCloud network-data (netplan v2) and user-data documents.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;

/// Netplan v2 network configuration
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct NetworkData {
    pub version: u8,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub ethernets: BTreeMap<String, EthernetDevice>,
}

impl NetworkData {
    pub fn new(ethernets: BTreeMap<String, EthernetDevice>) -> Self {
        Self { version: 2, ethernets }
    }

    /// Static addresses on a single guest NIC
    pub fn single(device: &str, addresses: Vec<String>) -> Self {
        Self::new(BTreeMap::from([(
            device.to_string(),
            EthernetDevice { addresses },
        )]))
    }
}

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct EthernetDevice {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,
}

/// cloud-config user data
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct UserData {
    /// An empty list keeps the image's default user untouched
    pub users: Vec<String>,
}

/// Render a document as YAML
pub fn as_yaml<T: Serialize>(document: &T) -> Result<String> {
    serde_yaml::to_string(document).context("Failed to render cloud-init YAML")
}

/// Render user data with the `#cloud-config` header
pub fn format_cloud_config(userdata: &UserData) -> Result<String> {
    Ok(format!("#cloud-config\n{}", as_yaml(userdata)?))
}
