//! NetworkAttachmentDefinition resource management

use anyhow::{Context, Result};
use kube::api::{Api, PostParams};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use super::{delete_and_wait, K8sClient};

const CNI_VERSION: &str = "1.0.0";
const OVN_K8S_CNI_OVERLAY: &str = "ovn-k8s-cni-overlay";

/// NetworkAttachmentDefinition custom resource specification
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "k8s.cni.cncf.io",
    version = "v1",
    kind = "NetworkAttachmentDefinition",
    plural = "network-attachment-definitions",
    shortname = "net-attach-def",
    namespaced
)]
pub struct NetworkAttachmentDefinitionSpec {
    /// CNI configuration, JSON encoded
    pub config: String,
}

/// CNI network configuration list
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetConfig {
    pub cni_version: String,
    pub name: String,
    pub plugins: Vec<CniPluginOvnK8sConfig>,
}

/// OVN-Kubernetes secondary network plugin
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CniPluginOvnK8sConfig {
    #[serde(rename = "type")]
    pub plugin_type: String,

    pub topology: Topology,

    pub net_attach_def_name: String,

    #[serde(rename = "vlanID", skip_serializing_if = "Option::is_none")]
    pub vlan_id: Option<u16>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    Localnet,
}

impl NetConfig {
    /// Localnet config for the attachment `namespace/nad_name`
    pub fn localnet(namespace: &str, nad_name: &str, network_name: &str, vlan_id: Option<u16>) -> Self {
        Self {
            cni_version: CNI_VERSION.to_string(),
            name: network_name.to_string(),
            plugins: vec![CniPluginOvnK8sConfig {
                plugin_type: OVN_K8S_CNI_OVERLAY.to_string(),
                topology: Topology::Localnet,
                net_attach_def_name: format!("{namespace}/{nad_name}"),
                vlan_id,
            }],
        }
    }
}

/// Build a NetworkAttachmentDefinition carrying `config`
pub fn new_attachment(namespace: &str, name: &str, config: &NetConfig) -> Result<NetworkAttachmentDefinition> {
    let encoded = serde_json::to_string(config).context("Failed to encode CNI config")?;
    let mut nad = NetworkAttachmentDefinition::new(name, NetworkAttachmentDefinitionSpec { config: encoded });
    nad.metadata.namespace = Some(namespace.to_string());
    Ok(nad)
}

/// NetworkAttachmentDefinition manager
pub struct NadManager {
    client: K8sClient,
}

impl NadManager {
    pub fn new(client: K8sClient) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<NetworkAttachmentDefinition> {
        Api::namespaced(self.client.client().clone(), namespace)
    }

    /// Create a NetworkAttachmentDefinition
    pub async fn create(&self, nad: &NetworkAttachmentDefinition) -> Result<NetworkAttachmentDefinition> {
        let namespace = nad
            .metadata
            .namespace
            .as_deref()
            .context("NetworkAttachmentDefinition has no namespace")?;
        let created = self
            .api(namespace)
            .create(&PostParams::default(), nad)
            .await
            .context("Failed to create NetworkAttachmentDefinition")?;

        info!(
            "Created NetworkAttachmentDefinition {}/{}",
            namespace,
            created.metadata.name.as_deref().unwrap_or_default()
        );
        Ok(created)
    }

    /// Delete a NetworkAttachmentDefinition
    pub async fn delete(&self, namespace: &str, name: &str, timeout: Duration) -> Result<()> {
        delete_and_wait(&self.api(namespace), name, timeout).await?;
        info!("Deleted NetworkAttachmentDefinition {}/{}", namespace, name);
        Ok(())
    }
}
