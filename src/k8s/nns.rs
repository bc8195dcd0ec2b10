//! NodeNetworkState lookups
//!
//! nmstate reports the observed network state of every node in a
//! cluster-scoped `NodeNetworkState` named after the node. Only the parts
//! needed to find an unused NIC are modelled.

use anyhow::{Context, Result};
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind};
use serde::Deserialize;
use tracing::debug;

use super::K8sClient;

/// Observed interface as reported in `status.currentState.interfaces`
#[derive(Clone, Debug, Deserialize, Default)]
pub struct ObservedInterface {
    pub name: String,

    #[serde(rename = "type", default)]
    pub iface_type: String,

    #[serde(default)]
    pub state: String,

    #[serde(default)]
    pub controller: Option<String>,

    #[serde(default)]
    pub ipv4: Option<ObservedIp>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ObservedIp {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub address: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct NnsStatus {
    #[serde(default)]
    current_state: CurrentState,
}

#[derive(Debug, Deserialize, Default)]
struct CurrentState {
    #[serde(default)]
    interfaces: Vec<ObservedInterface>,
}

impl ObservedInterface {
    /// Up ethernet NIC that is neither enslaved nor addressed
    pub fn is_spare(&self) -> bool {
        let addressed = self
            .ipv4
            .as_ref()
            .map(|ip| ip.enabled && !ip.address.is_empty())
            .unwrap_or(false);
        self.iface_type == "ethernet" && self.state == "up" && self.controller.is_none() && !addressed
    }
}

/// Names of the spare NICs in a NodeNetworkState status, in reported order
pub fn available_nics(status: &serde_json::Value) -> Result<Vec<String>> {
    let status: NnsStatus =
        serde_json::from_value(status.clone()).context("Failed to parse NodeNetworkState status")?;
    Ok(status
        .current_state
        .interfaces
        .into_iter()
        .filter(ObservedInterface::is_spare)
        .map(|iface| iface.name)
        .collect())
}

/// NodeNetworkState reader
pub struct NnsManager {
    client: K8sClient,
}

impl NnsManager {
    pub fn new(client: K8sClient) -> Self {
        Self { client }
    }

    fn api(&self) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk("nmstate.io", "v1beta1", "NodeNetworkState");
        let resource = ApiResource::from_gvk(&gvk);
        Api::all_with(self.client.client().clone(), &resource)
    }

    /// Spare NICs of `node`
    pub async fn available_nics(&self, node: &str) -> Result<Vec<String>> {
        let nns = self
            .api()
            .get(node)
            .await
            .with_context(|| format!("Failed to get NodeNetworkState {node}"))?;

        let status = nns
            .data
            .get("status")
            .with_context(|| format!("NodeNetworkState {node} has no status"))?;
        let nics = available_nics(status)?;
        debug!("Spare NICs on {}: {:?}", node, nics);
        Ok(nics)
    }
}
