//! VirtualMachineInstance resource management
//!
//! Provides monitoring and status checking for KubeVirt VMI resources.

use anyhow::{Context, Result};
use kube::api::Api;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::k8s::K8sClient;

/// Condition reported once the guest agent is reachable
pub const CONDITION_AGENT_CONNECTED: &str = "AgentConnected";

/// VirtualMachineInstance custom resource specification
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "kubevirt.io",
    version = "v1",
    kind = "VirtualMachineInstance",
    plural = "virtualmachineinstances",
    shortname = "vmi",
    namespaced,
    status = "VirtualMachineInstanceStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceSpec {
    /// Domain specification (same as VM template)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<serde_json::Value>,
}

/// VMI Status
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Node name where VMI is running
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<VmiCondition>,

    /// Interfaces with IP addresses
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<VmiInterface>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub migration_state: Option<MigrationState>,
}

/// VMI Condition
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VmiCondition {
    #[serde(rename = "type")]
    pub condition_type: String,

    /// Condition status (True, False, Unknown)
    pub status: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// VMI network interface
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VmiInterface {
    /// Interface name, matching the VM spec network name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_addresses: Vec<String>,

    /// Interface name inside guest
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface_name: Option<String>,
}

/// Migration state
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MigrationState {
    #[serde(default)]
    pub completed: bool,

    #[serde(default)]
    pub failed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_node: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_node: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub migration_uid: Option<String>,
}

/// VMI phases
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VmiPhase {
    Pending,
    Scheduling,
    Scheduled,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl VmiPhase {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pending" => VmiPhase::Pending,
            "scheduling" => VmiPhase::Scheduling,
            "scheduled" => VmiPhase::Scheduled,
            "running" => VmiPhase::Running,
            "succeeded" => VmiPhase::Succeeded,
            "failed" => VmiPhase::Failed,
            _ => VmiPhase::Unknown,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, VmiPhase::Succeeded | VmiPhase::Failed)
    }
}

impl VirtualMachineInstanceStatus {
    pub fn has_condition(&self, condition_type: &str, status: &str) -> bool {
        self.conditions
            .iter()
            .any(|c| c.condition_type == condition_type && c.status.eq_ignore_ascii_case(status))
    }

    /// Status entry of the interface named `iface_name`
    pub fn lookup_iface_status(&self, iface_name: &str) -> Option<&VmiInterface> {
        self.interfaces
            .iter()
            .find(|iface| iface.name.as_deref() == Some(iface_name))
    }
}

impl VmiInterface {
    /// First reported IP address, if any
    pub fn ip(&self) -> Option<&str> {
        self.ip_address
            .as_deref()
            .filter(|ip| !ip.is_empty())
            .or_else(|| self.ip_addresses.first().map(String::as_str))
    }
}

/// VMI Manager for monitoring and operations
pub struct VmiManager {
    client: K8sClient,
    poll_interval: Duration,
}

impl VmiManager {
    /// Create a new VMI manager
    pub fn new(client: K8sClient, poll_interval: Duration) -> Self {
        Self {
            client,
            poll_interval,
        }
    }

    fn api(&self, namespace: &str) -> Api<VirtualMachineInstance> {
        Api::namespaced(self.client.client().clone(), namespace)
    }

    /// Get a VMI
    pub async fn get(&self, name: &str, namespace: &str) -> Result<VirtualMachineInstance> {
        self.api(namespace)
            .get(name)
            .await
            .with_context(|| format!("Failed to get VirtualMachineInstance {namespace}/{name}"))
    }

    /// Node where the VMI is running
    pub async fn node(&self, name: &str, namespace: &str) -> Result<String> {
        let vmi = self.get(name, namespace).await?;
        vmi.status
            .and_then(|s| s.node_name)
            .with_context(|| format!("VirtualMachineInstance {namespace}/{name} is not scheduled"))
    }

    /// Wait for a condition to reach `status`
    pub async fn wait_for_condition(
        &self,
        name: &str,
        namespace: &str,
        condition_type: &str,
        status: &str,
        timeout: Duration,
    ) -> Result<()> {
        let start = Instant::now();

        info!(
            "Waiting for VMI {}/{} condition {}={} (timeout: {}s)",
            namespace,
            name,
            condition_type,
            status,
            timeout.as_secs()
        );

        loop {
            match self.get(name, namespace).await {
                Ok(vmi) => {
                    let vmi_status = vmi.status.unwrap_or_default();
                    if vmi_status.has_condition(condition_type, status) {
                        info!("VMI {}/{} has {}={}", namespace, name, condition_type, status);
                        return Ok(());
                    }

                    let phase = vmi_status
                        .phase
                        .as_deref()
                        .map(VmiPhase::from_str)
                        .unwrap_or(VmiPhase::Unknown);
                    if phase.is_terminal() {
                        anyhow::bail!("VMI {namespace}/{name} reached terminal phase {phase:?}");
                    }
                    debug!("VMI {}/{} phase: {:?}", namespace, name, phase);
                }
                Err(e) => {
                    debug!("Error getting VMI: {}", e);
                }
            }

            if start.elapsed() > timeout {
                warn!(
                    "Timeout waiting for VMI {}/{} condition {}",
                    namespace, name, condition_type
                );
                anyhow::bail!(
                    "VMI {namespace}/{name} condition {condition_type} not {status} after {}s",
                    timeout.as_secs()
                );
            }

            sleep(self.poll_interval).await;
        }
    }

    /// Wait for the guest agent to connect
    pub async fn wait_agent_connected(&self, name: &str, namespace: &str, timeout: Duration) -> Result<()> {
        self.wait_for_condition(name, namespace, CONDITION_AGENT_CONNECTED, "True", timeout)
            .await
    }

    /// Wait for the interface `iface_name` to report an IP address
    pub async fn wait_for_interface_ip(
        &self,
        name: &str,
        namespace: &str,
        iface_name: &str,
        timeout: Duration,
    ) -> Result<String> {
        let start = Instant::now();

        loop {
            if let Ok(vmi) = self.get(name, namespace).await {
                let ip = vmi
                    .status
                    .as_ref()
                    .and_then(|s| s.lookup_iface_status(iface_name))
                    .and_then(VmiInterface::ip)
                    .map(str::to_string);
                if let Some(ip) = ip {
                    info!("VMI {}/{} interface {} has IP {}", namespace, name, iface_name, ip);
                    return Ok(ip);
                }
            }

            if start.elapsed() > timeout {
                warn!(
                    "Timeout waiting for VMI {}/{} interface {} IP",
                    namespace, name, iface_name
                );
                anyhow::bail!(
                    "VMI {namespace}/{name} interface {iface_name} has no IP after {}s",
                    timeout.as_secs()
                );
            }

            sleep(self.poll_interval).await;
        }
    }
}
