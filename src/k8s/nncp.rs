//! NodeNetworkConfigurationPolicy resource management
//!
//! Desired node network state applied by kubernetes-nmstate. Policies are
//! cluster scoped; a policy is considered applied once its `Available`
//! condition is `True`.

use anyhow::{Context, Result};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{delete_and_wait, K8sClient};

/// Bridge created by OVN-Kubernetes on every node
pub const DEFAULT_OVN_EXTERNAL_BRIDGE: &str = "br-ex";

/// nmstate interface type of an OVS bridge
pub const INTERFACE_TYPE_OVS_BRIDGE: &str = "ovs-bridge";

/// NodeNetworkConfigurationPolicy custom resource specification
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "nmstate.io",
    version = "v1",
    kind = "NodeNetworkConfigurationPolicy",
    plural = "nodenetworkconfigurationpolicies",
    shortname = "nncp",
    status = "NodeNetworkConfigurationPolicyStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct NodeNetworkConfigurationPolicySpec {
    /// Desired node network state
    pub desired_state: DesiredState,

    /// Nodes the policy applies to
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
}

/// nmstate desired state
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
pub struct DesiredState {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<Interface>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ovn: Option<Ovn>,
}

/// OVN section of the desired state
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
pub struct Ovn {
    #[serde(rename = "bridge-mappings", default)]
    pub bridge_mappings: Vec<BridgeMapping>,
}

/// Maps a localnet network name to an OVS bridge
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
pub struct BridgeMapping {
    pub localnet: String,
    pub bridge: String,
    pub state: MappingState,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MappingState {
    #[default]
    Present,
    Absent,
}

/// nmstate interface
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
pub struct Interface {
    pub name: String,

    #[serde(rename = "type")]
    pub iface_type: String,

    pub state: InterfaceState,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<IpConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<IpConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bridge: Option<Bridge>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceState {
    #[default]
    Up,
    Down,
    Absent,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
pub struct IpConfig {
    pub enabled: bool,
}

/// OVS bridge settings
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
pub struct Bridge {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<BridgeOptions>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub port: Vec<Port>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
pub struct BridgeOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stp: Option<Stp>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
pub struct Stp {
    pub enabled: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
pub struct Port {
    pub name: String,
}

/// Policy status
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
pub struct NodeNetworkConfigurationPolicyStatus {
    #[serde(default)]
    pub conditions: Vec<PolicyCondition>,
}

/// Policy condition
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyCondition {
    #[serde(rename = "type")]
    pub condition_type: String,

    pub status: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Where a policy stands after reconciliation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyProgress {
    Available,
    Degraded(String),
    Progressing,
}

impl NodeNetworkConfigurationPolicyStatus {
    fn is_true(&self, condition_type: &str) -> Option<&PolicyCondition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type && c.status.eq_ignore_ascii_case("true"))
    }

    /// Classify the current conditions
    pub fn progress(&self) -> PolicyProgress {
        if let Some(degraded) = self.is_true("Degraded") {
            let detail = degraded
                .message
                .clone()
                .or_else(|| degraded.reason.clone())
                .unwrap_or_else(|| "no message".to_string());
            return PolicyProgress::Degraded(detail);
        }
        if self.is_true("Progressing").is_none() && self.is_true("Available").is_some() {
            return PolicyProgress::Available;
        }
        PolicyProgress::Progressing
    }
}

impl DesiredState {
    /// Same state with every interface and bridge mapping marked absent
    pub fn absent(&self) -> DesiredState {
        DesiredState {
            interfaces: self
                .interfaces
                .iter()
                .map(|iface| Interface {
                    name: iface.name.clone(),
                    iface_type: iface.iface_type.clone(),
                    state: InterfaceState::Absent,
                    ..Default::default()
                })
                .collect(),
            ovn: self.ovn.as_ref().map(|ovn| Ovn {
                bridge_mappings: ovn
                    .bridge_mappings
                    .iter()
                    .map(|m| BridgeMapping {
                        state: MappingState::Absent,
                        ..m.clone()
                    })
                    .collect(),
            }),
        }
    }
}

/// Build a policy object
pub fn new_policy(
    name: &str,
    desired_state: DesiredState,
    node_selector: BTreeMap<String, String>,
) -> NodeNetworkConfigurationPolicy {
    NodeNetworkConfigurationPolicy::new(
        name,
        NodeNetworkConfigurationPolicySpec {
            desired_state,
            node_selector,
        },
    )
}

/// NodeNetworkConfigurationPolicy manager
pub struct NncpManager {
    client: K8sClient,
    poll_interval: Duration,
}

impl NncpManager {
    pub fn new(client: K8sClient, poll_interval: Duration) -> Self {
        Self {
            client,
            poll_interval,
        }
    }

    fn api(&self) -> Api<NodeNetworkConfigurationPolicy> {
        Api::all(self.client.client().clone())
    }

    /// Create a policy
    pub async fn create(
        &self,
        policy: &NodeNetworkConfigurationPolicy,
    ) -> Result<NodeNetworkConfigurationPolicy> {
        let created = self
            .api()
            .create(&PostParams::default(), policy)
            .await
            .context("Failed to create NodeNetworkConfigurationPolicy")?;
        info!(
            "Created NodeNetworkConfigurationPolicy {}",
            created.metadata.name.as_deref().unwrap_or_default()
        );
        Ok(created)
    }

    /// Replace the desired state of an existing policy
    pub async fn update_desired_state(&self, name: &str, desired_state: &DesiredState) -> Result<()> {
        let patch = serde_json::json!({
            "spec": {
                "desiredState": desired_state
            }
        });
        self.api()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .with_context(|| format!("Failed to update NodeNetworkConfigurationPolicy {name}"))?;
        Ok(())
    }

    /// Wait until the policy is Available; Degraded fails immediately
    pub async fn wait_for_status_success(&self, name: &str, timeout: Duration) -> Result<()> {
        let start = Instant::now();

        info!(
            "Waiting for NodeNetworkConfigurationPolicy {} to succeed (timeout: {}s)",
            name,
            timeout.as_secs()
        );

        loop {
            match self.api().get_status(name).await {
                Ok(policy) => {
                    let progress = policy.status.unwrap_or_default().progress();
                    match progress {
                        PolicyProgress::Available => {
                            info!("NodeNetworkConfigurationPolicy {} is available", name);
                            return Ok(());
                        }
                        PolicyProgress::Degraded(detail) => {
                            anyhow::bail!("NodeNetworkConfigurationPolicy {name} degraded: {detail}");
                        }
                        PolicyProgress::Progressing => {
                            debug!("NodeNetworkConfigurationPolicy {} still progressing", name);
                        }
                    }
                }
                Err(e) => debug!("Error getting NodeNetworkConfigurationPolicy status: {}", e),
            }

            if start.elapsed() > timeout {
                warn!("Timeout waiting for NodeNetworkConfigurationPolicy {}", name);
                anyhow::bail!(
                    "NodeNetworkConfigurationPolicy {name} not available after {}s",
                    timeout.as_secs()
                );
            }

            sleep(self.poll_interval).await;
        }
    }

    /// Revert the node state the policy applied, then delete it.
    ///
    /// A failed revert is logged and the policy is deleted anyway.
    pub async fn teardown(&self, name: &str, timeout: Duration) -> Result<()> {
        let revert = async {
            let policy = self
                .api()
                .get(name)
                .await
                .with_context(|| format!("Failed to get NodeNetworkConfigurationPolicy {name}"))?;

            let absent = policy.spec.desired_state.absent();
            self.update_desired_state(name, &absent).await?;
            // Let nmstate pick up the new generation before judging the conditions
            sleep(self.poll_interval).await;
            self.wait_for_status_success(name, timeout).await
        };
        let delete = async {
            delete_and_wait(&self.api(), name, timeout).await?;
            info!("Deleted NodeNetworkConfigurationPolicy {}", name);
            Ok::<_, anyhow::Error>(())
        };

        revert_then_delete(name, revert, delete).await
    }
}

/// Run `revert`, then `delete` whatever the revert outcome
async fn revert_then_delete<R, D>(name: &str, revert: R, delete: D) -> Result<()>
where
    R: Future<Output = Result<()>>,
    D: Future<Output = Result<()>>,
{
    if let Err(e) = revert.await {
        warn!("Reverting NodeNetworkConfigurationPolicy {} failed: {:#}", name, e);
    }
    delete.await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn condition(condition_type: &str, status: &str) -> PolicyCondition {
        PolicyCondition {
            condition_type: condition_type.to_string(),
            status: status.to_string(),
            ..Default::default()
        }
    }

    fn ovs_bridge_state() -> DesiredState {
        DesiredState {
            interfaces: vec![Interface {
                name: "localnet-br".to_string(),
                iface_type: INTERFACE_TYPE_OVS_BRIDGE.to_string(),
                state: InterfaceState::Up,
                ipv4: Some(IpConfig { enabled: false }),
                ipv6: Some(IpConfig { enabled: false }),
                bridge: Some(Bridge {
                    options: Some(BridgeOptions {
                        stp: Some(Stp { enabled: false }),
                    }),
                    port: vec![Port {
                        name: "ens9".to_string(),
                    }],
                }),
            }],
            ovn: Some(Ovn {
                bridge_mappings: vec![BridgeMapping {
                    localnet: "localnet-net".to_string(),
                    bridge: "localnet-br".to_string(),
                    state: MappingState::Present,
                }],
            }),
        }
    }

    #[test]
    fn test_policy_serialization() {
        let mut selector = BTreeMap::new();
        selector.insert("node-role.kubernetes.io/worker".to_string(), String::new());
        let policy = new_policy("test-nncp", ovs_bridge_state(), selector);

        let json = serde_json::to_value(&policy).unwrap();
        assert_eq!(json["apiVersion"], "nmstate.io/v1");
        assert_eq!(json["kind"], "NodeNetworkConfigurationPolicy");

        let state = &json["spec"]["desiredState"];
        assert_eq!(state["interfaces"][0]["type"], "ovs-bridge");
        assert_eq!(state["interfaces"][0]["state"], "up");
        assert_eq!(state["interfaces"][0]["bridge"]["options"]["stp"]["enabled"], false);
        assert_eq!(state["interfaces"][0]["bridge"]["port"][0]["name"], "ens9");
        assert_eq!(state["ovn"]["bridge-mappings"][0]["localnet"], "localnet-net");
        assert_eq!(state["ovn"]["bridge-mappings"][0]["state"], "present");
        assert_eq!(json["spec"]["nodeSelector"]["node-role.kubernetes.io/worker"], "");
    }

    #[test]
    fn test_absent_state() {
        let absent = ovs_bridge_state().absent();
        assert_eq!(absent.interfaces[0].state, InterfaceState::Absent);
        assert!(absent.interfaces[0].bridge.is_none());
        let mapping = &absent.ovn.unwrap().bridge_mappings[0];
        assert_eq!(mapping.state, MappingState::Absent);
        assert_eq!(mapping.bridge, "localnet-br");
    }

    #[test]
    fn test_progress_classification() {
        let available = NodeNetworkConfigurationPolicyStatus {
            conditions: vec![
                condition("Available", "True"),
                condition("Degraded", "False"),
                condition("Progressing", "False"),
            ],
        };
        assert_eq!(available.progress(), PolicyProgress::Available);

        let progressing = NodeNetworkConfigurationPolicyStatus {
            conditions: vec![condition("Available", "True"), condition("Progressing", "True")],
        };
        assert_eq!(progressing.progress(), PolicyProgress::Progressing);

        let mut degraded_condition = condition("Degraded", "True");
        degraded_condition.message = Some("1/2 nodes failed to configure".to_string());
        let degraded = NodeNetworkConfigurationPolicyStatus {
            conditions: vec![degraded_condition],
        };
        assert_eq!(
            degraded.progress(),
            PolicyProgress::Degraded("1/2 nodes failed to configure".to_string())
        );

        assert_eq!(
            NodeNetworkConfigurationPolicyStatus::default().progress(),
            PolicyProgress::Progressing
        );
    }

    #[tokio::test]
    async fn test_teardown_deletes_after_failed_revert() {
        let deleted = std::sync::atomic::AtomicBool::new(false);
        let result = revert_then_delete(
            "localnet-additional-ovs-bridge",
            async { Err::<(), _>(anyhow::anyhow!("Failed to update NodeNetworkConfigurationPolicy")) },
            async {
                deleted.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok::<(), anyhow::Error>(())
            },
        )
        .await;

        assert!(result.is_ok());
        assert!(deleted.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_teardown_reports_failed_delete() {
        let result = revert_then_delete(
            "test-localnet-nncp",
            async { Ok::<(), anyhow::Error>(()) },
            async { Err::<(), _>(anyhow::anyhow!("still terminating")) },
        )
        .await;

        assert!(result.unwrap_err().to_string().contains("still terminating"));
    }
}
