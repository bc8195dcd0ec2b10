//! VirtualMachine resource management
//!
//! CRD types for KubeVirt VirtualMachines, a builder for the VMs the
//! localnet scenarios boot, and lifecycle operations.

use anyhow::{Context, Result};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::k8s::{delete_and_wait, K8sClient};

/// VirtualMachine custom resource specification
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "kubevirt.io",
    version = "v1",
    kind = "VirtualMachine",
    plural = "virtualmachines",
    shortname = "vm",
    namespaced,
    status = "VirtualMachineStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSpec {
    /// Run strategy for the VM
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_strategy: Option<RunStrategy>,

    /// Template for the VMI
    pub template: VmiTemplate,
}

/// How KubeVirt keeps the VMI running
#[derive(Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum RunStrategy {
    Always,
    Halted,
    Manual,
    RerunOnFailure,
}

/// VMI Template specification
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VmiTemplate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<VmiTemplateMetadata>,

    pub spec: VmiTemplateSpec,
}

/// VMI Template metadata
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VmiTemplateMetadata {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// VMI Template spec
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VmiTemplateSpec {
    pub domain: DomainSpec,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<Network>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination_grace_period_seconds: Option<i64>,
}

/// Domain specification for the VM
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DomainSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuSpec>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemorySpec>,

    pub devices: DevicesSpec,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CpuSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cores: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemorySpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest: Option<String>,
}

/// Devices specification
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DevicesSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<Disk>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<Interface>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rng: Option<RngDevice>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
pub struct RngDevice {}

/// Disk device
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    /// Disk name (must match volume name)
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk: Option<DiskTarget>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiskTarget {
    /// Bus type (virtio, sata, scsi)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bus: Option<String>,
}

/// Network interface
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Interface {
    /// Interface name (must match network name)
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bridge: Option<BridgeMode>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
pub struct BridgeMode {}

/// Network configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub multus: Option<MultusNetwork>,
}

/// Multus network configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MultusNetwork {
    /// NetworkAttachmentDefinition name
    pub network_name: String,
}

/// Volume configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_disk: Option<ContainerDiskSource>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_init_no_cloud: Option<CloudInitNoCloud>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDiskSource {
    pub image: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
}

/// Cloud-init NoCloud data source
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloudInitNoCloud {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_data: Option<String>,
}

/// Scheduling affinity (pod anti-affinity only)
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Affinity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_anti_affinity: Option<PodAntiAffinity>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodAntiAffinity {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_during_scheduling_ignored_during_execution: Vec<PodAffinityTerm>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodAffinityTerm {
    pub label_selector: LabelSelector,

    pub topology_key: String,

    /// `Some(default)` selects every namespace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
pub struct LabelSelectorRequirement {
    pub key: String,
    pub operator: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

/// Required anti-affinity against pods labelled `key=value`, one per host
pub fn new_pod_anti_affinity(key: &str, value: &str) -> Affinity {
    Affinity {
        pod_anti_affinity: Some(PodAntiAffinity {
            required_during_scheduling_ignored_during_execution: vec![PodAffinityTerm {
                label_selector: LabelSelector {
                    match_expressions: vec![LabelSelectorRequirement {
                        key: key.to_string(),
                        operator: "In".to_string(),
                        values: vec![value.to_string()],
                    }],
                    ..Default::default()
                },
                topology_key: "kubernetes.io/hostname".to_string(),
                namespace_selector: None,
            }],
        }),
    }
}

/// VirtualMachine status
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineStatus {
    #[serde(default)]
    pub created: bool,

    #[serde(default)]
    pub ready: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub printable_status: Option<String>,
}

/// Builder for the VirtualMachines the suite boots
#[derive(Clone, Debug)]
pub struct VmConfig {
    pub name: String,
    pub namespace: String,
    pub cpu_cores: u32,
    pub memory: String,
    pub image: String,
    pub template_labels: BTreeMap<String, String>,
    pub attachments: Vec<(String, String)>,
    pub cloud_init: Option<CloudInitNoCloud>,
    pub affinity: Option<Affinity>,
}

impl VmConfig {
    /// Create a new VM configuration
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            cpu_cores: 1,
            memory: "1Gi".to_string(),
            image: "quay.io/containerdisks/fedora:latest".to_string(),
            template_labels: BTreeMap::new(),
            attachments: Vec::new(),
            cloud_init: None,
            affinity: None,
        }
    }

    /// Set memory
    pub fn memory(mut self, memory: impl Into<String>) -> Self {
        self.memory = memory.into();
        self
    }

    /// Set container disk image
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Add a label to the VMI template
    pub fn template_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.template_labels.insert(key.into(), value.into());
        self
    }

    /// Attach a bridge-bound interface `iface` to the multus network `nad`
    pub fn multus_bridge(mut self, iface: impl Into<String>, nad: impl Into<String>) -> Self {
        self.attachments.push((iface.into(), nad.into()));
        self
    }

    /// Attach a cloud-init NoCloud disk
    pub fn cloud_init(mut self, data: CloudInitNoCloud) -> Self {
        self.cloud_init = Some(data);
        self
    }

    /// Set scheduling affinity
    pub fn affinity(mut self, affinity: Affinity) -> Self {
        self.affinity = Some(affinity);
        self
    }

    /// Build the VirtualMachine resource, halted
    pub fn build(self) -> VirtualMachine {
        let (interfaces, networks): (Vec<_>, Vec<_>) = self
            .attachments
            .into_iter()
            .map(|(iface, nad)| {
                (
                    Interface {
                        name: iface.clone(),
                        bridge: Some(BridgeMode {}),
                    },
                    Network {
                        name: iface,
                        multus: Some(MultusNetwork { network_name: nad }),
                    },
                )
            })
            .unzip();

        let mut volumes = vec![Volume {
            name: "containerdisk".to_string(),
            container_disk: Some(ContainerDiskSource {
                image: self.image,
                image_pull_policy: Some("IfNotPresent".to_string()),
            }),
            ..Default::default()
        }];
        let mut disks = vec![virtio_disk("containerdisk")];

        if let Some(data) = self.cloud_init {
            volumes.push(Volume {
                name: "cloudinitdisk".to_string(),
                cloud_init_no_cloud: Some(data),
                ..Default::default()
            });
            disks.push(virtio_disk("cloudinitdisk"));
        }

        VirtualMachine {
            metadata: kube::api::ObjectMeta {
                name: Some(self.name),
                namespace: Some(self.namespace),
                ..Default::default()
            },
            spec: VirtualMachineSpec {
                run_strategy: Some(RunStrategy::Halted),
                template: VmiTemplate {
                    metadata: Some(VmiTemplateMetadata {
                        labels: self.template_labels,
                    }),
                    spec: VmiTemplateSpec {
                        domain: DomainSpec {
                            cpu: Some(CpuSpec {
                                cores: Some(self.cpu_cores),
                            }),
                            memory: Some(MemorySpec {
                                guest: Some(self.memory),
                            }),
                            devices: DevicesSpec {
                                disks,
                                interfaces,
                                rng: Some(RngDevice {}),
                            },
                        },
                        networks,
                        volumes,
                        affinity: self.affinity,
                        termination_grace_period_seconds: Some(30),
                    },
                },
            },
            status: None,
        }
    }
}

fn virtio_disk(name: &str) -> Disk {
    Disk {
        name: name.to_string(),
        disk: Some(DiskTarget {
            bus: Some("virtio".to_string()),
        }),
    }
}

/// VirtualMachine manager
pub struct VirtualMachineManager {
    client: K8sClient,
    poll_interval: Duration,
}

impl VirtualMachineManager {
    /// Create a new VM manager
    pub fn new(client: K8sClient, poll_interval: Duration) -> Self {
        Self {
            client,
            poll_interval,
        }
    }

    fn api(&self, namespace: &str) -> Api<VirtualMachine> {
        Api::namespaced(self.client.client().clone(), namespace)
    }

    /// Create a VirtualMachine
    pub async fn create(&self, vm: &VirtualMachine) -> Result<VirtualMachine> {
        let namespace = vm
            .metadata
            .namespace
            .as_deref()
            .context("VirtualMachine has no namespace")?;
        let created = self
            .api(namespace)
            .create(&PostParams::default(), vm)
            .await
            .context("Failed to create VirtualMachine")?;
        info!(
            "Created VirtualMachine {}/{}",
            namespace,
            created.metadata.name.as_deref().unwrap_or_default()
        );
        Ok(created)
    }

    /// Get a VirtualMachine
    pub async fn get(&self, name: &str, namespace: &str) -> Result<VirtualMachine> {
        self.api(namespace)
            .get(name)
            .await
            .context("Failed to get VirtualMachine")
    }

    /// Delete a VirtualMachine and wait until it is gone
    pub async fn delete(&self, name: &str, namespace: &str, timeout: Duration) -> Result<()> {
        delete_and_wait(&self.api(namespace), name, timeout).await?;
        info!("Deleted VirtualMachine {}/{}", namespace, name);
        Ok(())
    }

    async fn set_run_strategy(&self, name: &str, namespace: &str, strategy: RunStrategy) -> Result<()> {
        let patch = serde_json::json!({
            "spec": {
                "runStrategy": strategy
            }
        });
        self.api(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .with_context(|| format!("Failed to set run strategy {strategy:?} on VirtualMachine {namespace}/{name}"))?;
        Ok(())
    }

    /// Start a VirtualMachine
    pub async fn start(&self, name: &str, namespace: &str) -> Result<()> {
        self.set_run_strategy(name, namespace, RunStrategy::Always).await?;
        info!("Started VirtualMachine {}/{}", namespace, name);
        Ok(())
    }

    /// Wait for VM to report `ready`
    pub async fn wait_ready(&self, name: &str, namespace: &str, timeout: Duration) -> Result<()> {
        let start = Instant::now();

        loop {
            match self.get(name, namespace).await {
                Ok(vm) => {
                    if let Some(status) = &vm.status {
                        if status.ready {
                            info!("VirtualMachine {}/{} is ready", namespace, name);
                            return Ok(());
                        }
                        debug!(
                            "VirtualMachine {}/{} status: {:?}",
                            namespace, name, status.printable_status
                        );
                    }
                }
                Err(e) => {
                    debug!("Error checking VM status: {}", e);
                }
            }

            if start.elapsed() > timeout {
                warn!(
                    "Timeout waiting for VirtualMachine {}/{} to be ready",
                    namespace, name
                );
                anyhow::bail!(
                    "VirtualMachine {namespace}/{name} not ready after {}s",
                    timeout.as_secs()
                );
            }

            sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vm_config_builder() {
        let vm = VmConfig::new("test-vm", "default")
            .memory("2Gi")
            .image("quay.io/containerdisks/ubuntu:latest")
            .template_label("app", "localnet")
            .build();

        assert_eq!(vm.metadata.name.as_deref(), Some("test-vm"));
        assert_eq!(vm.metadata.namespace.as_deref(), Some("default"));
        assert_eq!(vm.spec.run_strategy, Some(RunStrategy::Halted));

        let template = &vm.spec.template;
        assert_eq!(
            template.metadata.as_ref().unwrap().labels.get("app").map(String::as_str),
            Some("localnet")
        );
        assert_eq!(template.spec.volumes.len(), 1);
        assert!(template.spec.networks.is_empty());
    }

    #[test]
    fn test_multus_bridge_attachment() {
        let vm = VmConfig::new("vm", "ns").multus_bridge("localnet-net", "localnet-nad").build();
        let json = serde_json::to_value(&vm).unwrap();
        let spec = &json["spec"]["template"]["spec"];

        assert_eq!(spec["domain"]["devices"]["interfaces"][0]["name"], "localnet-net");
        assert!(spec["domain"]["devices"]["interfaces"][0]["bridge"].is_object());
        assert_eq!(spec["networks"][0]["name"], "localnet-net");
        assert_eq!(spec["networks"][0]["multus"]["networkName"], "localnet-nad");
        assert_eq!(json["spec"]["runStrategy"], "Halted");
    }

    #[test]
    fn test_cloud_init_disk_added() {
        let vm = VmConfig::new("vm", "ns")
            .cloud_init(CloudInitNoCloud {
                user_data: Some("#cloud-config\n".to_string()),
                network_data: None,
            })
            .build();

        let spec = &vm.spec.template.spec;
        assert_eq!(spec.volumes.len(), 2);
        assert!(spec.volumes[1].cloud_init_no_cloud.is_some());
        assert_eq!(spec.domain.devices.disks[1].name, spec.volumes[1].name);
    }

    #[test]
    fn test_pod_anti_affinity() {
        let mut affinity = new_pod_anti_affinity("test", "localnet");
        let json = serde_json::to_value(&affinity).unwrap();
        let term = &json["podAntiAffinity"]["requiredDuringSchedulingIgnoredDuringExecution"][0];

        assert_eq!(term["topologyKey"], "kubernetes.io/hostname");
        assert_eq!(term["labelSelector"]["matchExpressions"][0]["key"], "test");
        assert_eq!(term["labelSelector"]["matchExpressions"][0]["operator"], "In");
        assert!(term.get("namespaceSelector").is_none());

        if let Some(anti) = affinity.pod_anti_affinity.as_mut() {
            anti.required_during_scheduling_ignored_during_execution[0].namespace_selector =
                Some(LabelSelector::default());
        }
        let json = serde_json::to_value(&affinity).unwrap();
        let term = &json["podAntiAffinity"]["requiredDuringSchedulingIgnoredDuringExecution"][0];
        assert_eq!(term["namespaceSelector"], serde_json::json!({}));
    }
}
