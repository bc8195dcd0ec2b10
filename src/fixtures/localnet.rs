//! Localnet object builders
//!
//! Pure constructors for the NNCP pieces, attachments and guests the
//! localnet scenarios deploy. Nothing here talks to the cluster.

use anyhow::Result;

use crate::config::VmImageConfig;
use crate::k8s::{
    new_attachment, Bridge, BridgeMapping, BridgeOptions, Interface, InterfaceState, IpConfig, MappingState, NetConfig,
    NetworkAttachmentDefinition, Port, Stp, INTERFACE_TYPE_OVS_BRIDGE,
};
use crate::kubevirt::{new_pod_anti_affinity, CloudInitNoCloud, LabelSelector, VirtualMachine, VmConfig};
use crate::network::cloudinit::{as_yaml, format_cloud_config, NetworkData, UserData};

/// Label shared by every localnet guest; also the anti-affinity key
pub const LOCALNET_TEST_LABEL: (&str, &str) = ("test", "localnet");

/// Subnet the guests address themselves in on the localnet network
pub const LOCALNET_IP_PREFIX: &str = "10.0.0";

/// Guest NIC carrying the localnet address
const GUEST_LOCALNET_DEVICE: &str = "eth0";

/// `<prefix>.<host>/24`
pub fn localnet_cidr(host: u8) -> String {
    format!("{LOCALNET_IP_PREFIX}.{host}/24")
}

/// A halted Fedora guest attached to the multus network `network`.
///
/// The guest interface is named `network_name` and bound as a bridge; the
/// address `cidr` is set through cloud-init. Guests carrying the localnet
/// label never share a node, whatever their namespace.
pub fn localnet_vm(
    guest: &VmImageConfig,
    namespace: &str,
    name: &str,
    network: &str,
    cidr: &str,
    network_name: &str,
) -> Result<VirtualMachine> {
    let (label_key, label_value) = LOCALNET_TEST_LABEL;

    let network_data = NetworkData::single(GUEST_LOCALNET_DEVICE, vec![cidr.to_string()]);
    let cloud_init = CloudInitNoCloud {
        user_data: Some(format_cloud_config(&UserData::default())?),
        network_data: Some(as_yaml(&network_data)?),
    };

    let mut affinity = new_pod_anti_affinity(label_key, label_value);
    if let Some(anti) = affinity.pod_anti_affinity.as_mut() {
        for term in &mut anti.required_during_scheduling_ignored_during_execution {
            term.namespace_selector = Some(LabelSelector::default());
        }
    }

    Ok(VmConfig::new(name, namespace)
        .image(&guest.image)
        .memory(&guest.memory)
        .template_label(label_key, label_value)
        .multus_bridge(network_name, network)
        .cloud_init(cloud_init)
        .affinity(affinity)
        .build())
}

/// Localnet attachment `namespace/name` on `network_name`, tagged `vlan_id`
pub fn localnet_nad(
    namespace: &str,
    name: &str,
    vlan_id: Option<u16>,
    network_name: &str,
) -> Result<NetworkAttachmentDefinition> {
    let config = NetConfig::localnet(namespace, name, network_name, vlan_id);
    new_attachment(namespace, name, &config)
}

/// OVS bridge `bridge_name` with `worker_port_name` as its only port
pub fn additional_ovs_bridge_interface(bridge_name: &str, worker_port_name: &str) -> Interface {
    Interface {
        name: bridge_name.to_string(),
        iface_type: INTERFACE_TYPE_OVS_BRIDGE.to_string(),
        state: InterfaceState::Up,
        ipv4: Some(IpConfig { enabled: false }),
        ipv6: Some(IpConfig { enabled: false }),
        bridge: Some(Bridge {
            options: Some(BridgeOptions {
                stp: Some(Stp { enabled: false }),
            }),
            port: vec![Port {
                name: worker_port_name.to_string(),
            }],
        }),
    }
}

pub fn localnet_bridge_mapping(network_name: &str, bridge: &str) -> BridgeMapping {
    BridgeMapping {
        localnet: network_name.to_string(),
        bridge: bridge.to_string(),
        state: MappingState::Present,
    }
}
