//! Kubernetes API client module
//!
//! Cluster resources the localnet scenarios provision: namespaces,
//! network attachments and node network policies.

mod client;
mod namespace;
mod netattachdef;
mod nncp;
mod nns;

pub use client::{delete_and_wait, K8sClient};
pub use namespace::{NamespaceManager, SUITE_LABEL_KEY};
pub use netattachdef::{new_attachment, NadManager, NetConfig, NetworkAttachmentDefinition, Topology};
pub use nncp::{
    new_policy, Bridge, BridgeMapping, BridgeOptions, DesiredState, Interface, InterfaceState, IpConfig,
    MappingState, NncpManager, NodeNetworkConfigurationPolicy, Ovn, Port, Stp, DEFAULT_OVN_EXTERNAL_BRIDGE,
    INTERFACE_TYPE_OVS_BRIDGE,
};
pub use nns::NnsManager;
