//! Guest networking helpers
//!
//! Cloud-init network payloads, iperf3 traffic roles and VLAN allocation.

pub mod cloudinit;
mod traffic;
mod vlan;

pub use traffic::{is_tcp_connection, Client, Server, IPERF_SERVER_PORT};
pub use vlan::{VlanAllocator, VlanError};
