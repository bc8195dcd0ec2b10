//! Cluster fixtures for the localnet scenarios
//!
//! Each method creates one kind of object and registers its teardown in
//! the caller's [`FixtureScope`] before waiting on it, so a failed wait
//! still leaves the object scheduled for deletion.

mod localnet;
mod scope;

pub use localnet::{
    additional_ovs_bridge_interface, localnet_bridge_mapping, localnet_cidr, localnet_nad, localnet_vm,
    LOCALNET_IP_PREFIX, LOCALNET_TEST_LABEL,
};
pub use scope::{run_scoped, FixtureError, FixtureScope};

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::SuiteConfig;
use crate::k8s::{K8sClient, NadManager, NamespaceManager, NetworkAttachmentDefinition, NncpManager, NodeNetworkConfigurationPolicy};
use crate::kubevirt::{ConsoleLauncher, ConsoleTarget, MigrationManager, VirtualMachine, VirtualMachineManager, VmiManager};
use crate::network::{Client, Server, IPERF_SERVER_PORT};

/// A VM created by a fixture
#[derive(Clone, Debug)]
pub struct GuestVm {
    pub name: String,
    pub namespace: String,
    console: ConsoleTarget,
}

impl GuestVm {
    /// Console login for this guest
    pub fn console(&self) -> &ConsoleTarget {
        &self.console
    }
}

/// Fixture factory bound to one cluster and configuration
#[derive(Clone)]
pub struct Fixtures {
    config: SuiteConfig,
    client: K8sClient,
    consoles: ConsoleLauncher,
}

impl Fixtures {
    pub fn new(config: SuiteConfig, client: K8sClient) -> Self {
        let consoles = ConsoleLauncher::from_config(&config);
        Self {
            config,
            client,
            consoles,
        }
    }

    pub fn config(&self) -> &SuiteConfig {
        &self.config
    }

    pub fn client(&self) -> &K8sClient {
        &self.client
    }

    fn poll_interval(&self) -> Duration {
        self.config.timeouts.poll_interval()
    }

    fn delete_timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeouts.delete_secs)
    }

    /// Create namespace `name` and wait until it is Active; deleted when
    /// the scope closes
    pub async fn namespace(&self, scope: &FixtureScope, name: &str) -> Result<()> {
        let namespaces = NamespaceManager::new(self.client.clone());
        let teardown = NamespaceManager::new(self.client.clone());
        let owned = name.to_string();
        let timeout = self.delete_timeout();

        scope
            .provision(
                format!("namespace {name}"),
                namespaces.create(name),
                async move { teardown.delete(&owned, timeout).await },
                namespaces.wait_active(name, Duration::from_secs(self.config.timeouts.namespace_secs)),
            )
            .await?;
        Ok(())
    }

    /// Apply `policy` and wait until it is available on every node.
    ///
    /// Teardown reverts the policy to absent before deleting it.
    pub async fn nncp(&self, scope: &FixtureScope, policy: &NodeNetworkConfigurationPolicy) -> Result<()> {
        let name = policy.metadata.name.clone().unwrap_or_default();
        let policies = NncpManager::new(self.client.clone(), self.poll_interval());
        let teardown = NncpManager::new(self.client.clone(), self.poll_interval());
        let timeout = Duration::from_secs(self.config.timeouts.nncp_secs);
        let owned = name.clone();

        scope
            .provision(
                format!("nncp {name}"),
                policies.create(policy),
                async move { teardown.teardown(&owned, timeout).await },
                policies.wait_for_status_success(&name, timeout),
            )
            .await
    }

    /// Create an attachment; deleted when the scope closes
    pub async fn nad(&self, scope: &FixtureScope, nad: &NetworkAttachmentDefinition) -> Result<()> {
        let nads = NadManager::new(self.client.clone());
        let created = nads.create(nad).await?;

        let namespace = created.metadata.namespace.clone().unwrap_or_default();
        let name = created.metadata.name.clone().unwrap_or_default();
        let timeout = self.delete_timeout();
        scope.defer(format!("nad {namespace}/{name}"), async move {
            nads.delete(&namespace, &name, timeout).await
        });
        Ok(())
    }

    /// Create a VM without starting it; deleted when the scope closes
    pub async fn vm(&self, scope: &FixtureScope, vm: &VirtualMachine) -> Result<GuestVm> {
        let vms = VirtualMachineManager::new(self.client.clone(), self.poll_interval());
        let created = vms.create(vm).await?;

        let namespace = created.metadata.namespace.clone().unwrap_or_default();
        let name = created.metadata.name.clone().unwrap_or_default();
        let guest = GuestVm {
            console: ConsoleTarget::new(name.clone(), Some(namespace.clone())).credentials(
                Some(self.config.vm.username.clone()),
                Some(self.config.vm.password.clone()),
            ),
            name: name.clone(),
            namespace: namespace.clone(),
        };

        let timeout = self.delete_timeout();
        scope.defer(format!("vm {namespace}/{name}"), async move {
            vms.delete(&name, &namespace, timeout).await
        });
        Ok(guest)
    }

    /// Start every VM, then wait for each to be ready with its agent connected
    pub async fn run_vms(&self, vms: &[&GuestVm]) -> Result<()> {
        let vm_manager = VirtualMachineManager::new(self.client.clone(), self.poll_interval());
        let vmi_manager = VmiManager::new(self.client.clone(), self.poll_interval());

        for vm in vms {
            vm_manager.start(&vm.name, &vm.namespace).await?;
        }

        let ready = Duration::from_secs(self.config.timeouts.vm_ready_secs);
        let agent = Duration::from_secs(self.config.timeouts.agent_connected_secs);
        for vm in vms {
            vm_manager.wait_ready(&vm.name, &vm.namespace, ready).await?;
            vmi_manager.wait_agent_connected(&vm.name, &vm.namespace, agent).await?;
            info!("VM {}/{} is running", vm.namespace, vm.name);
        }
        Ok(())
    }

    /// Start an iperf3 server in `vm`; stopped when the scope closes
    pub async fn traffic_server(&self, scope: &FixtureScope, vm: &GuestVm) -> Result<Arc<Server>> {
        let server = Arc::new(Server::start(self.consoles.clone(), vm.console.clone(), IPERF_SERVER_PORT).await?);

        let stopped = Arc::clone(&server);
        scope.defer(format!("iperf3 server on {}", vm.name), async move {
            stopped.stop().await;
            Ok(())
        });
        Ok(server)
    }

    /// Start an iperf3 client in `client_vm` against the server guest.
    ///
    /// The server address is the one reported on its `network_name` interface.
    pub async fn traffic_client(
        &self,
        scope: &FixtureScope,
        server: &Server,
        server_vm: &GuestVm,
        client_vm: &GuestVm,
        network_name: &str,
    ) -> Result<Arc<Client>> {
        let vmis = VmiManager::new(self.client.clone(), self.poll_interval());
        let server_ip = vmis
            .wait_for_interface_ip(
                &server_vm.name,
                &server_vm.namespace,
                network_name,
                Duration::from_secs(self.config.timeouts.interface_ip_secs),
            )
            .await?;

        let client = Arc::new(
            Client::start(self.consoles.clone(), client_vm.console.clone(), &server_ip, server.port()).await?,
        );

        let stopped = Arc::clone(&client);
        scope.defer(format!("iperf3 client on {}", client_vm.name), async move {
            stopped.stop().await;
            Ok(())
        });
        Ok(client)
    }

    /// Live-migrate `vm` and verify it changed node
    pub async fn migrate(&self, vm: &GuestVm) -> Result<()> {
        MigrationManager::new(self.client.clone(), self.poll_interval(), self.delete_timeout())
            .migrate_vm_and_verify(
                &vm.name,
                &vm.namespace,
                Duration::from_secs(self.config.timeouts.migration_secs),
            )
            .await
    }
}
