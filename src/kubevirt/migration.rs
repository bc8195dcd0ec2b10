//! Live migration of VirtualMachineInstances

use anyhow::{Context, Result};
use kube::api::{Api, PostParams};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::VmiManager;
use crate::k8s::{delete_and_wait, K8sClient};

/// VirtualMachineInstanceMigration custom resource specification
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "kubevirt.io",
    version = "v1",
    kind = "VirtualMachineInstanceMigration",
    plural = "virtualmachineinstancemigrations",
    shortname = "vmim",
    namespaced,
    status = "MigrationStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceMigrationSpec {
    pub vmi_name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

/// Migration phases that matter to the wait loop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MigrationPhase {
    Succeeded,
    Failed,
    InProgress,
}

impl MigrationPhase {
    pub fn from_status(status: Option<&MigrationStatus>) -> Self {
        match status.and_then(|s| s.phase.as_deref()) {
            Some("Succeeded") => MigrationPhase::Succeeded,
            Some("Failed") => MigrationPhase::Failed,
            _ => MigrationPhase::InProgress,
        }
    }
}

/// Build a migration object for `vmi_name`
pub fn new_migration(namespace: &str, vmi_name: &str) -> VirtualMachineInstanceMigration {
    let mut migration = VirtualMachineInstanceMigration::new(
        &format!("{vmi_name}-migration"),
        VirtualMachineInstanceMigrationSpec {
            vmi_name: vmi_name.to_string(),
        },
    );
    migration.metadata.namespace = Some(namespace.to_string());
    migration
}

/// Drives and verifies live migrations
pub struct MigrationManager {
    client: K8sClient,
    poll_interval: Duration,
    delete_timeout: Duration,
}

impl MigrationManager {
    pub fn new(client: K8sClient, poll_interval: Duration, delete_timeout: Duration) -> Self {
        Self {
            client,
            poll_interval,
            delete_timeout,
        }
    }

    fn api(&self, namespace: &str) -> Api<VirtualMachineInstanceMigration> {
        Api::namespaced(self.client.client().clone(), namespace)
    }

    /// Migrate `vm_name` and verify it landed on another node.
    ///
    /// The migration object is deleted whether or not the migration worked.
    pub async fn migrate_vm_and_verify(&self, vm_name: &str, namespace: &str, timeout: Duration) -> Result<()> {
        let vmis = VmiManager::new(self.client.clone(), self.poll_interval);
        let source_node = vmis.node(vm_name, namespace).await?;

        let migration = new_migration(namespace, vm_name);
        let created = self
            .api(namespace)
            .create(&PostParams::default(), &migration)
            .await
            .with_context(|| format!("Failed to create migration for {namespace}/{vm_name}"))?;
        let migration_name = created.metadata.name.clone().unwrap_or_default();
        info!(
            "Migrating VMI {}/{} away from {} ({})",
            namespace, vm_name, source_node, migration_name
        );

        let outcome = self.wait_for_success(&migration_name, namespace, timeout).await;

        if let Err(e) = delete_and_wait(&self.api(namespace), &migration_name, self.delete_timeout).await {
            warn!("Failed to delete migration {}/{}: {}", namespace, migration_name, e);
        }
        outcome?;

        let vmi = vmis.get(vm_name, namespace).await?;
        let status = vmi.status.unwrap_or_default();
        let completed = status
            .migration_state
            .as_ref()
            .map(|s| s.completed && !s.failed)
            .unwrap_or(false);
        if !completed {
            anyhow::bail!("VMI {namespace}/{vm_name} migration state is not completed");
        }

        let target_node = status.node_name.unwrap_or_default();
        if target_node == source_node {
            anyhow::bail!("VMI {namespace}/{vm_name} is still on {source_node} after migration");
        }

        info!("VMI {}/{} migrated {} -> {}", namespace, vm_name, source_node, target_node);
        Ok(())
    }

    async fn wait_for_success(&self, name: &str, namespace: &str, timeout: Duration) -> Result<()> {
        let start = Instant::now();

        loop {
            match self.api(namespace).get_status(name).await {
                Ok(migration) => match MigrationPhase::from_status(migration.status.as_ref()) {
                    MigrationPhase::Succeeded => return Ok(()),
                    MigrationPhase::Failed => anyhow::bail!("Migration {namespace}/{name} failed"),
                    MigrationPhase::InProgress => {
                        debug!(
                            "Migration {}/{} phase: {:?}",
                            namespace,
                            name,
                            migration.status.and_then(|s| s.phase)
                        );
                    }
                },
                Err(e) => debug!("Error getting migration status: {}", e),
            }

            if start.elapsed() > timeout {
                warn!("Timeout waiting for migration {}/{}", namespace, name);
                anyhow::bail!(
                    "Migration {namespace}/{name} not finished after {}s",
                    timeout.as_secs()
                );
            }

            sleep(self.poll_interval).await;
        }
    }
}
