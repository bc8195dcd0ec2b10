//! Kubernetes client wrapper
//!
//! Provides a high-level interface to the Kubernetes API.

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{
    api::{Api, DeleteParams, ListParams},
    Client,
};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Kubernetes client wrapper
#[derive(Clone)]
pub struct K8sClient {
    client: Client,
}

impl K8sClient {
    /// Create a new Kubernetes client from the ambient kubeconfig
    pub async fn new() -> Result<Self> {
        let client = Client::try_default()
            .await
            .context("Failed to create Kubernetes client")?;

        Ok(Self { client })
    }

    /// Get the underlying kube client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Check if a specific CRD exists
    pub async fn crd_exists(&self, group: &str, plural: &str) -> Result<bool> {
        let crds: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        let crd_name = format!("{plural}.{group}");

        match crds.get(&crd_name).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(false),
            Err(e) => Err(e).context("Failed to check CRD existence"),
        }
    }

    /// Verify the CRDs every localnet scenario depends on are served
    pub async fn check_prerequisites(&self) -> Result<()> {
        let required = [
            ("kubevirt.io", "virtualmachines"),
            ("kubevirt.io", "virtualmachineinstancemigrations"),
            ("nmstate.io", "nodenetworkconfigurationpolicies"),
            ("k8s.cni.cncf.io", "network-attachment-definitions"),
        ];

        let mut missing = Vec::new();
        for (group, plural) in required {
            if !self.crd_exists(group, plural).await? {
                missing.push(format!("{plural}.{group}"));
            }
        }

        if missing.is_empty() {
            info!("All required CRDs are installed");
            Ok(())
        } else {
            anyhow::bail!("Missing CRDs: {}", missing.join(", "))
        }
    }

    /// List names of nodes carrying `label_key`, sorted
    pub async fn list_worker_nodes(&self, label_key: &str) -> Result<Vec<String>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes
            .list(&ListParams::default().labels(label_key))
            .await
            .context("Failed to list worker nodes")?;

        let mut names: Vec<String> = list
            .items
            .into_iter()
            .filter_map(|node| node.metadata.name)
            .collect();
        names.sort();
        Ok(names)
    }
}

/// Delete `name` and poll until the API server no longer returns it.
///
/// A missing object counts as deleted.
pub async fn delete_and_wait<K>(api: &Api<K>, name: &str, timeout: Duration) -> Result<()>
where
    K: kube::Resource + Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &DeleteParams::background()).await {
        Ok(_) => debug!("Delete of {} accepted", name),
        Err(kube::Error::Api(e)) if e.code == 404 => {
            debug!("{} already gone", name);
            return Ok(());
        }
        Err(e) => return Err(e).with_context(|| format!("Failed to delete {name}")),
    }

    let start = Instant::now();
    loop {
        match api.get_opt(name).await {
            Ok(None) => return Ok(()),
            Ok(Some(_)) => debug!("Waiting for {} to be deleted", name),
            Err(e) => debug!("Error polling {} deletion: {}", name, e),
        }

        if start.elapsed() > timeout {
            warn!("Timeout waiting for {} to be deleted", name);
            anyhow::bail!("{name} still present after {}s", timeout.as_secs());
        }

        sleep(Duration::from_secs(2)).await;
    }
}
