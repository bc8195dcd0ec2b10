//! Namespace lifecycle

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, ObjectMeta, PostParams};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info};

use super::{delete_and_wait, K8sClient};

/// Label marking namespaces owned by this suite
pub const SUITE_LABEL_KEY: &str = "localnet-e2e/owned";

/// Namespace manager
pub struct NamespaceManager {
    client: K8sClient,
}

impl NamespaceManager {
    pub fn new(client: K8sClient) -> Self {
        Self { client }
    }

    fn api(&self) -> Api<Namespace> {
        Api::all(self.client.client().clone())
    }

    /// Create a labelled namespace
    pub async fn create(&self, name: &str) -> Result<Namespace> {
        let created = self
            .api()
            .create(&PostParams::default(), &build_namespace(name))
            .await
            .with_context(|| format!("Failed to create namespace {name}"))?;
        info!("Created namespace {}", name);
        Ok(created)
    }

    /// Wait until the namespace phase is Active
    pub async fn wait_active(&self, name: &str, timeout: Duration) -> Result<Namespace> {
        let start = Instant::now();
        loop {
            let namespace = self
                .api()
                .get(name)
                .await
                .with_context(|| format!("Failed to get namespace {name}"))?;

            let phase = namespace
                .status
                .as_ref()
                .and_then(|s| s.phase.as_deref())
                .unwrap_or_default();
            if phase == "Active" {
                return Ok(namespace);
            }
            debug!("Namespace {} phase: {:?}", name, phase);

            if start.elapsed() > timeout {
                anyhow::bail!("Namespace {name} not Active after {}s", timeout.as_secs());
            }
            sleep(Duration::from_secs(1)).await;
        }
    }

    /// Delete a namespace and wait until it is gone
    pub async fn delete(&self, name: &str, timeout: Duration) -> Result<()> {
        delete_and_wait(&self.api(), name, timeout).await?;
        info!("Deleted namespace {}", name);
        Ok(())
    }
}

fn build_namespace(name: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(BTreeMap::from([(
                SUITE_LABEL_KEY.to_string(),
                "true".to_string(),
            )])),
            ..Default::default()
        },
        ..Default::default()
    }
}
