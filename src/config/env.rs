//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;
use std::path::PathBuf;

use super::SuiteConfig;

/// Environment variable prefix
const ENV_PREFIX: &str = "LOCALNET_E2E";

/// Unprefixed variable overriding the virtctl binary
const VIRTCTL_ENV: &str = "VIRTCTL";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// virtctl path from VIRTCTL
    pub virtctl: Option<String>,
    /// Data directory from LOCALNET_E2E_DATA_DIR
    pub data_dir: Option<String>,
    /// First VLAN from LOCALNET_E2E_VLAN_START
    pub vlan_start: Option<u16>,
    /// Last VLAN from LOCALNET_E2E_VLAN_END
    pub vlan_end: Option<u16>,
    /// Secondary NIC from LOCALNET_E2E_SECONDARY_NIC
    pub secondary_nic: Option<String>,
    /// Worker label key from LOCALNET_E2E_WORKER_LABEL
    pub worker_label_key: Option<String>,
    /// Guest image from LOCALNET_E2E_VM_IMAGE
    pub vm_image: Option<String>,
    /// Config file from LOCALNET_E2E_CONFIG
    pub config_file: Option<String>,
    /// Kubeconfig from KUBECONFIG
    pub kubeconfig: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            virtctl: env::var(VIRTCTL_ENV).ok(),
            data_dir: get_env("DATA_DIR"),
            vlan_start: get_env_parse("VLAN_START"),
            vlan_end: get_env_parse("VLAN_END"),
            secondary_nic: get_env("SECONDARY_NIC"),
            worker_label_key: get_env("WORKER_LABEL"),
            vm_image: get_env("VM_IMAGE"),
            config_file: get_env("CONFIG"),
            kubeconfig: env::var("KUBECONFIG").ok(),
        }
    }

    /// Override `config` with every variable that is set
    pub fn apply(&self, config: &mut SuiteConfig) {
        if let Some(virtctl) = &self.virtctl {
            config.virtctl = virtctl.clone();
        }
        if let Some(dir) = &self.data_dir {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(start) = self.vlan_start {
            config.vlans.start = start;
        }
        if let Some(end) = self.vlan_end {
            config.vlans.end = end;
        }
        if let Some(nic) = &self.secondary_nic {
            config.secondary_nic = Some(nic.clone());
        }
        if let Some(key) = &self.worker_label_key {
            config.worker_label_key = key.clone();
        }
        if let Some(image) = &self.vm_image {
            config.vm.image = image.clone();
        }
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  {}:                    {:?}", VIRTCTL_ENV, self.virtctl);
        println!("  {}_DATA_DIR:      {:?}", ENV_PREFIX, self.data_dir);
        println!("  {}_VLAN_START:    {:?}", ENV_PREFIX, self.vlan_start);
        println!("  {}_VLAN_END:      {:?}", ENV_PREFIX, self.vlan_end);
        println!("  {}_SECONDARY_NIC: {:?}", ENV_PREFIX, self.secondary_nic);
        println!("  {}_WORKER_LABEL:  {:?}", ENV_PREFIX, self.worker_label_key);
        println!("  {}_VM_IMAGE:      {:?}", ENV_PREFIX, self.vm_image);
        println!("  {}_CONFIG:        {:?}", ENV_PREFIX, self.config_file);
        println!("  KUBECONFIG:                 {:?}", self.kubeconfig);
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}

/// Print all supported environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {VIRTCTL_ENV}                       Path of the virtctl binary");
    println!("  {ENV_PREFIX}_DATA_DIR      Directory for console logs and results");
    println!("  {ENV_PREFIX}_VLAN_START    First VLAN ID handed to localnet attachments");
    println!("  {ENV_PREFIX}_VLAN_END      Last VLAN ID handed to localnet attachments");
    println!("  {ENV_PREFIX}_SECONDARY_NIC Worker NIC to enslave to the additional OVS bridge");
    println!("  {ENV_PREFIX}_WORKER_LABEL  Label key selecting worker nodes");
    println!("  {ENV_PREFIX}_VM_IMAGE      Fedora containerdisk image");
    println!("  {ENV_PREFIX}_CONFIG        Path to configuration file");
    println!("  KUBECONFIG                    Path to kubeconfig file");
    println!();
    println!("Example:");
    println!("  export {VIRTCTL_ENV}=/usr/local/bin/virtctl");
    println!("  export {ENV_PREFIX}_VLAN_START=1200");
    println!("  localnet-e2e run --marker ipv4");
}

/// Sets variables for the lifetime of the guard (tests only)
#[cfg(test)]
pub(crate) struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

#[cfg(test)]
impl EnvGuard {
    pub(crate) fn set(vars: &[(&str, &str)]) -> Self {
        let previous = vars
            .iter()
            .map(|(k, _)| (k.to_string(), env::var(k).ok()))
            .collect();
        for (key, value) in vars {
            env::set_var(key, value);
        }
        Self { previous }
    }
}

#[cfg(test)]
impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}
