//! Configuration module
//!
//! Handles loading and managing suite configuration.

mod env;
mod file;

pub use env::{print_env_help, EnvConfig};
pub use file::ConfigFile;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const REDACTED: &str = "********";

/// Suite configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteConfig {
    /// Directory for console logs and archived runs
    pub data_dir: PathBuf,

    /// Path of the virtctl binary
    pub virtctl: String,

    /// Label key selecting worker nodes
    pub worker_label_key: String,

    /// VLAN IDs handed out to localnet attachments
    pub vlans: VlanRange,

    /// Secondary NIC to use instead of discovering one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_nic: Option<String>,

    /// Guest image and credentials
    pub vm: VmImageConfig,

    /// Serial console behaviour
    pub console: ConsoleConfig,

    /// Cluster wait budgets
    pub timeouts: TimeoutConfig,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("localnet-e2e"),
            virtctl: "virtctl".to_string(),
            worker_label_key: "node-role.kubernetes.io/worker".to_string(),
            vlans: VlanRange::default(),
            secondary_nic: None,
            vm: VmImageConfig::default(),
            console: ConsoleConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl SuiteConfig {
    /// Directory holding archived runs
    pub fn results_dir(&self) -> PathBuf {
        self.data_dir.join("results")
    }

    /// Copy safe to print: the guest password is masked
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if !config.vm.password.is_empty() {
            config.vm.password = REDACTED.to_string();
        }
        config
    }

    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(ConfigFile::load(path)?.suite)
    }

    /// Resolve the effective configuration.
    ///
    /// An explicit path wins over the standard locations; environment
    /// variables are applied last.
    pub fn resolve(path: Option<&str>) -> Result<Self> {
        let env = EnvConfig::load();
        let explicit = path.map(PathBuf::from).or(env.config_file.clone().map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => Self::load(&path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => ConfigFile::load_default()?.suite,
        };

        env.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.vlans.validate()?;
        if self.console.max_attempts == 0 {
            anyhow::bail!("console.max_attempts must be at least 1");
        }
        if self.console.prompts.is_empty() {
            anyhow::bail!("console.prompts must contain at least one shell prompt");
        }
        for prompt in &self.console.prompts {
            regex::Regex::new(prompt)
                .with_context(|| format!("Invalid console prompt pattern: {prompt}"))?;
        }
        Ok(())
    }
}

/// Inclusive range of VLAN IDs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlanRange {
    pub start: u16,
    pub end: u16,
}

impl Default for VlanRange {
    fn default() -> Self {
        Self {
            start: 1000,
            end: 1019,
        }
    }
}

impl VlanRange {
    pub fn validate(&self) -> Result<()> {
        if self.start == 0 || self.end > 4094 {
            anyhow::bail!("VLAN IDs must be within 1-4094");
        }
        if self.start > self.end {
            anyhow::bail!("Empty VLAN range {}-{}", self.start, self.end);
        }
        Ok(())
    }
}

/// Guest image and default login
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VmImageConfig {
    pub image: String,
    pub memory: String,
    pub username: String,
    pub password: String,
}

impl Default for VmImageConfig {
    fn default() -> Self {
        Self {
            image: "quay.io/openshift-cnv/qe-cnv-tests-fedora:41".to_string(),
            memory: "1Gi".to_string(),
            username: "fedora".to_string(),
            password: "fedora".to_string(),
        }
    }
}

/// Serial console settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Prompt windows allowed before giving up on login
    pub max_attempts: u32,

    /// Shell prompt patterns (regular expressions)
    pub prompts: Vec<String>,

    /// Wait per prompt window
    pub prompt_timeout_secs: u64,

    /// Wait for a command to return to the prompt
    pub command_timeout_secs: u64,

    /// Total budget for (re)spawning the console process
    pub reconnect_timeout_secs: u64,

    /// Pause between spawn attempts
    pub reconnect_sleep_secs: u64,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            prompts: vec![r"\$".to_string()],
            prompt_timeout_secs: 120,
            command_timeout_secs: 30,
            reconnect_timeout_secs: 300,
            reconnect_sleep_secs: 5,
        }
    }
}

/// Cluster wait budgets in seconds
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub poll_interval_secs: u64,
    pub namespace_secs: u64,
    pub nncp_secs: u64,
    pub vm_ready_secs: u64,
    pub agent_connected_secs: u64,
    pub interface_ip_secs: u64,
    pub migration_secs: u64,
    pub delete_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            namespace_secs: 120,
            nncp_secs: 480,
            vm_ready_secs: 600,
            agent_connected_secs: 600,
            interface_ip_secs: 300,
            migration_secs: 720,
            delete_secs: 240,
        }
    }
}

impl TimeoutConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SuiteConfig::default();
        assert_eq!(config.virtctl, "virtctl");
        assert_eq!(config.console.max_attempts, 5);
        assert_eq!(config.console.prompts, vec![r"\$".to_string()]);
        assert_eq!(config.console.reconnect_timeout_secs, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_vlan_range_validation() {
        assert!(VlanRange { start: 10, end: 20 }.validate().is_ok());
        assert!(VlanRange { start: 0, end: 20 }.validate().is_err());
        assert!(VlanRange { start: 30, end: 20 }.validate().is_err());
        assert!(VlanRange {
            start: 4000,
            end: 4095
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_invalid_prompt_rejected() {
        let mut config = SuiteConfig::default();
        config.console.prompts = vec!["(".to_string()];
        assert!(config.validate().is_err());

        config.console.prompts.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: SuiteConfig = serde_yaml::from_str("virtctl: /usr/local/bin/virtctl\n").unwrap();
        assert_eq!(config.virtctl, "/usr/local/bin/virtctl");
        assert_eq!(config.vlans, VlanRange::default());
        assert_eq!(config.timeouts.migration_secs, 720);
    }

    #[test]
    fn test_redacted_masks_password() {
        let mut config = SuiteConfig::default();
        config.vm.password = "hunter2".to_string();

        let shown = serde_yaml::to_string(&config.redacted()).unwrap();
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("********"));
        assert_eq!(config.redacted().vm.username, "fedora");
        assert_eq!(config.vm.password, "hunter2");
    }
}
