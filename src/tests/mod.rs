//! Scenario implementations
//!
//! | id | polarion |
//! |----|----------|
//! | `localnet-default-bridge` | CNV-11775 |
//! | `localnet-additional-bridge` | CNV-11905 |


pub use localnet::{run_plan, secondary_nic, LocalnetPlan};

use anyhow::Result;
use tracing::{error, info, warn};

use crate::config::SuiteConfig;
use crate::fixtures::Fixtures;
use crate::models::{Scenario, TestResult};
use crate::utils::Timer;

/// Build the plan for `scenario` without touching the cluster.
///
/// The additional bridge needs a worker NIC; `nic` supplies it.
pub fn plan(config: &SuiteConfig, scenario: Scenario, vlan_id: u16, nic: Option<&str>) -> Result<LocalnetPlan> {
    match scenario {
        Scenario::LocalnetDefaultBridge => LocalnetPlan::default_bridge(config, vlan_id),
        Scenario::LocalnetAdditionalBridge => {
            let nic = nic.ok_or_else(|| anyhow::anyhow!("{scenario} needs a worker NIC for its OVS bridge"))?;
            LocalnetPlan::additional_bridge(config, vlan_id, nic)
        }
    }
}

/// How a scenario run ended, short of an error
#[derive(Debug)]
enum Outcome {
    /// Whether the TCP connection survived the migration
    Ran(bool),
    /// No worker NIC is free to carry the additional bridge
    NoSpareNic,
}

async fn run_outcome(fixtures: &Fixtures, scenario: Scenario, vlan_id: u16) -> Result<Outcome> {
    let nic = match scenario {
        Scenario::LocalnetAdditionalBridge => match secondary_nic(fixtures).await? {
            Some(nic) => Some(nic),
            None => return Ok(Outcome::NoSpareNic),
        },
        Scenario::LocalnetDefaultBridge => None,
    };
    let plan = plan(fixtures.config(), scenario, vlan_id, nic.as_deref())?;
    Ok(Outcome::Ran(run_plan(fixtures, &plan).await?))
}

/// Run one scenario against the cluster.
///
/// A lost TCP connection is a failure; anything that stops the scenario
/// from reaching its assertion is an error.
pub async fn run_scenario(fixtures: &Fixtures, scenario: Scenario, vlan_id: u16) -> TestResult {
    info!("Running {} on VLAN {}", scenario, vlan_id);
    let timer = Timer::start(scenario.id());
    let outcome = run_outcome(fixtures, scenario, vlan_id).await;
    let duration_ms = timer.stop().as_millis() as u64;

    scenario_result(scenario, vlan_id, duration_ms, outcome)
}

fn scenario_result(scenario: Scenario, vlan_id: u16, duration_ms: u64, outcome: Result<Outcome>) -> TestResult {
    match outcome {
        Ok(Outcome::Ran(true)) => {
            TestResult::pass(scenario, duration_ms).with_details(serde_json::json!({ "vlan_id": vlan_id }))
        }
        Ok(Outcome::Ran(false)) => {
            TestResult::fail(scenario, duration_ms, "TCP connection lost after client VM migration")
        }
        Ok(Outcome::NoSpareNic) => {
            warn!("Skipping {}: no spare worker NIC", scenario);
            TestResult::skip(scenario, "No spare worker NIC for the additional OVS bridge").with_duration(duration_ms)
        }
        Err(e) => {
            error!("Scenario {} errored: {:#}", scenario, e);
            TestResult::error(scenario, format!("{e:#}")).with_duration(duration_ms)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TestRoundSummary, TestStatus};

    #[test]
    fn test_plan_dispatch() {
        let config = SuiteConfig::default();

        let plan_default = plan(&config, Scenario::LocalnetDefaultBridge, 1000, None).unwrap();
        assert_eq!(plan_default.scenario, Scenario::LocalnetDefaultBridge);

        let plan_additional = plan(&config, Scenario::LocalnetAdditionalBridge, 1000, Some("ens10")).unwrap();
        assert_eq!(plan_additional.scenario, Scenario::LocalnetAdditionalBridge);
    }

    #[test]
    fn test_additional_bridge_requires_nic() {
        let err = plan(&SuiteConfig::default(), Scenario::LocalnetAdditionalBridge, 1000, None).unwrap_err();
        assert!(err.to_string().contains("worker NIC"));
    }

    #[test]
    fn test_scenario_result_mapping() {
        let passed = scenario_result(Scenario::LocalnetDefaultBridge, 1003, 90_000, Ok(Outcome::Ran(true)));
        assert_eq!(passed.status, TestStatus::Pass);
        assert_eq!(passed.details, Some(serde_json::json!({ "vlan_id": 1003 })));

        let lost = scenario_result(Scenario::LocalnetDefaultBridge, 1003, 90_000, Ok(Outcome::Ran(false)));
        assert_eq!(lost.status, TestStatus::Fail);

        let errored = scenario_result(
            Scenario::LocalnetDefaultBridge,
            1003,
            5_000,
            Err(anyhow::anyhow!("VMI test-localnet-ns1/test-vm1 condition AgentConnected not True after 600s")),
        );
        assert_eq!(errored.status, TestStatus::Error);
        assert_eq!(errored.duration_ms, 5_000);
    }

    #[test]
    fn test_no_spare_nic_skips() {
        let result = scenario_result(Scenario::LocalnetAdditionalBridge, 1004, 800, Ok(Outcome::NoSpareNic));
        assert_eq!(result.status, TestStatus::Skip);
        assert!(result.message.unwrap().contains("spare worker NIC"));
        assert!(!TestRoundSummary::new(1, vec![scenario_result(
            Scenario::LocalnetAdditionalBridge,
            1004,
            800,
            Ok(Outcome::NoSpareNic)
        )])
        .has_failures());
    }
}
