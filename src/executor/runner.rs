//! Scenario runner
//!
//! Runs the selected localnet scenarios one after another, for one or more
//! rounds. Every scenario run gets its own VLAN.

use anyhow::Result;
use std::time::Instant;
use tracing::{error, info};

use crate::fixtures::Fixtures;
use crate::models::{Scenario, TestResult, TestRoundSummary};
use crate::network::VlanAllocator;
use crate::tests;

/// Resolve scenario ids and a marker into the scenarios to run.
///
/// No ids selects every scenario; the marker then narrows the selection.
pub fn select_scenarios(ids: &[String], marker: Option<&str>) -> Result<Vec<Scenario>> {
    let mut selected = if ids.is_empty() {
        Scenario::all()
    } else {
        ids.iter()
            .map(|id| Scenario::from_id(id).ok_or_else(|| anyhow::anyhow!("Unknown scenario: {id}")))
            .collect::<Result<Vec<_>>>()?
    };

    if let Some(marker) = marker {
        selected.retain(|s| s.has_marker(marker));
    }
    if selected.is_empty() {
        anyhow::bail!("No scenario matches the selection");
    }
    Ok(selected)
}

/// Sequential scenario runner
pub struct SuiteRunner {
    fixtures: Fixtures,
    vlans: VlanAllocator,
}

impl SuiteRunner {
    pub fn new(fixtures: Fixtures) -> Self {
        let vlans = VlanAllocator::new(fixtures.config().vlans);
        Self { fixtures, vlans }
    }

    /// Run a single scenario on a fresh VLAN
    pub async fn run_scenario(&mut self, scenario: Scenario) -> TestResult {
        match self.vlans.allocate() {
            Ok(vlan_id) => tests::run_scenario(&self.fixtures, scenario, vlan_id).await,
            Err(e) => {
                error!("Cannot run {}: {}", scenario, e);
                TestResult::error(scenario, e.to_string())
            }
        }
    }

    /// Run `scenarios` once
    pub async fn run_round(&mut self, round: u32, scenarios: &[Scenario]) -> TestRoundSummary {
        let start = Instant::now();
        let mut results = Vec::new();

        for &scenario in scenarios {
            let result = self.run_scenario(scenario).await;
            info!("  {}", result);
            results.push(result);
        }

        let summary = TestRoundSummary::new(round, results);
        info!(
            "Round {} completed in {}ms: {}/{} passed ({:.1}%)",
            round,
            start.elapsed().as_millis(),
            summary.passed,
            summary.total,
            summary.pass_rate()
        );
        summary
    }

    /// Run `scenarios` for `rounds` rounds
    pub async fn run_rounds(&mut self, scenarios: &[Scenario], rounds: u32) -> Vec<TestRoundSummary> {
        info!(
            "Running {} scenario(s) for {} round(s), {} VLAN(s) available",
            scenarios.len(),
            rounds,
            self.vlans.remaining()
        );

        let mut summaries = Vec::new();
        for round in 1..=rounds {
            info!("=== Round {}/{} ===", round, rounds);
            summaries.push(self.run_round(round, scenarios).await);
        }
        summaries
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_select_all() {
        assert_eq!(select_scenarios(&[], None).unwrap(), Scenario::all());
    }

    #[test]
    fn test_select_by_id() {
        let ids = vec!["localnet-additional-bridge".to_string()];
        assert_eq!(
            select_scenarios(&ids, None).unwrap(),
            vec![Scenario::LocalnetAdditionalBridge]
        );
    }

    #[test]
    fn test_select_by_marker() {
        assert_eq!(
            select_scenarios(&[], Some("single_nic")).unwrap(),
            vec![Scenario::LocalnetDefaultBridge]
        );
        assert_eq!(select_scenarios(&[], Some("ipv4")).unwrap().len(), 2);
    }

    #[test]
    fn test_select_rejects_unknown_or_empty() {
        assert!(select_scenarios(&["localnet-vlan-trunk".to_string()], None).is_err());
        assert!(select_scenarios(&[], Some("ipv6")).is_err());
        let ids = vec!["localnet-additional-bridge".to_string()];
        assert!(select_scenarios(&ids, Some("single_nic")).is_err());
    }
}
