//! Scenario and result models

use serde::{Deserialize, Serialize};
use std::fmt;

/// Localnet scenarios
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    /// Localnet mapped onto the OVN external bridge
    LocalnetDefaultBridge,
    /// Localnet on a dedicated OVS bridge over a secondary NIC
    LocalnetAdditionalBridge,
}

impl Scenario {
    /// Stable identifier used on the command line
    pub fn id(&self) -> &'static str {
        match self {
            Scenario::LocalnetDefaultBridge => "localnet-default-bridge",
            Scenario::LocalnetAdditionalBridge => "localnet-additional-bridge",
        }
    }

    /// Get scenario name
    pub fn name(&self) -> &'static str {
        match self {
            Scenario::LocalnetDefaultBridge => "Connectivity over migration (default bridge)",
            Scenario::LocalnetAdditionalBridge => "Connectivity over migration (additional OVS bridge)",
        }
    }

    /// Polarion traceability ID
    pub fn polarion(&self) -> &'static str {
        match self {
            Scenario::LocalnetDefaultBridge => "CNV-11775",
            Scenario::LocalnetAdditionalBridge => "CNV-11905",
        }
    }

    /// Selection markers
    pub fn markers(&self) -> &'static [&'static str] {
        match self {
            Scenario::LocalnetDefaultBridge => &["ipv4", "single_nic"],
            Scenario::LocalnetAdditionalBridge => &["ipv4"],
        }
    }

    pub fn has_marker(&self, marker: &str) -> bool {
        self.markers().contains(&marker)
    }

    /// Get all scenarios
    pub fn all() -> Vec<Scenario> {
        vec![Scenario::LocalnetDefaultBridge, Scenario::LocalnetAdditionalBridge]
    }

    /// Parse from identifier
    pub fn from_id(id: &str) -> Option<Scenario> {
        Scenario::all().into_iter().find(|s| s.id() == id)
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.id(), self.polarion())
    }
}

/// Test execution status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Pass,
    Fail,
    Skip,
    Error,
}

impl TestStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            TestStatus::Pass => "✓",
            TestStatus::Fail => "✗",
            TestStatus::Skip => "○",
            TestStatus::Error => "!",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TestStatus::Pass)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::Pass => write!(f, "PASS"),
            TestStatus::Fail => write!(f, "FAIL"),
            TestStatus::Skip => write!(f, "SKIP"),
            TestStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// Result of a single test execution
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestResult {
    pub scenario: Scenario,
    pub status: TestStatus,
    pub duration_ms: u64,
    pub message: Option<String>,
    pub details: Option<serde_json::Value>,
}

impl TestResult {
    pub fn pass(scenario: Scenario, duration_ms: u64) -> Self {
        Self {
            scenario,
            status: TestStatus::Pass,
            duration_ms,
            message: None,
            details: None,
        }
    }

    pub fn fail(scenario: Scenario, duration_ms: u64, message: impl Into<String>) -> Self {
        Self {
            scenario,
            status: TestStatus::Fail,
            duration_ms,
            message: Some(message.into()),
            details: None,
        }
    }

    pub fn skip(scenario: Scenario, reason: impl Into<String>) -> Self {
        Self {
            scenario,
            status: TestStatus::Skip,
            duration_ms: 0,
            message: Some(reason.into()),
            details: None,
        }
    }

    pub fn error(scenario: Scenario, error: impl Into<String>) -> Self {
        Self {
            scenario,
            status: TestStatus::Error,
            duration_ms: 0,
            message: Some(error.into()),
            details: None,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}ms]",
            self.status.symbol(),
            self.scenario,
            self.duration_ms
        )?;
        if let Some(msg) = &self.message {
            write!(f, " - {msg}")?;
        }
        Ok(())
    }
}

/// Summary of test round execution
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestRoundSummary {
    pub round: u32,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub total_duration_ms: u64,
    pub results: Vec<TestResult>,
}

impl TestRoundSummary {
    pub fn new(round: u32, results: Vec<TestResult>) -> Self {
        let total = results.len();
        let passed = results
            .iter()
            .filter(|r| r.status == TestStatus::Pass)
            .count();
        let failed = results
            .iter()
            .filter(|r| r.status == TestStatus::Fail)
            .count();
        let skipped = results
            .iter()
            .filter(|r| r.status == TestStatus::Skip)
            .count();
        let errors = results
            .iter()
            .filter(|r| r.status == TestStatus::Error)
            .count();
        let total_duration_ms = results.iter().map(|r| r.duration_ms).sum();

        Self {
            round,
            total,
            passed,
            failed,
            skipped,
            errors,
            total_duration_ms,
            results,
        }
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.passed as f64 / self.total as f64) * 100.0
        }
    }

    /// Whether any scenario failed or errored
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.errors > 0
    }
}
