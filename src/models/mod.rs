//! Data models
//!
//! Scenarios and the results they produce.

mod test_result;

pub use test_result::{Scenario, TestResult, TestRoundSummary, TestStatus};
