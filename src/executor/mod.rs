//! Scenario execution engine
//!
//! Scenarios share cluster-wide objects such as node network policies, so
//! they are executed sequentially.

mod runner;

pub use runner::{select_scenarios, SuiteRunner};
