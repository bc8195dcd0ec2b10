//! Archived suite runs

mod storage;

pub use storage::{ExportFormat, ResultsStorage, RunInfo, StoredRun};
