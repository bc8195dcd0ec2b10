//! Results storage and retrieval
//!
//! Archives each suite run as a JSON document under the results directory.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::models::{Scenario, TestRoundSummary};

/// An archived suite run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredRun {
    /// Unique run ID
    pub id: String,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,

    /// Scenarios selected for the run
    pub scenarios: Vec<Scenario>,

    pub summaries: Vec<TestRoundSummary>,

    pub environment: EnvironmentInfo,
}

/// Where the suite ran from
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    pub os: String,
    pub arch: String,

    /// Kubernetes server version (if available)
    pub k8s_version: Option<String>,

    pub tool_version: String,
}

impl Default for EnvironmentInfo {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            k8s_version: None,
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl StoredRun {
    /// Start recording a run of `scenarios`
    pub fn new(scenarios: Vec<Scenario>) -> Self {
        Self {
            id: generate_run_id(),
            started_at: Utc::now(),
            completed_at: Utc::now(),
            scenarios,
            summaries: Vec::new(),
            environment: EnvironmentInfo::default(),
        }
    }

    pub fn with_k8s_version(mut self, version: Option<String>) -> Self {
        self.environment.k8s_version = version;
        self
    }

    /// Record the finished rounds
    pub fn complete(&mut self, summaries: Vec<TestRoundSummary>) {
        self.summaries = summaries;
        self.completed_at = Utc::now();
    }

    /// Share of passed scenario runs across all rounds, in percent
    pub fn pass_rate(&self) -> f64 {
        let (passed, total) = self
            .summaries
            .iter()
            .fold((0, 0), |(p, t), s| (p + s.passed, t + s.total));
        if total == 0 {
            0.0
        } else {
            passed as f64 / total as f64 * 100.0
        }
    }
}

/// Generate unique run ID
fn generate_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let random: u32 = rand::random::<u32>() % 10000;
    format!("{timestamp}_{random:04}")
}

/// Results storage manager
pub struct ResultsStorage {
    /// Base directory for results
    base_dir: PathBuf,
}

impl ResultsStorage {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn run_path(&self, run_id: &str) -> PathBuf {
        self.base_dir.join(format!("{run_id}.json"))
    }

    /// Save a run
    pub fn save(&self, run: &StoredRun) -> Result<PathBuf> {
        fs::create_dir_all(&self.base_dir)
            .with_context(|| format!("Failed to create {}", self.base_dir.display()))?;

        let path = self.run_path(&run.id);
        let file = File::create(&path).context("Failed to create results file")?;
        serde_json::to_writer_pretty(BufWriter::new(file), run).context("Failed to write results")?;

        info!("Saved results to {}", path.display());
        Ok(path)
    }

    /// Load a run by ID
    pub fn load(&self, run_id: &str) -> Result<StoredRun> {
        self.load_from_path(&self.run_path(run_id))
            .with_context(|| format!("Failed to load run {run_id}"))
    }

    pub fn load_from_path(&self, path: &Path) -> Result<StoredRun> {
        let file = File::open(path).context("Failed to open results file")?;
        let run = serde_json::from_reader(BufReader::new(file)).context("Failed to parse results")?;
        debug!("Loaded results from {}", path.display());
        Ok(run)
    }

    /// All runs, newest first; unreadable files are skipped
    pub fn list_runs(&self) -> Result<Vec<RunInfo>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        for entry in fs::read_dir(&self.base_dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                match self.load_from_path(&path) {
                    Ok(run) => runs.push(RunInfo {
                        pass_rate: run.pass_rate(),
                        rounds: run.summaries.len(),
                        id: run.id,
                        started_at: run.started_at,
                    }),
                    Err(e) => debug!("Failed to load {}: {}", path.display(), e),
                }
            }
        }

        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }

    /// Most recent run
    pub fn latest(&self) -> Result<Option<StoredRun>> {
        match self.list_runs()?.first() {
            Some(info) => Ok(Some(self.load(&info.id)?)),
            None => Ok(None),
        }
    }

    /// Export a run to a file
    pub fn export(&self, run: &StoredRun, path: &Path, format: ExportFormat) -> Result<()> {
        match format {
            ExportFormat::Json => {
                let file = File::create(path)?;
                serde_json::to_writer_pretty(BufWriter::new(file), run)?;
            }
            ExportFormat::Csv => {
                let mut writer = csv::Writer::from_path(path)?;
                writer.write_record(["round", "scenario", "polarion", "status", "duration_ms", "message"])?;

                for summary in &run.summaries {
                    for result in &summary.results {
                        writer.write_record([
                            summary.round.to_string(),
                            result.scenario.id().to_string(),
                            result.scenario.polarion().to_string(),
                            result.status.to_string(),
                            result.duration_ms.to_string(),
                            result.message.clone().unwrap_or_default(),
                        ])?;
                    }
                }
                writer.flush()?;
            }
        }

        info!("Exported results to {}", path.display());
        Ok(())
    }
}

/// Brief run information
#[derive(Clone, Debug)]
pub struct RunInfo {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub rounds: usize,
    pub pass_rate: f64,
}

/// Export format
#[derive(Clone, Copy, Debug)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(ExportFormat::Json),
            "csv" => Some(ExportFormat::Csv),
            _ => None,
        }
    }

    pub fn from_extension(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TestResult;

    fn finished_run() -> StoredRun {
        let mut run = StoredRun::new(Scenario::all());
        run.complete(vec![TestRoundSummary::new(
            1,
            vec![
                TestResult::pass(Scenario::LocalnetDefaultBridge, 90_000),
                TestResult::fail(Scenario::LocalnetAdditionalBridge, 80_000, "TCP connection lost"),
            ],
        )]);
        run
    }

    #[test]
    fn test_generate_run_id() {
        let id = generate_run_id();
        assert_eq!(id.len(), "20260101_120000_0000".len());
    }

    #[test]
    fn test_save_load_list() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ResultsStorage::new(dir.path().join("results"));
        assert!(storage.list_runs().unwrap().is_empty());

        let run = finished_run();
        storage.save(&run).unwrap();
        fs::write(dir.path().join("results").join("garbage.json"), "not json").unwrap();

        let loaded = storage.load(&run.id).unwrap();
        assert_eq!(loaded.scenarios, Scenario::all());
        assert_eq!(loaded.summaries[0].passed, 1);

        let runs = storage.list_runs().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].pass_rate, 50.0);
        assert_eq!(storage.latest().unwrap().unwrap().id, run.id);
    }

    #[test]
    fn test_export_csv() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ResultsStorage::new(dir.path());
        let path = dir.path().join("run.csv");
        storage.export(&finished_run(), &path, ExportFormat::Csv).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines[0], "round,scenario,polarion,status,duration_ms,message");
        assert_eq!(lines[2], "1,localnet-additional-bridge,CNV-11905,FAIL,80000,TCP connection lost");
    }

    #[test]
    fn test_export_format() {
        assert!(matches!(ExportFormat::from_str("json"), Some(ExportFormat::Json)));
        assert!(matches!(
            ExportFormat::from_extension(Path::new("out.CSV")),
            Some(ExportFormat::Csv)
        ));
        assert!(ExportFormat::from_str("unknown").is_none());
    }
}
