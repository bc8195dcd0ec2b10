//! Output formatters for scenario results
//!
//! Provides JSON, CSV, table and one-line summary output.

use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;

use crate::models::{TestResult, TestRoundSummary, TestStatus};

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Csv,
    Summary,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "csv" => Some(OutputFormat::Csv),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }
}

/// Result formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    fn json<T: Serialize>(&self, value: &T) -> String {
        let rendered = if self.format == OutputFormat::JsonPretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        rendered.unwrap_or_default()
    }

    fn status_label(&self, status: TestStatus) -> String {
        let plain = format!("{} {}", status.symbol(), status);
        if !self.colorize {
            return plain;
        }
        let color = match status {
            TestStatus::Pass => "32",
            TestStatus::Skip => "33",
            TestStatus::Fail | TestStatus::Error => "31",
        };
        format!("\x1b[{color}m{plain}\x1b[0m")
    }

    fn format_result_table(&self, result: &TestResult) -> String {
        let mut line = format!(
            "{:28} {:10} {} [{:>8}ms]",
            result.scenario.id(),
            result.scenario.polarion(),
            self.status_label(result.status),
            result.duration_ms
        );
        if let Some(message) = result.message.as_deref().filter(|_| !result.status.is_success()) {
            line.push_str(&format!("\n    {message}"));
        }
        line
    }

    /// Format a round
    pub fn format_summary(&self, summary: &TestRoundSummary) -> String {
        match self.format {
            OutputFormat::Table => self.format_summary_table(summary),
            OutputFormat::Json | OutputFormat::JsonPretty => self.json(summary),
            OutputFormat::Csv => format_csv(std::slice::from_ref(summary)),
            OutputFormat::Summary => format!(
                "Round {}: {}/{} passed ({:.1}%) in {}ms",
                summary.round,
                summary.passed,
                summary.total,
                summary.pass_rate(),
                summary.total_duration_ms
            ),
        }
    }

    fn format_summary_table(&self, summary: &TestRoundSummary) -> String {
        let rule = "═".repeat(64);
        let mut output = format!("\n{rule}\n  Round {}\n{rule}\n", summary.round);

        for result in &summary.results {
            output.push_str(&format!("  {}\n", self.format_result_table(result)));
        }

        output.push_str(&format!("{rule}\n"));
        output.push_str(&format!(
            "  Total: {} | Pass: {} | Fail: {} | Skip: {} | Error: {}\n",
            summary.total, summary.passed, summary.failed, summary.skipped, summary.errors
        ));
        output.push_str(&format!(
            "  Pass Rate: {:.1}% | Duration: {}ms\n",
            summary.pass_rate(),
            summary.total_duration_ms
        ));
        output
    }

    /// Format several rounds, with per-scenario pass rates when there is
    /// more than one
    pub fn format_rounds(&self, summaries: &[TestRoundSummary]) -> String {
        match self.format {
            OutputFormat::Json | OutputFormat::JsonPretty => self.json(&summaries),
            OutputFormat::Csv => format_csv(summaries),
            OutputFormat::Table | OutputFormat::Summary => {
                let mut output: Vec<String> = summaries.iter().map(|s| self.format_summary(s)).collect();
                if summaries.len() > 1 {
                    output.push(self.format_pass_rates(summaries));
                }
                output.join("\n")
            }
        }
    }

    fn format_pass_rates(&self, summaries: &[TestRoundSummary]) -> String {
        let mut output = format!("\nPass rates over {} rounds:\n", summaries.len());
        for (scenario, rate) in scenario_pass_rates(summaries) {
            output.push_str(&format!("  {scenario:28} {rate:5.1}%\n"));
        }
        output
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

fn csv_line(result: &TestResult) -> String {
    format!(
        "{},{},{},{},\"{}\"",
        result.scenario.id(),
        result.scenario.polarion(),
        result.status,
        result.duration_ms,
        result.message.as_deref().unwrap_or("").replace('"', "\"\"")
    )
}

fn format_csv(summaries: &[TestRoundSummary]) -> String {
    let mut output = String::from("round,scenario,polarion,status,duration_ms,message\n");
    for summary in summaries {
        for result in &summary.results {
            output.push_str(&format!("{},{}\n", summary.round, csv_line(result)));
        }
    }
    output
}

/// Pass rate per scenario id across `summaries`
pub fn scenario_pass_rates(summaries: &[TestRoundSummary]) -> BTreeMap<&'static str, f64> {
    let mut counts: BTreeMap<&'static str, (usize, usize)> = BTreeMap::new();
    for result in summaries.iter().flat_map(|s| &s.results) {
        let entry = counts.entry(result.scenario.id()).or_default();
        entry.1 += 1;
        if result.status.is_success() {
            entry.0 += 1;
        }
    }
    counts
        .into_iter()
        .map(|(id, (passed, total))| (id, passed as f64 / total as f64 * 100.0))
        .collect()
}

/// Write rounds to a file, uncolored
pub fn write_results_to_file(path: &str, summaries: &[TestRoundSummary], format: OutputFormat) -> anyhow::Result<()> {
    let formatter = ResultFormatter::new(format).no_color();
    let content = formatter.format_rounds(summaries);

    let mut file = std::fs::File::create(path)?;
    file.write_all(content.as_bytes())?;

    Ok(())
}
