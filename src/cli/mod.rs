//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};

/// OVN-Kubernetes localnet end-to-end suite for KubeVirt
#[derive(Parser, Debug)]
#[command(name = "localnet-e2e")]
#[command(version)]
#[command(about = "Verify localnet secondary networks keep TCP connections across VM live migration")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (defaults to the standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run scenarios against the cluster
    Run(RunArgs),

    /// List available scenarios
    List(ListArgs),

    /// Render a scenario's objects without touching the cluster
    Manifest(ManifestArgs),

    /// Log in to a VM serial console
    Console(ConsoleArgs),

    /// View archived runs
    Results(ResultsArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Scenario to run (repeatable; default: all)
    #[arg(short, long = "scenario")]
    pub scenarios: Vec<String>,

    /// Only run scenarios carrying this marker
    #[arg(short, long)]
    pub marker: Option<String>,

    /// Number of rounds
    #[arg(short, long, default_value = "1")]
    pub rounds: u32,

    /// Output format (table, json, json-pretty, csv, summary)
    #[arg(short, long, default_value = "table")]
    pub format: String,

    /// Also write results to this file
    #[arg(short, long)]
    pub output: Option<String>,

    /// Do not archive the run
    #[arg(long)]
    pub no_save: bool,
}

/// Arguments for list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Show polarion IDs and markers
    #[arg(short, long)]
    pub detailed: bool,
}

/// Arguments for manifest command
#[derive(Parser, Debug)]
pub struct ManifestArgs {
    /// Scenario to render
    #[arg(short, long)]
    pub scenario: String,

    /// Worker NIC for the additional bridge (default: configured secondary NIC)
    #[arg(long)]
    pub nic: Option<String>,

    /// VLAN ID (default: first of the configured range)
    #[arg(long)]
    pub vlan: Option<u16>,

    /// Output format (yaml, json)
    #[arg(short, long, default_value = "yaml")]
    pub format: String,
}

/// Arguments for console command
#[derive(Parser, Debug)]
pub struct ConsoleArgs {
    /// VM name
    pub vm: String,

    /// VM namespace
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Login user (default: configured guest user)
    #[arg(short, long)]
    pub username: Option<String>,

    /// Login password (default: configured guest password)
    #[arg(short, long)]
    pub password: Option<String>,

    /// Command to run after login
    #[arg(long)]
    pub command: Option<String>,
}

/// Arguments for results command
#[derive(Parser, Debug)]
pub struct ResultsArgs {
    #[command(subcommand)]
    pub action: ResultsAction,
}

#[derive(Subcommand, Debug)]
pub enum ResultsAction {
    /// List archived runs
    List,

    /// Show a run (default: the latest)
    Show {
        /// Run ID
        id: Option<String>,

        /// Output format (table, json, json-pretty, csv, summary)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Export a run to a JSON or CSV file
    Export {
        /// Run ID
        id: String,

        /// Destination; the extension picks the format
        output: String,
    },
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show {
        /// Output format (yaml, json)
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },

    /// Write a configuration file with default values
    Init {
        /// Output path
        #[arg(short, long, default_value = "./localnet-e2e.yaml")]
        output: String,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Show supported environment variables
    Env,
}
