//! localnet-e2e - OVN-Kubernetes localnet end-to-end suite for KubeVirt
//!
//! Deploys two Fedora guests on a localnet secondary network, runs iperf3
//! between them over their serial consoles, live-migrates the client guest
//! and checks the TCP connection survived.
//!
//! ## Features
//!
//! - Localnet over the default `br-ex` bridge or an additional OVS bridge
//! - Scoped fixtures: every object a scenario creates is torn down
//! - Serial console automation through `virtctl console`
//! - Multiple output formats (Table, JSON, CSV) and archived runs
//!
//! ## Usage
//!
//! ```bash
//! # Run every scenario
//! localnet-e2e run
//!
//! # Run the single-NIC scenario three times
//! localnet-e2e run --marker single_nic --rounds 3
//!
//! # Render what a scenario would deploy
//! localnet-e2e manifest --scenario localnet-additional-bridge --nic ens10
//!
//! # Run a command in a guest
//! localnet-e2e console test-vm1 -n test-localnet-ns1 --command "ip addr"
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::time::Duration;
use tracing::info;

mod cli;
mod config;
mod executor;
mod fixtures;
mod k8s;
mod kubevirt;
mod models;
mod network;
mod output;
mod results;
mod tests;
mod utils;

use cli::Args;
use config::SuiteConfig;
use executor::{select_scenarios, SuiteRunner};
use fixtures::Fixtures;
use k8s::K8sClient;
use kubevirt::{with_console, ConsoleLauncher, ConsoleTarget};
use models::Scenario;
use output::{write_results_to_file, OutputFormat, ResultFormatter};
use results::{ExportFormat, ResultsStorage, StoredRun};
use utils::{init_logger, LogLevel};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(LogLevel::from_verbose(args.verbose));

    let config_path = args.config.as_deref();
    let failed = match args.command {
        cli::Command::Run(run_args) => run_scenarios(SuiteConfig::resolve(config_path)?, run_args).await?,
        cli::Command::List(list_args) => {
            list_scenarios(list_args);
            false
        }
        cli::Command::Manifest(manifest_args) => {
            render_manifest(&SuiteConfig::resolve(config_path)?, manifest_args)?;
            false
        }
        cli::Command::Console(console_args) => {
            open_console(&SuiteConfig::resolve(config_path)?, console_args).await?;
            false
        }
        cli::Command::Results(results_args) => {
            show_results(&SuiteConfig::resolve(config_path)?, results_args)?;
            false
        }
        cli::Command::Config(config_args) => {
            manage_config(config_path, config_args)?;
            false
        }
    };

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

fn parse_format(format: &str) -> Result<OutputFormat> {
    OutputFormat::from_str(format).ok_or_else(|| anyhow::anyhow!("Unknown output format: {format}"))
}

/// Returns whether any scenario failed or errored
async fn run_scenarios(config: SuiteConfig, args: cli::RunArgs) -> Result<bool> {
    let format = parse_format(&args.format)?;
    let scenarios = select_scenarios(&args.scenarios, args.marker.as_deref())?;
    if args.rounds == 0 {
        anyhow::bail!("--rounds must be at least 1");
    }

    let client = K8sClient::new().await?;
    client.check_prerequisites().await?;
    let k8s_version = client.client().apiserver_version().await.ok().map(|v| v.git_version);
    info!(
        "Running {} scenario(s) against Kubernetes {}",
        scenarios.len(),
        k8s_version.as_deref().unwrap_or("(unknown version)")
    );

    let storage = ResultsStorage::new(config.results_dir());
    let mut run = StoredRun::new(scenarios.clone()).with_k8s_version(k8s_version);

    let mut runner = SuiteRunner::new(Fixtures::new(config, client));
    let summaries = runner.run_rounds(&scenarios, args.rounds).await;

    println!("{}", ResultFormatter::new(format).format_rounds(&summaries));
    if let Some(path) = &args.output {
        write_results_to_file(path, &summaries, format)?;
        println!("\n✓ Results written to {path}");
    }

    let failed = summaries.iter().any(|s| s.has_failures());
    run.complete(summaries);

    if !args.no_save {
        let path = storage.save(&run)?;
        println!("\n✓ Run {} archived to {}", run.id, path.display());
    }

    Ok(failed)
}

fn list_scenarios(args: cli::ListArgs) {
    println!("\nLocalnet scenarios\n");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    for scenario in Scenario::all() {
        if args.detailed {
            println!("  {:28} {}", scenario.id(), scenario.name());
            println!("  {:28} polarion: {}", "", scenario.polarion());
            println!("  {:28} markers:  {}", "", scenario.markers().join(", "));
            println!();
        } else {
            println!("  {}", scenario.id());
        }
    }

    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
}

fn render_manifest(config: &SuiteConfig, args: cli::ManifestArgs) -> Result<()> {
    let scenario =
        Scenario::from_id(&args.scenario).ok_or_else(|| anyhow::anyhow!("Unknown scenario: {}", args.scenario))?;
    let vlan_id = args.vlan.unwrap_or(config.vlans.start);
    let nic = args.nic.or_else(|| config.secondary_nic.clone());

    let plan = tests::plan(config, scenario, vlan_id, nic.as_deref())?;
    let manifests = plan.manifests()?;

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&manifests)?),
        "yaml" => {
            for manifest in &manifests {
                print!("---\n{}", serde_yaml::to_string(manifest)?);
            }
        }
        other => anyhow::bail!("Unknown manifest format: {other}"),
    }
    Ok(())
}

async fn open_console(config: &SuiteConfig, args: cli::ConsoleArgs) -> Result<()> {
    let target = ConsoleTarget::new(args.vm, args.namespace)
        .credentials(Some(config.vm.username.clone()), Some(config.vm.password.clone()))
        .credentials(args.username, args.password);

    let console = ConsoleLauncher::from_config(config).console(target)?;
    let timeout = Duration::from_secs(config.console.command_timeout_secs);
    let command = args.command;

    let output = tokio::task::spawn_blocking(move || {
        with_console(console, |c| match &command {
            Some(command) => c.run_command(command, timeout).map(Some),
            None => Ok(None),
        })
    })
    .await
    .context("Console task panicked")??;

    match output {
        Some(output) => {
            if !output.output.is_empty() {
                println!("{}", output.output);
            }
            println!("rc={}", output.exit_status);
        }
        None => println!("✓ Logged in and out"),
    }
    Ok(())
}

fn show_results(config: &SuiteConfig, args: cli::ResultsArgs) -> Result<()> {
    let storage = ResultsStorage::new(config.results_dir());

    match args.action {
        cli::ResultsAction::List => {
            let runs = storage.list_runs()?;
            if runs.is_empty() {
                println!("\nNo archived runs in {}", storage.base_dir().display());
                println!("   Run scenarios with: localnet-e2e run");
                return Ok(());
            }

            println!("\n{:22} {:20} {:>6} {:>8}", "Run", "Started", "Rounds", "Pass");
            println!("{:-<60}", "");
            for run in runs {
                println!(
                    "{:22} {:20} {:>6} {:>7.1}%",
                    run.id,
                    run.started_at.format("%Y-%m-%d %H:%M:%S"),
                    run.rounds,
                    run.pass_rate
                );
            }
        }

        cli::ResultsAction::Show { id, format } => {
            let format = parse_format(&format)?;
            let run = match id {
                Some(id) => storage.load(&id)?,
                None => storage.latest()?.context("No archived runs")?,
            };

            if matches!(format, OutputFormat::Table) {
                println!("\nRun {} ({})", run.id, run.started_at.format("%Y-%m-%d %H:%M:%S"));
                if let Some(version) = &run.environment.k8s_version {
                    println!("Kubernetes {version}");
                }
            }
            println!("{}", ResultFormatter::new(format).format_rounds(&run.summaries));
        }

        cli::ResultsAction::Export { id, output } => {
            let run = storage.load(&id)?;
            let path = Path::new(&output);
            let format = ExportFormat::from_extension(path)
                .ok_or_else(|| anyhow::anyhow!("Cannot infer export format from {output}; use .json or .csv"))?;
            storage.export(&run, path, format)?;
            println!("✓ Run {id} exported to {output}");
        }
    }

    Ok(())
}

fn manage_config(config_path: Option<&str>, args: cli::ConfigArgs) -> Result<()> {
    use config::ConfigFile;

    match args.action {
        cli::ConfigAction::Init { output, force } => {
            let path = Path::new(&output);
            if path.exists() && !force {
                anyhow::bail!("Configuration file already exists: {output}. Use --force to overwrite.");
            }

            ConfigFile::default().save(path)?;
            println!("✓ Configuration file created: {output}");
            println!("\nEdit the file to customize your settings.");
        }

        cli::ConfigAction::Show { format } => {
            let file = ConfigFile {
                suite: SuiteConfig::resolve(config_path)?.redacted(),
                ..Default::default()
            };
            let output = if format == "json" {
                serde_json::to_string_pretty(&file)?
            } else {
                serde_yaml::to_string(&file)?
            };
            println!("{output}");
        }

        cli::ConfigAction::Env => {
            config::EnvConfig::load().print_summary();
            println!();
            config::print_env_help();
        }
    }

    Ok(())
}
