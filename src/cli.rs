//! benchctl CLI
//!
//! Commands:
//! - `benchctl metrics` - Run a set of benchmarks against a control agent
//! - `benchctl list` - List the benchmarks in the catalog

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tabled::{Table, Tabled};

use crate::catalog::BenchmarkCatalog;
use crate::coordinator::RunReport;
use crate::error::Result;
use crate::request::{parse_duration, RunRequest};

/// Benchmark harness for long-running agents
#[derive(Parser, Debug)]
#[command(name = "benchctl")]
#[command(author, version, about = "Run a control agent plus parallel benchmark agents")]
pub struct Cli {
    /// Harness config file (TOML); defaults to config/benchctl.toml if present
    #[arg(short, long, global = true, env = "BENCHCTL_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a set of benchmarks.
    Metrics(MetricsArgs),

    /// List all possible benchmarks
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug, Clone)]
pub struct MetricsArgs {
    /// The name of the benchmark run, added to the exported metrics
    #[arg(short, long, default_value = "")]
    pub name: String,

    /// How long to run the test for (e.g. 30s, 5m, 1h)
    #[arg(short, long, value_parser = parse_duration_arg)]
    pub duration: Duration,

    /// The type of metrics to use; single, many, churn, large or any source the control config defines
    #[arg(short = 't', long = "type", default_value = "")]
    pub metric_source: String,

    /// Comma-separated benchmarks to run. Run `benchctl list` to see them all.
    #[arg(short, long)]
    pub benchmarks: String,

    /// Simulate the network being down for the duration of the test
    #[arg(short = 'a', long)]
    pub network_down: bool,
}

impl MetricsArgs {
    pub fn into_request(self) -> Result<RunRequest> {
        Ok(RunRequest::new(self.name, self.duration, &self.benchmarks)?
            .with_fault_injection_source(self.metric_source)
            .with_network_down(self.network_down))
    }
}

fn parse_duration_arg(raw: &str) -> std::result::Result<Duration, String> {
    parse_duration(raw).map_err(|e| e.to_string())
}

#[derive(Tabled, Serialize)]
struct CatalogRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "CONFIG")]
    config: String,
    #[tabled(rename = "DESCRIPTION")]
    description: String,
}

/// Print the catalog sorted by name
pub fn print_catalog(catalog: &BenchmarkCatalog, json: bool) -> anyhow::Result<()> {
    let rows: Vec<CatalogRow> = catalog
        .sorted()
        .into_iter()
        .map(|def| CatalogRow {
            name: def.name.clone(),
            config: def.config_path.display().to_string(),
            description: def.description.clone(),
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else if rows.is_empty() {
        println!("(no benchmarks)");
    } else {
        println!("{}", Table::new(&rows));
    }
    Ok(())
}

#[derive(Tabled)]
struct SubjectRow {
    #[tabled(rename = "BENCHMARK")]
    benchmark: String,
    #[tabled(rename = "PID")]
    pid: String,
    #[tabled(rename = "PORT")]
    port: u16,
    #[tabled(rename = "STORAGE")]
    storage: String,
    #[tabled(rename = "STOPPED")]
    outcome: String,
}

/// Print a finished run's summary
pub fn print_report(report: &RunReport) {
    println!(
        "\nRun {:?} ended: {} after {}s (control agent {})",
        report.run_name,
        report.wake,
        report.elapsed().num_seconds(),
        report.control_outcome
    );

    let rows: Vec<SubjectRow> = report
        .subjects
        .iter()
        .map(|s| SubjectRow {
            benchmark: s.benchmark_name.clone(),
            pid: s.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
            port: s.port,
            storage: s.storage_dir.display().to_string(),
            outcome: s.outcome.to_string(),
        })
        .collect();
    if !rows.is_empty() {
        println!("{}", Table::new(rows));
    }
}
