use benchctl::catalog::BenchmarkCatalog;
use benchctl::cli::{self, Cli, Commands, MetricsArgs};
use benchctl::config::HarnessConfig;
use benchctl::coordinator::RunCoordinator;
use benchctl::error::BenchError;
use benchctl::fault_server::FaultServer;
use benchctl::logging::{init_logging, init_logging_simple};
use benchctl::process::SystemSpawner;
use benchctl::shutdown::ShutdownListener;
use clap::Parser;
use std::path::Path;
use tracing::{error, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Metrics(args) => {
            let _guard = init_logging(&config.logging);
            if let Err(e) = run_metrics(config, args).await {
                error!("Benchmark run failed: {e}");
                return Err(e.into());
            }
        }
        Commands::List { json } => {
            init_logging_simple();
            let catalog = BenchmarkCatalog::load(&config.catalog.path)?;
            cli::print_catalog(&catalog, json)?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<HarnessConfig, BenchError> {
    let config = match path {
        Some(path) => HarnessConfig::load_from(path, true)?,
        None => HarnessConfig::load()?,
    };
    config
        .validate()
        .map_err(|problems| BenchError::InvalidConfig(problems.join("; ")))?;
    Ok(config)
}

async fn run_metrics(config: HarnessConfig, args: MetricsArgs) -> Result<(), BenchError> {
    let request = args.into_request()?;

    // Handlers go in before anything is spawned so an early Ctrl-C is buffered.
    let listener = ShutdownListener::install()?;

    let fault_server = config.fault_server.clone();
    let mut coordinator = RunCoordinator::new(config, SystemSpawner);
    coordinator.check_prerequisites()?;

    if fault_server.enabled {
        FaultServer::from_config(&fault_server)?.spawn();
    }

    let report = coordinator.run(request, listener.into_stream()).await?;

    if report.forced_kills() > 0 {
        warn!(forced_kills = report.forced_kills(), "Some agent groups needed SIGKILL");
    }
    cli::print_report(&report);
    Ok(())
}
