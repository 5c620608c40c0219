//! CLI entry point for the panopticond network inventory daemon.

use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::{fmt, EnvFilter};

use panopticon_core::{AppConfig, ScanParameters};
use panopticon_store::ReconciliationStore;

use panopticon_scan::runner::{MockRunner, NmapRunner, ScanRunner};
use panopticon_scan::{MaintenanceScheduler, ScanOrchestrator};

#[derive(Parser)]
#[command(name = "panopticond")]
#[command(about = "Network inventory scanner with change tracking")]
struct Cli {
    /// Run a single scan, print the scan record and exit.
    #[arg(long)]
    once: bool,

    /// Run as daemon with scheduled scans and maintenance.
    #[arg(long)]
    daemon: bool,

    /// Scan template: default, quick, stealth, thorough.
    #[arg(short, long)]
    template: Option<String>,

    /// Target to scan (CIDR or single address); defaults to scanner.target_network.
    #[arg(long)]
    target: Option<String>,

    /// Override the template's packets-per-second limit.
    #[arg(long)]
    rate_limit: Option<u32>,

    /// Scan all 65535 ports.
    #[arg(long)]
    all_ports: bool,

    /// Skip host discovery (-Pn).
    #[arg(long)]
    no_ping: bool,

    /// Use synthetic results instead of running nmap.
    #[arg(long)]
    mock: bool,

    /// Config file prefix (default: panopticon).
    #[arg(short, long, default_value = "panopticon")]
    config: String,

    /// Log filter, e.g. `debug` or `panopticon_store=trace`; overrides RUST_LOG.
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn has_overrides(&self) -> bool {
        self.target.is_some() || self.rate_limit.is_some() || self.all_ports || self.no_ping
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.log_level.as_deref() {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    fmt().with_env_filter(filter).json().init();

    let config = Arc::new(AppConfig::load(&cli.config)?);

    let store = {
        let db = config.database.clone();
        Arc::new(tokio::task::spawn_blocking(move || ReconciliationStore::open(&db)).await??)
    };
    tracing::info!(path = %store.path().display(), "Database opened");

    let runner: Arc<dyn ScanRunner> = if cli.mock {
        tracing::info!("Mock mode enabled, nmap will not be executed");
        Arc::new(MockRunner::default())
    } else {
        let nmap = NmapRunner::new(&config.scanner.nmap_path);
        let version = nmap.verify_installation().await?;
        tracing::info!(nmap_version = %version.lines().next().unwrap_or("").trim(), "Nmap verified");
        Arc::new(nmap)
    };

    let orchestrator = Arc::new(ScanOrchestrator::new(
        config.scanner.clone(),
        store.clone(),
        runner,
    ));

    if cli.once {
        let template = cli
            .template
            .clone()
            .unwrap_or_else(|| config.scanner.default_template.clone());

        let scan_id = if cli.has_overrides() {
            orchestrator
                .run_manual_scan(ScanParameters {
                    template,
                    target_network: cli.target.clone(),
                    rate_limit: cli.rate_limit,
                    scan_all_ports: cli.all_ports,
                    disable_ping: cli.no_ping,
                })
                .await?
        } else {
            orchestrator.run_scan(&template).await?
        };

        let scan = orchestrator
            .get_scan(scan_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("scan #{scan_id} disappeared after completion"))?;
        println!("{}", serde_json::to_string_pretty(&scan)?);
    } else if cli.daemon {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("Shutdown signal received"),
                Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
            }
            let _ = shutdown_tx.send(true);
        });

        let scheduler = MaintenanceScheduler::new(config.clone(), orchestrator, store.clone());
        scheduler.run(shutdown_rx).await;

        if config.maintenance.database_optimize {
            let optimized = tokio::task::spawn_blocking(move || store.optimize_database()).await?;
            if let Err(e) = optimized {
                tracing::error!(error = %e, "Failed to optimize database on shutdown");
            }
        }
        tracing::info!("panopticond stopped");
    } else {
        anyhow::bail!("Specify --once (one-shot scan) or --daemon (scheduled scanning)");
    }

    Ok(())
}
