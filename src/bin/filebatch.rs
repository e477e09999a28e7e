//! # filebatch
//!
//! Watches a directory, splits new files into line records and logs (or
//! writes) the batches the aggregator releases. Runs until Ctrl+C or SIGTERM,
//! then flushes every open group before exiting.

use anyhow::Context;
use clap::Parser;
use filebatch::config::ConfigManager;
use filebatch::logging::init_tracing;
use filebatch::pipeline::IngestPipeline;
use filebatch::sink;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "filebatch")]
#[command(about = "Split new files into line records and regroup them into batches")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Directory searched for filebatch.toml and filebatch.<environment>.toml
    #[arg(short, long, env = "FILEBATCH_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Explicit configuration file; takes precedence over --config-dir
    #[arg(long)]
    config: Option<PathBuf>,

    /// Environment name used to pick the environment-specific file
    #[arg(short, long, env = "FILEBATCH_ENV")]
    environment: Option<String>,

    /// Scan the directory once, flush and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let manager = match (&cli.config, &cli.environment) {
        (Some(path), _) => ConfigManager::load_from_file(path),
        (None, Some(environment)) => {
            ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), environment)
        }
        (None, None) => ConfigManager::load_from_directory(cli.config_dir.clone()),
    }
    .context("failed to load configuration")?;

    let config = manager.config().clone();
    let sink = sink::from_config(&config.sink).context("failed to create sink")?;
    let pipeline = IngestPipeline::new(config, sink).context("failed to start pipeline")?;

    info!(
        environment = %manager.environment(),
        once = cli.once,
        "filebatch started"
    );

    let report = if cli.once {
        if let Err(e) = pipeline.poll_once().await {
            error!(error = %e, "Directory scan failed");
        }
        pipeline.shutdown().await
    } else {
        pipeline.run(shutdown_signal()).await
    };

    info!(
        files_seen = report.files_seen,
        groups_flushed = report.shutdown.groups_flushed,
        batches_delivered = report.dispatch.delivered,
        batches_rejected = report.dispatch.rejected,
        late_records = report.aggregator.records_late,
        "filebatch shutdown complete"
    );
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received SIGTERM");
        },
    }
}
