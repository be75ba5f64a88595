//! Reload Server - Main entry point
//!
//! TCP receiver for hot-reload packages.

use anyhow::{Context, Result};
use clap::Parser;
use reload_server::{
    config::Config, daemon::shutdown::ShutdownCoordinator, fs::tree, utils, ReloadServer,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config and RELOADER_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Working directory receiving the app files (overrides config and WORK_DIR)
    #[arg(short, long, value_name = "DIR")]
    work_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => Config::default(),
    };
    config.apply_env();
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(work_dir) = args.work_dir {
        config.server.work_dir = work_dir;
    }
    if let Some(level) = args.log_level {
        config.log.level = level;
    }

    // Initialize logging
    utils::logger::init(&config.log)?;
    config.validate()?;

    tracing::info!("Starting reload-server v{}", env!("CARGO_PKG_VERSION"));

    let work_dir = &config.server.work_dir;
    if let Err(e) = std::fs::create_dir_all(work_dir) {
        tracing::warn!("Cannot create working directory {}: {}", work_dir.display(), e);
    }
    match tree::summarize(work_dir) {
        Ok(summary) => tracing::info!(
            "Working directory holds {} file(s), {} bytes",
            summary.files,
            summary.bytes
        ),
        Err(e) => tracing::warn!("Cannot inspect working directory: {}", e),
    }

    let port = config.server.port;
    let server = match ReloadServer::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("Failed to listen on port {}: {}", port, e);
            return Err(e.into());
        }
    };

    // Translate SIGINT/SIGTERM into cancellation
    let shutdown_coordinator = ShutdownCoordinator::new();
    let shutdown = shutdown_coordinator.token();
    tokio::spawn(async move {
        shutdown_coordinator.wait_for_signal().await;
    });

    server.run(shutdown).await?;

    Ok(())
}
