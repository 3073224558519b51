//! mtdfs daemon
//!
//! Loads the configuration, brings up logging, metrics and the audit window
//! timer, and keeps the guard alive for the filesystem protocol layer until
//! Ctrl-C. The mount itself is owned by that layer.
//!
//! Usage: `mtdfs [config.json]` (falls back to `$MTDFS_CONFIG`, then defaults)

use std::path::PathBuf;

use mtdfs::{metrics, Guard, GuardConfig};

const CONFIG_ENV: &str = "MTDFS_CONFIG";

fn config_path() -> Option<PathBuf> {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = match config_path() {
        Some(path) => GuardConfig::from_file(&path)?,
        None => GuardConfig::default(),
    };

    mtdfs::tracing::init_tracing("mtdfs", config.otlp_endpoint.as_deref())?;
    metrics::init();

    let mut guard = Guard::new(config);
    guard.start();

    tracing::info!("guard ready, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    tracing::info!("shutting down");
    guard.shutdown().await;
    tracing::debug!(metrics = %metrics::gather_text(), "final metrics");
    mtdfs::tracing::shutdown_tracing();

    Ok(())
}
