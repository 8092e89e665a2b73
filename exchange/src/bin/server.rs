//! Follow exchange server binary
//!
//! Usage: `exchange-server [CONFIG.toml]`. Without a path the configuration
//! comes from `EXCHANGE_CONFIG` or, failing that, the environment.

use anyhow::Context;
use follow_exchange::{Config, Exchange, LogNotifier, SnapshotFollowGraph};
use ledger_core::Ledger;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());
    if std::env::var("EXCHANGE_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = match std::env::args()
        .nth(1)
        .or_else(|| std::env::var("EXCHANGE_CONFIG").ok())
    {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("loading configuration from {}", path))?,
        None => Config::from_env().context("loading configuration from environment")?,
    };

    tracing::info!(service = %config.service_name, "Starting follow exchange");

    let ledger = Ledger::open(config.ledger.clone())
        .await
        .context("opening ledger")?;

    let oracle = match &config.oracle.snapshot_path {
        Some(path) => SnapshotFollowGraph::from_file(path)
            .with_context(|| format!("loading follow graph from {}", path.display()))?,
        None => {
            tracing::warn!("No follow graph snapshot configured, starting empty");
            SnapshotFollowGraph::new()
        }
    };

    let exchange = Exchange::new(config, ledger, Arc::new(oracle), Arc::new(LogNotifier))?;
    let scheduler = exchange.start_scheduler();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down follow exchange");

    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await?;
    }
    exchange.shutdown().await?;
    Ok(())
}
