// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! `truth-replication` server binary.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use truth_replication::{api, ReplicationConfig, ReplicationService, StoreConfig};

#[derive(Parser, Debug)]
#[command(name = "truth-replication")]
#[command(about = "Truth store with push replication to peer nodes", long_about = None)]
struct Args {
    /// YAML or JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `server.bind_addr`
    #[arg(long)]
    bind: Option<String>,

    /// Override `store.sqlite_path`
    #[arg(long)]
    database: Option<PathBuf>,

    /// Override `local_node_id`
    #[arg(long)]
    node_id: Option<String>,
}

fn load_config(args: &Args) -> Result<ReplicationConfig> {
    let mut config = match &args.config {
        Some(path) => ReplicationConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ReplicationConfig::default(),
    };

    if let Some(bind) = &args.bind {
        config.server.bind_addr = bind.clone();
    }
    if let Some(database) = &args.database {
        config.store = StoreConfig {
            wal_mode: config.store.wal_mode,
            ..StoreConfig::at(database)
        };
    }
    if let Some(node_id) = &args.node_id {
        config.local_node_id = node_id.clone();
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let addr = config.server.socket_addr()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        node_id = %config.local_node_id,
        "Starting truth-replication"
    );

    let service = Arc::new(
        ReplicationService::open(config)
            .await
            .context("Failed to open replication service")?,
    );

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    api::serve(service.clone(), listener, shutdown_signal())
        .await
        .context("HTTP server failed")?;

    service.close().await;
    info!("Stopped");
    Ok(())
}
