// Copyright (c) ChainBallot, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use ballot_sync::config::{Config, VoteSyncConfig};
use ballot_sync::metrics::start_metrics_server;
use ballot_sync::node::run_sync_node;
use ballot_sync_pg_db::DbArgs;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Parser)]
#[command(name = "ballot-sync", about = "On-chain vote event sync engine", version)]
struct Args {
    /// Path to the sync config file (YAML or JSON).
    #[arg(long)]
    config_path: PathBuf,

    /// PostgreSQL connection string.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Url,

    #[command(flatten)]
    db_args: DbArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = VoteSyncConfig::load(&args.config_path)?;
    tracing::info!(
        "[vote-sync] Starting ballot-sync v{} with config from {:?}",
        env!("CARGO_PKG_VERSION"),
        args.config_path
    );

    let registry = prometheus::Registry::new();
    let metrics_addr = SocketAddr::new(
        IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
        config.metrics_port,
    );
    let _metrics_server = start_metrics_server(metrics_addr, registry.clone()).await?;

    let cancel = CancellationToken::new();
    let handles = run_sync_node(
        config,
        args.database_url,
        args.db_args,
        &registry,
        cancel.clone(),
    )
    .await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("[vote-sync] Received shutdown signal, draining tasks");
    cancel.cancel();
    if let Some(handles) = handles {
        for handle in handles {
            let _ = handle.await;
        }
    }
    Ok(())
}
