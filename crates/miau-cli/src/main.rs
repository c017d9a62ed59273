mod bootstrap_helpers;
mod cli_args;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use miau_gateway::run_gateway_server;
use miau_session::{
    DryRunProtocolClientFactory, HttpMediaFetcher, InstanceRepository, JsonFileInstanceRepository,
    SessionManager,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::bootstrap_helpers::{
    init_tracing, join_log_retention, log_file_path, spawn_log_retention,
};
use crate::cli_args::Cli;

async fn run_cli(cli: Cli) -> Result<()> {
    let instances_path = cli.instances_path();
    let repository: Arc<dyn InstanceRepository> = Arc::new(
        JsonFileInstanceRepository::open(&instances_path)
            .with_context(|| format!("failed to open {}", instances_path.display()))?,
    );
    let media_fetcher = HttpMediaFetcher::new(cli.media_timeout())
        .context("failed to build media fetcher")?;
    let manager = SessionManager::builder(Arc::new(DryRunProtocolClientFactory {
        auto_login: cli.dry_run_auto_login,
    }))
    .pairing_timings(cli.pairing_timings())
    .presence(cli.presence_delays())
    .media_fetcher(Arc::new(media_fetcher))
    .build();

    let retention_shutdown = CancellationToken::new();
    let retention = spawn_log_retention(
        cli.log_dir.clone(),
        cli.log_max_age(),
        retention_shutdown.clone(),
    );

    info!(
        state = %instances_path.display(),
        log_file = %log_file_path(&cli.log_dir).display(),
        presence_simulation = cli.presence_simulation,
        "miau gateway starting"
    );
    let served = run_gateway_server(cli.gateway_config(), manager, repository).await;

    retention_shutdown.cancel();
    join_log_retention(retention).await;
    served
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_dir, cli.log_rotation_policy())?;
    run_cli(cli).await
}
