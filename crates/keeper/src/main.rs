//! Keeper binary

use anyhow::Context;
use common::logging::{self, LogFormat};
use keeper::{Config, KeeperServer};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Tracing is not initialised yet, errors go to stderr through anyhow.
    let config = Config::load().context("loading configuration")?;

    logging::init_with(
        LogFormat::from_name(config.logging.format.as_deref()),
        config.log_level(),
    );

    tracing::info!("Keeper starting");

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        tracing::info!("Shutdown signal received");
        signal.cancel();
    });

    KeeperServer::new(config)
        .run(shutdown)
        .await
        .context("keeper server failed")?;

    Ok(())
}
