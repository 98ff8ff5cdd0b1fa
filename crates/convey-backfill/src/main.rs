use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use convey_core::catalog::SourceCatalog;
use convey_core::config::ConveyConfig;
use convey_queue::{HttpQueue, MessageQueue};
use convey_store::Store;

mod engine;

use engine::BackfillEngine;

/// One-shot historical backfill. Must not run while convey-cdc is up, since
/// both write the processed-ID store.
#[derive(Parser)]
#[command(name = "convey-backfill")]
struct Cli {
    /// Path to convey.toml (falls back to CONVEY_CONFIG, then the default).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "convey_backfill=info,convey_pipeline=info,convey_store=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = ConveyConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        ConveyConfig::default()
    });

    let store = Store::open(&config.database.path, &config.source.path)
        .map_err(|e| anyhow::anyhow!("cannot open databases: {e}"))?;
    let queue: Arc<dyn MessageQueue> = Arc::new(HttpQueue::new(
        config.queue.base_url.clone(),
        Some(config.queue.auth_token.clone()),
    ));
    if let Err(e) = queue.probe(&config.queue.outbound).await {
        error!(err = %e, "outbound queue unreachable");
        anyhow::bail!("outbound queue unreachable: {e}");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let engine = BackfillEngine::new(config, SourceCatalog::default(), store, queue);
    engine.run(shutdown_rx).await?;

    Ok(())
}
