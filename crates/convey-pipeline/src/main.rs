use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};

use convey_core::catalog::SourceCatalog;
use convey_core::config::ConveyConfig;
use convey_pipeline::engine::CdcEngine;
use convey_queue::{HttpQueue, MessageQueue};
use convey_store::Store;

#[derive(Parser)]
#[command(name = "convey-cdc", about = "Continuous conversation CDC bridge")]
struct Cli {
    /// Path to convey.toml (falls back to CONVEY_CONFIG, then the default).
    #[arg(long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Drain the inbound queue until empty, then exit.
    #[command(name = "flush_sqs")]
    FlushSqs,
    /// Continuous inbound-only polling with the given sleep.
    #[command(name = "flush_mode")]
    FlushMode {
        #[arg(default_value_t = 10)]
        interval_seconds: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "convey_pipeline=info,convey_store=info,convey_queue=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let config = ConveyConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        ConveyConfig::default()
    });

    // Fatal startup: no DB or queue means no pipeline.
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
    if let Err(e) = queue.probe(&config.queue.inbound).await {
        error!(err = %e, "inbound queue unreachable");
        anyhow::bail!("inbound queue unreachable: {e}");
    }

    let catalog = SourceCatalog::default();
    let engine = CdcEngine::new(config, catalog, store, queue);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    match cli.command {
        None => {
            engine.run(shutdown_rx).await?;
        }
        Some(Command::FlushSqs) => {
            let summary = engine.ingestor().drain().await?;
            info!(
                received = summary.received,
                written = summary.written,
                failed = summary.failed,
                "inbound queue drained"
            );
        }
        Some(Command::FlushMode { interval_seconds }) => {
            info!(interval_seconds, "inbound-only polling mode");
            let mut shutdown_rx = shutdown_rx;
            loop {
                engine.ingestor().run_pass().await?;
                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_secs(interval_seconds)) => {}
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        }
    }

    Ok(())
}
