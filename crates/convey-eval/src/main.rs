use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use convey_core::catalog::SourceCatalog;
use convey_core::config::ConveyConfig;
use convey_eval::approval::ApprovalChannel;
use convey_eval::db::init_eval_db;
use convey_eval::run_weekly_evaluation;
use convey_queue::{HttpNotifier, HttpObjectStore};
use convey_store::Store;

/// Weekly outcome-vs-prediction evaluation plus the recommendation review
/// surface. The default invocation runs one evaluation and exits.
#[derive(Parser)]
#[command(name = "convey-eval")]
struct Cli {
    /// Path to convey.toml (falls back to CONVEY_CONFIG, then the default).
    #[arg(long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Approve a pending recommendation (mutates the config artifact;
    /// does NOT signal the service).
    Approve {
        rec_id: String,
        #[arg(long, default_value = "dashboard_user")]
        approver: String,
    },
    /// Reject a pending recommendation.
    Reject {
        rec_id: String,
        #[arg(long, default_value = "dashboard_user")]
        rejected_by: String,
        #[arg(long, default_value = "")]
        reason: String,
    },
    /// Signal the remote service to reload configs from the object store.
    Apply {
        #[arg(long, default_value = "dashboard_user")]
        triggered_by: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "convey_eval=info,convey_store=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = ConveyConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        ConveyConfig::default()
    });

    let store = Store::open(&config.database.path, &config.source.path)
        .map_err(|e| anyhow::anyhow!("cannot open databases: {e}"))?;
    store.with_conn(init_eval_db)?;

    match cli.command {
        None => {
            let catalog = SourceCatalog::default();
            let summary = run_weekly_evaluation(&store, &catalog, &config.eval)?;
            info!(
                churned = summary.metrics.total_churned,
                with_score = summary.metrics.with_score,
                recall = format!("{:.1}%", summary.metrics.recall_medium * 100.0),
                coverage = format!("{:.1}%", summary.metrics.coverage * 100.0),
                recommendations = summary.recommendations.len(),
                "evaluation summary"
            );
            for rec_type in &summary.recommendations {
                info!(rec_type = %rec_type, "pending recommendation");
            }
        }
        Some(command) => {
            let objects = Arc::new(HttpObjectStore::new(
                config.object_store.base_url.clone(),
                config.object_store.bucket.clone(),
                Some(config.object_store.auth_token.clone()),
            ));
            let notifier = Arc::new(HttpNotifier::new(
                config.notify.channel_url.clone(),
                Some(config.notify.auth_token.clone()),
            ));
            let channel = ApprovalChannel::new(store, objects, notifier);

            match command {
                Command::Approve { rec_id, approver } => {
                    let rec_type = channel.approve(&rec_id, &approver).await?;
                    info!(rec_id = %rec_id, rec_type = %rec_type, "approved - use apply when ready to reload");
                }
                Command::Reject {
                    rec_id,
                    rejected_by,
                    reason,
                } => {
                    channel.reject(&rec_id, &rejected_by, &reason)?;
                    info!(rec_id = %rec_id, "rejected");
                }
                Command::Apply { triggered_by } => {
                    channel.apply_to_service(&triggered_by).await?;
                    info!("reload signal sent to analytics service");
                }
            }
        }
    }

    Ok(())
}
