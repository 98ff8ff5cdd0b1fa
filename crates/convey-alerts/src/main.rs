use clap::Parser;
use tracing::{error, info, warn};

use convey_core::config::ConveyConfig;
use convey_store::Store;

use convey_alerts::db;
use convey_alerts::evaluate_all;

/// Threshold alert evaluator. One pass per invocation; an external scheduler
/// (cron, every ~5 minutes) provides the cadence.
#[derive(Parser)]
#[command(name = "convey-alerts")]
struct Cli {
    /// Path to convey.toml (falls back to CONVEY_CONFIG, then the default).
    #[arg(long)]
    config: Option<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "convey_alerts=info,convey_store=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = ConveyConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        ConveyConfig::default()
    });

    let store = Store::open(&config.database.path, &config.source.path)
        .map_err(|e| anyhow::anyhow!("cannot open databases: {e}"))?;
    store.with_conn(db::init_alert_db)?;

    match evaluate_all(&store, config.alerts.affected_subscribers_cap) {
        Ok(outcomes) => {
            let triggered = outcomes.iter().filter(|o| o.triggered).count();
            let created = outcomes.iter().filter(|o| o.created_alert).count();
            info!(
                rules = outcomes.len(),
                triggered,
                created,
                "alert evaluation complete"
            );
            for outcome in outcomes.iter().filter(|o| o.triggered) {
                let state = if outcome.created_alert { "NEW" } else { "EXISTING" };
                info!(
                    alert = %outcome.name,
                    state,
                    value = outcome.metric_value,
                    threshold = outcome.threshold,
                    "triggered"
                );
            }
            write_status(
                &config.alerts.status_file,
                &serde_json::json!({
                    "last_run": chrono::Utc::now().to_rfc3339(),
                    "rules_evaluated": outcomes.len(),
                    "conditions_triggered": triggered,
                    "alerts_created": created,
                    "status": "success",
                }),
            );
            Ok(())
        }
        Err(e) => {
            error!(err = %e, "alert evaluation failed");
            write_status(
                &config.alerts.status_file,
                &serde_json::json!({
                    "last_run": chrono::Utc::now().to_rfc3339(),
                    "status": "error",
                    "error": e.to_string(),
                }),
            );
            Err(e.into())
        }
    }
}

/// Best-effort status drop for external monitoring; never fails the run.
fn write_status(path: &str, status: &serde_json::Value) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    match serde_json::to_string_pretty(status) {
        Ok(body) => {
            if let Err(e) = std::fs::write(path, body) {
                warn!(path = %path, err = %e, "could not write status file");
            }
        }
        Err(e) => warn!(err = %e, "could not serialize status"),
    }
}
