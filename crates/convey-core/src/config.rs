use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

// Loop tuning constants shared by the engines
pub const TRANSIENT_RETRY_SECS: u64 = 30; // pause after DB/queue connectivity loss
pub const INBOUND_WAIT_SECS: u64 = 5; // long-poll ceiling per receive
pub const INBOUND_BATCH_MAX: usize = 10; // messages per receive
pub const SUMMARY_MAX_BYTES: usize = 4000; // destination summary column width
pub const ACTION_ITEMS_MAX_CHARS: usize = 500;
pub const PERMANENT_FAILURE_CYCLES: i64 = 5; // send failures before giving up on an id

/// Top-level config (convey.toml + CONVEY_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConveyConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub source: SourceDbConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub object_store: ObjectStoreConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub cdc: CdcConfig,
    #[serde(default)]
    pub backfill: BackfillConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub eval: EvalConfig,
}

impl Default for ConveyConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            source: SourceDbConfig::default(),
            queue: QueueConfig::default(),
            object_store: ObjectStoreConfig::default(),
            notify: NotifyConfig::default(),
            cdc: CdcConfig::default(),
            backfill: BackfillConfig::default(),
            alerts: AlertsConfig::default(),
            eval: EvalConfig::default(),
        }
    }
}

/// Destination database (bridge-owned state + analytics tables).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Source database (transcription/chat tables). Attached read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDbConfig {
    #[serde(default = "default_source_path")]
    pub path: String,
}

impl Default for SourceDbConfig {
    fn default() -> Self {
        Self {
            path: default_source_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_base")]
    pub base_url: String,
    /// Queue receiving assembled conversations (consumed by the analytics service).
    #[serde(default = "default_outbound_queue")]
    pub outbound: String,
    /// Queue delivering analytics results back to this bridge.
    #[serde(default = "default_inbound_queue")]
    pub inbound: String,
    /// Bearer token; empty string disables the Authorization header.
    #[serde(default)]
    pub auth_token: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            base_url: default_queue_base(),
            outbound: default_outbound_queue(),
            inbound: default_inbound_queue(),
            auth_token: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    #[serde(default = "default_store_base")]
    pub base_url: String,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default)]
    pub auth_token: String,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            base_url: default_store_base(),
            bucket: default_bucket(),
            auth_token: String::new(),
        }
    }
}

/// Remote-config reload notification channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default = "default_notify_url")]
    pub channel_url: String,
    #[serde(default)]
    pub auth_token: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            channel_url: default_notify_url(),
            auth_token: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdcConfig {
    /// Seconds between cycles.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Candidate cap per source per cycle.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Recency window for the normal-mode collector.
    #[serde(default = "default_normal_window")]
    pub normal_window_hours: i64,
    /// Batch cap for the historical-mode pass.
    #[serde(default = "default_historical_batch")]
    pub historical_batch_size: u32,
    /// Initial enabled flag for the HISTORICAL status row. The row keeps its
    /// own state afterwards; operators flip it there.
    #[serde(default)]
    pub historical_enabled: bool,
    /// Emit a statistics block every N cycles.
    #[serde(default = "default_stats_every")]
    pub stats_every_cycles: u64,
}

impl Default for CdcConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
            normal_window_hours: default_normal_window(),
            historical_batch_size: default_historical_batch(),
            historical_enabled: false,
            stats_every_cycles: default_stats_every(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillConfig {
    #[serde(default = "default_days_back")]
    pub days_back: i64,
    #[serde(default = "default_bulk_batch")]
    pub bulk_batch_size: u32,
    #[serde(default = "default_delta_batch")]
    pub delta_batch_size: u32,
    /// Recency window for the delta (catch-up) phase.
    #[serde(default = "default_delta_window")]
    pub delta_window_hours: i64,
    /// Pause between batches, milliseconds.
    #[serde(default = "default_batch_pause")]
    pub batch_pause_ms: u64,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            days_back: default_days_back(),
            bulk_batch_size: default_bulk_batch(),
            delta_batch_size: default_delta_batch(),
            delta_window_hours: default_delta_window(),
            batch_pause_ms: default_batch_pause(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    /// Evaluation summary written after each pass (operator monitoring).
    #[serde(default = "default_alert_status_file")]
    pub status_file: String,
    /// Cap on the affected-subscriber snapshot stored per alert.
    #[serde(default = "default_affected_cap")]
    pub affected_subscribers_cap: u32,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            status_file: default_alert_status_file(),
            affected_subscribers_cap: default_affected_cap(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalConfig {
    /// Outcome lookback for churned subscribers.
    #[serde(default = "default_eval_days")]
    pub outcome_days: i64,
    #[serde(default = "default_high_threshold")]
    pub high_risk_threshold: i64,
    #[serde(default = "default_medium_threshold")]
    pub medium_risk_threshold: i64,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            outcome_days: default_eval_days(),
            high_risk_threshold: default_high_threshold(),
            medium_risk_threshold: default_medium_threshold(),
        }
    }
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.convey/convey.db", home)
}
fn default_source_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.convey/source.db", home)
}
fn default_queue_base() -> String {
    "http://localhost:9324".to_string()
}
fn default_outbound_queue() -> String {
    "conversation-assembly".to_string()
}
fn default_inbound_queue() -> String {
    "ml-results".to_string()
}
fn default_store_base() -> String {
    "http://localhost:9000".to_string()
}
fn default_bucket() -> String {
    "ml-configs".to_string()
}
fn default_notify_url() -> String {
    "http://localhost:9324/queues/ml-config-updates".to_string()
}
fn default_poll_interval() -> u64 {
    60
}
fn default_batch_size() -> u32 {
    50
}
fn default_normal_window() -> i64 {
    8
}
fn default_historical_batch() -> u32 {
    200
}
fn default_stats_every() -> u64 {
    10
}
fn default_days_back() -> i64 {
    90
}
fn default_bulk_batch() -> u32 {
    1000
}
fn default_delta_batch() -> u32 {
    50
}
fn default_delta_window() -> i64 {
    8
}
fn default_batch_pause() -> u64 {
    500
}
fn default_alert_status_file() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.convey/alert_evaluation_status.json", home)
}
fn default_affected_cap() -> u32 {
    100
}
fn default_eval_days() -> i64 {
    30
}
fn default_high_threshold() -> i64 {
    70
}
fn default_medium_threshold() -> i64 {
    40
}

impl ConveyConfig {
    /// Load config from a TOML file with CONVEY_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. CONVEY_CONFIG env var
    ///   3. ~/.convey/convey.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("CONVEY_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        let config: ConveyConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CONVEY_").split("_"))
            .extract()
            .map_err(|e| crate::error::ConveyError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.convey/convey.toml", home)
}
