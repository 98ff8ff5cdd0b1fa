use chrono::Utc;
use rusqlite::Connection;
use uuid::Uuid;

use convey_store::Store;

use crate::error::Result;
use crate::types::AlertConfig;

/// Initialise the alert tables. Safe to call on every startup (idempotent).
pub fn init_alert_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS alert_configuration (
            id               TEXT PRIMARY KEY,
            name             TEXT NOT NULL,
            metric_source    TEXT NOT NULL,
            metric_name      TEXT NOT NULL,
            operator         TEXT NOT NULL,
            threshold        REAL NOT NULL,
            window_hours     INTEGER NOT NULL,
            filter_product   TEXT,
            filter_sentiment TEXT,
            severity         TEXT NOT NULL,
            enabled          INTEGER NOT NULL DEFAULT 1,
            created_at       TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS alert_history (
            id                    TEXT PRIMARY KEY,
            config_id             TEXT NOT NULL,
            triggered_at          TEXT NOT NULL,
            metric_value          REAL NOT NULL,
            threshold             REAL NOT NULL,
            severity              TEXT NOT NULL,
            status                TEXT NOT NULL DEFAULT 'ACTIVE',
            affected_count        INTEGER NOT NULL DEFAULT 0,
            affected_subscribers  TEXT,
            acknowledged_by       TEXT,
            acknowledged_at       TEXT,
            resolved_by           TEXT,
            resolved_at           TEXT,
            resolution_notes      TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_alert_history_config
            ON alert_history(config_id, status);",
    )
}

/// All enabled configurations in creation order.
pub fn enabled_configs(store: &Store) -> Result<Vec<AlertConfig>> {
    let configs = store.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, name, metric_source, metric_name, operator, threshold,
                    window_hours, filter_product, filter_sentiment, severity, enabled
             FROM alert_configuration
             WHERE enabled = 1
             ORDER BY created_at",
        )?;
        let rows: Vec<AlertConfig> = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, f64>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, String>(9)?,
                    row.get::<_, i64>(10)?,
                ))
            })?
            .filter_map(|r| {
                let (
                    id,
                    name,
                    metric_source,
                    metric_name,
                    operator,
                    threshold,
                    window_hours,
                    filter_product,
                    filter_sentiment,
                    severity,
                    enabled,
                ) = r.ok()?;
                Some(AlertConfig {
                    id,
                    name,
                    metric_source,
                    metric_name,
                    operator: operator.parse().ok()?,
                    threshold,
                    window_hours,
                    filter_product,
                    filter_sentiment,
                    severity: severity.parse().ok()?,
                    enabled: enabled != 0,
                })
            })
            .collect();
        Ok(rows)
    })?;
    Ok(configs)
}

/// Insert a configuration (ops seeding and tests). Returns the generated id.
pub fn insert_config(store: &Store, config: &AlertConfig) -> Result<String> {
    let id = if config.id.is_empty() {
        Uuid::new_v4().to_string()
    } else {
        config.id.clone()
    };
    let now = Utc::now().to_rfc3339();
    store.with_conn(|conn| {
        conn.execute(
            "INSERT INTO alert_configuration
             (id, name, metric_source, metric_name, operator, threshold,
              window_hours, filter_product, filter_sentiment, severity, enabled, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            rusqlite::params![
                id,
                config.name,
                config.metric_source,
                config.metric_name,
                config.operator.to_string(),
                config.threshold,
                config.window_hours,
                config.filter_product,
                config.filter_sentiment,
                config.severity.to_string(),
                config.enabled as i64,
                now,
            ],
        )?;
        Ok(())
    })?;
    Ok(id)
}
