use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Tables the pipeline cannot run without. Checked at startup; a missing
/// table after `init_db` is a fatal condition.
pub const REQUIRED_TABLES: [&str; 7] = [
    "cdc_processed_ids",
    "cdc_status",
    "cdc_error_log",
    "cdc_permanent_failures",
    "dicta_call_summary",
    "conversation_summary",
    "conversation_category",
];

/// Initialise the bridge-owned destination schema. Safe to call on every
/// startup (idempotent).
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    create_state_tables(conn)?;
    create_destination_tables(conn)?;
    Ok(())
}

fn create_state_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS cdc_processed_ids (
            source_id     TEXT PRIMARY KEY,
            fragment_time TEXT,
            dispatched_at TEXT NOT NULL,
            receipt       TEXT,
            skip_reason   TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_processed_time
            ON cdc_processed_ids(fragment_time);

        CREATE TABLE IF NOT EXISTS cdc_status (
            mode_key          TEXT PRIMARY KEY,
            last_processed_at TEXT,
            total_processed   INTEGER NOT NULL DEFAULT 0,
            enabled           INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS cdc_error_log (
            id          TEXT PRIMARY KEY,
            source_id   TEXT NOT NULL,
            kind        TEXT NOT NULL,
            message     TEXT NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 1,
            created_at  TEXT NOT NULL,
            UNIQUE(source_id, kind)
        );

        CREATE TABLE IF NOT EXISTS cdc_permanent_failures (
            source_id     TEXT PRIMARY KEY,
            kind          TEXT NOT NULL,
            message       TEXT NOT NULL,
            failed_cycles INTEGER NOT NULL,
            recorded_at   TEXT NOT NULL
        );",
    )
}

fn create_destination_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS dicta_call_summary (
            source_id      TEXT PRIMARY KEY,
            summary        TEXT,
            sentiment      INTEGER,
            classification TEXT,
            confidence     REAL,
            processing_ms  INTEGER,
            model_version  TEXT,
            created_at     TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS conversation_summary (
            destination_type       TEXT NOT NULL,
            source_id              TEXT NOT NULL,
            ban                    TEXT,
            subscriber_no          TEXT,
            conversation_time      TEXT,
            summary                TEXT,
            sentiment              INTEGER,
            classification_primary TEXT,
            classifications        TEXT,
            confidence             REAL,
            processing_ms          INTEGER,
            model_version          TEXT,
            customer_satisfaction  INTEGER,
            products               TEXT,
            action_items           TEXT,
            unresolved_issues      TEXT,
            churn_score            INTEGER,
            created_at             TEXT NOT NULL,
            PRIMARY KEY (destination_type, source_id)
        );
        CREATE INDEX IF NOT EXISTS idx_summary_time
            ON conversation_summary(conversation_time);
        CREATE INDEX IF NOT EXISTS idx_summary_subscriber
            ON conversation_summary(subscriber_no);

        CREATE TABLE IF NOT EXISTS conversation_category (
            destination_type TEXT NOT NULL,
            source_id        TEXT NOT NULL,
            category         TEXT NOT NULL,
            created_at       TEXT NOT NULL,
            PRIMARY KEY (destination_type, source_id, category)
        );",
    )
}

/// Verify every required table exists. Returns `MissingTable` for the first
/// absent one so startup can fail with a precise message.
pub fn validate_tables(conn: &Connection) -> Result<()> {
    for table in REQUIRED_TABLES {
        let found: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )?;
        if found == 0 {
            return Err(StoreError::MissingTable {
                table: table.to_string(),
            });
        }
    }
    Ok(())
}
