use chrono::Utc;
use tracing::debug;

use crate::error::Result;
use crate::store::Store;

/// Skip reasons recorded when an id is marked without a dispatch.
pub const SKIP_SHORT: &str = "short";
pub const SKIP_MISSING_CHANNELS: &str = "missing-channels";
pub const SKIP_EMPTY: &str = "empty";
pub const SKIP_PERMANENT_FAILURE: &str = "permanent-failure";

impl Store {
    /// Whether a source id has already been dispatched (or skipped).
    pub fn is_processed(&self, source_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM cdc_processed_ids WHERE source_id = ?1",
                [source_id],
                |row| row.get(0),
            )?;
            Ok(n > 0)
        })
    }

    /// Record a dispatched id. Idempotent: re-marking an id is a no-op, so a
    /// crash between send and mark resolves to at-least-once delivery.
    pub fn mark_processed(
        &self,
        source_id: &str,
        fragment_time: Option<&str>,
        receipt: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO cdc_processed_ids
                 (source_id, fragment_time, dispatched_at, receipt, skip_reason)
                 VALUES (?1, ?2, ?3, ?4, NULL)",
                rusqlite::params![source_id, fragment_time, now, receipt],
            )?;
            Ok(())
        })?;
        debug!(source_id = %source_id, "marked processed");
        Ok(())
    }

    /// Record an id that was consumed without a dispatch (backfill skips,
    /// permanent failures). Idempotent like `mark_processed`.
    pub fn mark_skipped(
        &self,
        source_id: &str,
        fragment_time: Option<&str>,
        reason: &str,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO cdc_processed_ids
                 (source_id, fragment_time, dispatched_at, receipt, skip_reason)
                 VALUES (?1, ?2, ?3, NULL, ?4)",
                rusqlite::params![source_id, fragment_time, now, reason],
            )?;
            Ok(())
        })?;
        debug!(source_id = %source_id, reason = %reason, "marked skipped");
        Ok(())
    }

    /// Total processed rows, for the end-of-run summaries.
    pub fn processed_count(&self) -> Result<i64> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM cdc_processed_ids", [], |row| {
                row.get(0)
            })
        })
    }
}
