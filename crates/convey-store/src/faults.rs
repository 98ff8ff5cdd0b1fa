use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::store::Store;

/// Error-log kinds written by the pipeline.
pub const KIND_SEND_FAILED: &str = "SQS_SEND_FAILED";
pub const KIND_ASSEMBLY_REJECTED: &str = "ASSEMBLY_REJECTED";
pub const KIND_RESULT_PARSE: &str = "RESULT_PARSE_ERROR";
pub const KIND_PERSISTENCE: &str = "PERSISTENCE_ERROR";

impl Store {
    /// Append (or bump) an error-log row for `(source_id, kind)`.
    ///
    /// Returns the retry count after the write, so callers can promote
    /// repeat offenders to the permanent-failures table.
    pub fn log_error(&self, source_id: &str, kind: &str, message: &str) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let id = Uuid::new_v4().to_string();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO cdc_error_log (id, source_id, kind, message, retry_count, created_at)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5)
                 ON CONFLICT(source_id, kind) DO UPDATE SET
                    retry_count = retry_count + 1,
                    message = excluded.message,
                    created_at = excluded.created_at",
                rusqlite::params![id, source_id, kind, message, now],
            )?;
            conn.query_row(
                "SELECT retry_count FROM cdc_error_log WHERE source_id = ?1 AND kind = ?2",
                rusqlite::params![source_id, kind],
                |row| row.get(0),
            )
        })
    }

    /// Record a source id the pipeline has given up on.
    pub fn record_permanent_failure(
        &self,
        source_id: &str,
        kind: &str,
        message: &str,
        failed_cycles: i64,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO cdc_permanent_failures
                 (source_id, kind, message, failed_cycles, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![source_id, kind, message, failed_cycles, now],
            )?;
            Ok(())
        })?;
        warn!(source_id = %source_id, kind = %kind, failed_cycles, "recorded permanent failure");
        Ok(())
    }

    pub fn error_count(&self) -> Result<i64> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM cdc_error_log", [], |row| row.get(0))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_errors_bump_retry_count() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(
            store
                .log_error("CALL009", KIND_SEND_FAILED, "queue said no")
                .unwrap(),
            1
        );
        assert_eq!(
            store
                .log_error("CALL009", KIND_SEND_FAILED, "queue said no again")
                .unwrap(),
            2
        );
        // a different kind gets its own counter
        assert_eq!(
            store
                .log_error("CALL009", KIND_PERSISTENCE, "disk full")
                .unwrap(),
            1
        );
        assert_eq!(store.error_count().unwrap(), 2);
    }
}
