use crate::error::Result;
use crate::store::Store;

/// Mode key of the historical catch-up walker.
pub const MODE_HISTORICAL: &str = "HISTORICAL";

/// One named mode row (`NORMAL_<source>`, `HISTORICAL`).
#[derive(Debug, Clone, PartialEq)]
pub struct ModeStatus {
    pub mode_key: String,
    pub last_processed_at: Option<String>,
    pub total_processed: i64,
    pub enabled: bool,
}

impl Store {
    /// Make sure a status row exists. Existing rows keep their state.
    pub fn ensure_mode(&self, mode_key: &str, enabled: bool) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO cdc_status
                 (mode_key, last_processed_at, total_processed, enabled)
                 VALUES (?1, NULL, 0, ?2)",
                rusqlite::params![mode_key, enabled as i64],
            )?;
            Ok(())
        })
    }

    pub fn mode_status(&self, mode_key: &str) -> Result<Option<ModeStatus>> {
        self.with_conn(|conn| {
            match conn.query_row(
                "SELECT mode_key, last_processed_at, total_processed, enabled
                 FROM cdc_status WHERE mode_key = ?1",
                [mode_key],
                |row| {
                    Ok(ModeStatus {
                        mode_key: row.get(0)?,
                        last_processed_at: row.get(1)?,
                        total_processed: row.get(2)?,
                        enabled: row.get::<_, i64>(3)? != 0,
                    })
                },
            ) {
                Ok(s) => Ok(Some(s)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
    }

    /// Advance a mode's watermark and processed counter. The watermark only
    /// moves forward; a batch that sorts earlier than the stored value (clock
    /// skew, re-scan) leaves it untouched.
    pub fn advance_mode(
        &self,
        mode_key: &str,
        last_processed_at: Option<&str>,
        processed_delta: i64,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE cdc_status
                 SET last_processed_at = CASE
                        WHEN ?2 IS NULL THEN last_processed_at
                        WHEN last_processed_at IS NULL OR last_processed_at < ?2 THEN ?2
                        ELSE last_processed_at
                     END,
                     total_processed = total_processed + ?3
                 WHERE mode_key = ?1",
                rusqlite::params![mode_key, last_processed_at, processed_delta],
            )?;
            Ok(())
        })
    }

    pub fn set_mode_enabled(&self, mode_key: &str, enabled: bool) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE cdc_status SET enabled = ?2 WHERE mode_key = ?1",
                rusqlite::params![mode_key, enabled as i64],
            )?;
            Ok(())
        })
    }

    /// Starting watermark for the historical walker: the stored value, or
    /// `fallback` when the row has never advanced.
    pub fn historical_watermark(&self, fallback: &str) -> Result<String> {
        Ok(self
            .mode_status(MODE_HISTORICAL)?
            .and_then(|s| s.last_processed_at)
            .unwrap_or_else(|| fallback.to_string()))
    }
}
