use chrono::Utc;
use tracing::debug;

use convey_protocol::NormalizedResult;

use crate::error::Result;
use crate::source::SourceHeader;
use crate::store::Store;

impl Store {
    /// Persist a normalized result into the three destination tables.
    ///
    /// Each destination is one local transaction using delete-then-insert, so
    /// re-delivery of the same result converges to identical state. There is
    /// no transaction across destinations (or across the queue).
    pub fn write_result(
        &self,
        destination_type: &str,
        result: &NormalizedResult,
        header: Option<&SourceHeader>,
    ) -> Result<()> {
        // Delete-by-id then insert sidesteps primary-key update hazards and
        // keeps the write idempotent.
        if destination_type == "CALL" {
            self.write_dicta(result)?;
        }
        self.write_summary(destination_type, result, header)?;
        self.write_categories(destination_type, result)?;
        debug!(source_id = %result.call_id, destination_type, "result persisted");
        Ok(())
    }

    fn write_dicta(&self, result: &NormalizedResult) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "DELETE FROM dicta_call_summary WHERE source_id = ?1",
                [&result.call_id],
            )?;
            tx.execute(
                "INSERT INTO dicta_call_summary
                 (source_id, summary, sentiment, classification, confidence,
                  processing_ms, model_version, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    result.call_id,
                    result.summary,
                    result.sentiment,
                    result.classification_primary,
                    result.confidence,
                    result.processing_ms,
                    result.model_version,
                    now,
                ],
            )?;
            tx.commit()
        })?;
        Ok(())
    }

    fn write_summary(
        &self,
        destination_type: &str,
        result: &NormalizedResult,
        header: Option<&SourceHeader>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let classifications = result.classifications.join(", ");
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "DELETE FROM conversation_summary
                 WHERE destination_type = ?1 AND source_id = ?2",
                rusqlite::params![destination_type, result.call_id],
            )?;
            tx.execute(
                "INSERT INTO conversation_summary
                 (destination_type, source_id, ban, subscriber_no, conversation_time,
                  summary, sentiment, classification_primary, classifications,
                  confidence, processing_ms, model_version, customer_satisfaction,
                  products, action_items, unresolved_issues, churn_score, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                         ?14, ?15, ?16, ?17, ?18)",
                rusqlite::params![
                    destination_type,
                    result.call_id,
                    header.and_then(|h| h.ban.as_deref()),
                    header.and_then(|h| h.subscriber_no.as_deref()),
                    header.and_then(|h| h.conversation_time.as_deref()),
                    result.summary,
                    result.sentiment,
                    result.classification_primary,
                    classifications,
                    result.confidence,
                    result.processing_ms,
                    result.model_version,
                    result.satisfaction,
                    result.products,
                    result.action_items,
                    result.unresolved_issues,
                    result.churn_score,
                    now,
                ],
            )?;
            tx.commit()
        })?;
        Ok(())
    }

    fn write_categories(&self, destination_type: &str, result: &NormalizedResult) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "DELETE FROM conversation_category
                 WHERE destination_type = ?1 AND source_id = ?2",
                rusqlite::params![destination_type, result.call_id],
            )?;
            for category in &result.classifications {
                tx.execute(
                    "INSERT OR IGNORE INTO conversation_category
                     (destination_type, source_id, category, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![destination_type, result.call_id, category, now],
                )?;
            }
            tx.commit()
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convey_protocol::result::AnalyticsResult;

    fn normalized(body: &str) -> NormalizedResult {
        let raw = AnalyticsResult::from_json(body).unwrap();
        NormalizedResult::from_raw(raw.call_id.clone().unwrap(), &raw)
    }

    fn sample() -> NormalizedResult {
        normalized(
            r#"{"type":"ML_RESULT","callId":"CALL001","sentiment":"positive",
                "classification":{"primary":"BILLING","all":["BILLING","OFFER"]},
                "churn_confidence":0.82,"customer_satisfaction":4,
                "summary":{"text":"customer asked about an invoice"}}"#,
        )
    }

    #[test]
    fn ingest_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let header = SourceHeader {
            ban: Some("880011".to_string()),
            subscriber_no: Some("0541112222".to_string()),
            conversation_time: Some("2025-10-01T09:00:00+00:00".to_string()),
        };

        // Delivered twice: state must converge to a single identical row set.
        store.write_result("CALL", &sample(), Some(&header)).unwrap();
        store.write_result("CALL", &sample(), Some(&header)).unwrap();

        let (sentiment, classification, churn): (i64, String, i64) = store
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT sentiment, classification_primary, churn_score
                     FROM conversation_summary
                     WHERE destination_type = 'CALL' AND source_id = 'CALL001'",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
            })
            .unwrap();
        assert_eq!(sentiment, 4);
        assert_eq!(classification, "BILLING");
        assert_eq!(churn, 82);

        let summary_rows: i64 = store
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM conversation_summary", [], |r| {
                    r.get(0)
                })
            })
            .unwrap();
        assert_eq!(summary_rows, 1);

        let categories: i64 = store
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM conversation_category
                     WHERE destination_type = 'CALL' AND source_id = 'CALL001'",
                    [],
                    |r| r.get(0),
                )
            })
            .unwrap();
        assert_eq!(categories, 2, "exactly BILLING and OFFER, both times");

        let dicta_rows: i64 = store
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM dicta_call_summary", [], |r| r.get(0))
            })
            .unwrap();
        assert_eq!(dicta_rows, 1);
    }

    #[test]
    fn non_call_results_skip_dicta() {
        let store = Store::open_in_memory().unwrap();
        let mut result = sample();
        result.call_id = "CASE42".to_string();

        store.write_result("WAPP", &result, None).unwrap();

        let dicta_rows: i64 = store
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM dicta_call_summary", [], |r| r.get(0))
            })
            .unwrap();
        assert_eq!(dicta_rows, 0);

        let summary_rows: i64 = store
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM conversation_summary WHERE destination_type = 'WAPP'",
                    [],
                    |r| r.get(0),
                )
            })
            .unwrap();
        assert_eq!(summary_rows, 1);
    }
}
