use chrono::{Duration as ChronoDuration, Utc};
use tracing::debug;

use convey_core::catalog::SourceEntry;
use convey_store::Store;

use crate::error::Result;
use crate::types::{ChurnedSubscriber, EvalMetrics};

/// Subscriber statuses that count as a churn outcome.
const CHURN_STATUSES: &str = "'CHURNED', 'PORTED', 'CANCELLED', 'DEACTIVATED'";

/// Find subscribers whose status flipped to a churn state within `days`,
/// joined with all their prior calls; the max predicted score across those
/// calls tells us whether the pipeline ever flagged them.
pub fn collect_churned(
    store: &Store,
    entry: &SourceEntry,
    days: i64,
) -> Result<Vec<ChurnedSubscriber>> {
    let since = (Utc::now() - ChronoDuration::days(days)).to_rfc3339();
    let sql = format!(
        "SELECT s.subscriber_no, s.status, s.status_date,
                MAX(cs.churn_score) AS max_score,
                COUNT(DISTINCT v.{id}) AS call_count
         FROM src.subscriber s
         JOIN src.{table} v ON v.{sub} = s.subscriber_no
         LEFT JOIN conversation_summary cs ON cs.source_id = v.{id}
         WHERE s.status IN ({statuses})
           AND s.status_date > ?1
           AND v.{time} < s.status_date
         GROUP BY s.subscriber_no, s.status, s.status_date",
        id = entry.id_column,
        table = entry.table,
        sub = entry.subscriber_column,
        time = entry.time_column,
        statuses = CHURN_STATUSES,
    );

    let rows = store.with_conn(|conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows: Vec<ChurnedSubscriber> = stmt
            .query_map([&since], |row| {
                Ok(ChurnedSubscriber {
                    subscriber_no: row.get(0)?,
                    status: row.get(1)?,
                    status_date: row.get(2)?,
                    max_churn_score: row.get(3)?,
                    call_count: row.get(4)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    })?;

    debug!(count = rows.len(), days, "collected churned subscribers");
    Ok(rows)
}

/// The subscriber's most recent call id, for missed-case transcript mining.
pub fn latest_call_id(
    store: &Store,
    entry: &SourceEntry,
    subscriber_no: &str,
) -> Result<Option<String>> {
    let sql = format!(
        "SELECT {id} FROM src.{table} WHERE {sub} = ?1
         ORDER BY {time} DESC LIMIT 1",
        id = entry.id_column,
        table = entry.table,
        sub = entry.subscriber_column,
        time = entry.time_column,
    );
    let result = store.with_conn(|conn| {
        match conn.query_row(&sql, [subscriber_no], |row| row.get::<_, String>(0)) {
            Ok(id) => Ok(Some(id)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    })?;
    Ok(result)
}

/// Pure recall/coverage math over the collected outcomes.
pub fn compute_metrics(
    churned: &[ChurnedSubscriber],
    high_threshold: i64,
    medium_threshold: i64,
) -> EvalMetrics {
    let total = churned.len();
    let scored: Vec<i64> = churned.iter().filter_map(|c| c.max_churn_score).collect();
    let with_score = scored.len();

    let high = scored.iter().filter(|&&s| s >= high_threshold).count();
    let medium = scored.iter().filter(|&&s| s >= medium_threshold).count();

    let (recall_high, recall_medium, avg) = if with_score > 0 {
        (
            high as f64 / with_score as f64,
            medium as f64 / with_score as f64,
            scored.iter().sum::<i64>() as f64 / with_score as f64,
        )
    } else {
        (0.0, 0.0, 0.0)
    };
    let coverage = if total > 0 {
        with_score as f64 / total as f64
    } else {
        0.0
    };

    EvalMetrics {
        total_churned: total,
        with_score,
        without_score: total - with_score,
        high_risk_caught: high,
        medium_plus_caught: medium,
        recall_high,
        recall_medium,
        coverage,
        avg_churn_score: avg,
    }
}

/// Churners the pipeline failed to flag: no score at all, or below medium.
pub fn missed_churners<'a>(
    churned: &'a [ChurnedSubscriber],
    medium_threshold: i64,
) -> Vec<&'a ChurnedSubscriber> {
    churned
        .iter()
        .filter(|c| c.max_churn_score.map_or(true, |s| s < medium_threshold))
        .collect()
}
