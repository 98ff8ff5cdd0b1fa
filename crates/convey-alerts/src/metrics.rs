use chrono::{Duration as ChronoDuration, Utc};
use rusqlite::Connection;

use convey_store::Store;

use crate::error::{AlertError, Result};
use crate::types::{AffectedSubscriber, AlertConfig};

/// Evaluate one metric over its window. Count-shaped metrics also return the
/// top affected subscribers (capped) for the alert snapshot.
pub fn evaluate_metric(
    store: &Store,
    config: &AlertConfig,
    affected_cap: u32,
) -> Result<(f64, Vec<AffectedSubscriber>)> {
    let since = (Utc::now() - ChronoDuration::hours(config.window_hours)).to_rfc3339();

    match (config.metric_source.as_str(), config.metric_name.as_str()) {
        ("churn", "high_risk_count") => {
            count_with_affected(store, config, &since, "churn_score >= 70", "churn_score", affected_cap)
        }
        ("churn", "critical_risk_count") => {
            count_with_affected(store, config, &since, "churn_score >= 90", "churn_score", affected_cap)
        }
        ("churn", "avg_churn_score") => scalar(
            store,
            config,
            &since,
            "AVG(churn_score)",
            "churn_score IS NOT NULL",
        ),
        ("sentiment", "negative_count") => {
            count_with_affected(store, config, &since, "sentiment <= 2", "sentiment", affected_cap)
        }
        ("sentiment", "negative_percent") => percent(store, config, &since, "sentiment <= 2"),
        ("sentiment", "positive_percent") => percent(store, config, &since, "sentiment >= 4"),
        ("satisfaction", "avg_satisfaction") => scalar(
            store,
            config,
            &since,
            "AVG(customer_satisfaction)",
            "customer_satisfaction IS NOT NULL",
        ),
        ("satisfaction", "low_satisfaction_count") => count_with_affected(
            store,
            config,
            &since,
            "customer_satisfaction < 3",
            "customer_satisfaction",
            affected_cap,
        ),
        ("ml_quality", "pending_count") => pending_recommendations(store),
        ("operational", "call_volume") => scalar(store, config, &since, "COUNT(*)", "1 = 1"),
        ("operational", "error_count") => error_count(store, &since),
        (source, name) => Err(AlertError::UnknownMetric {
            metric_source: source.to_string(),
            name: name.to_string(),
        }),
    }
}

fn product_filter(config: &AlertConfig) -> (String, Vec<String>) {
    match &config.filter_product {
        Some(product) => (
            " AND subscriber_no IN (
                 SELECT subscriber_no FROM src.subscriber WHERE product_code = ?2)"
                .to_string(),
            vec![product.clone()],
        ),
        None => (String::new(), Vec::new()),
    }
}

fn query_scalar(
    conn: &Connection,
    sql: &str,
    params: &[&str],
) -> rusqlite::Result<f64> {
    let value: Option<f64> = conn.query_row(
        sql,
        rusqlite::params_from_iter(params.iter()),
        |row| row.get(0),
    )?;
    Ok(value.unwrap_or(0.0))
}

fn scalar(
    store: &Store,
    config: &AlertConfig,
    since: &str,
    aggregate: &str,
    predicate: &str,
) -> Result<(f64, Vec<AffectedSubscriber>)> {
    let (filter_sql, filter_params) = product_filter(config);
    let sql = format!(
        "SELECT {aggregate} FROM conversation_summary
         WHERE {predicate} AND conversation_time > ?1{filter_sql}"
    );
    let value = store.with_conn(|conn| {
        let mut params = vec![since];
        params.extend(filter_params.iter().map(String::as_str));
        query_scalar(conn, &sql, &params)
    })?;
    Ok((value, Vec::new()))
}

fn percent(
    store: &Store,
    config: &AlertConfig,
    since: &str,
    predicate: &str,
) -> Result<(f64, Vec<AffectedSubscriber>)> {
    let (filter_sql, filter_params) = product_filter(config);
    let sql = format!(
        "SELECT ROUND(
             COUNT(CASE WHEN {predicate} THEN 1 END) * 100.0 / NULLIF(COUNT(*), 0), 1)
         FROM conversation_summary
         WHERE conversation_time > ?1{filter_sql}"
    );
    let value = store.with_conn(|conn| {
        let mut params = vec![since];
        params.extend(filter_params.iter().map(String::as_str));
        query_scalar(conn, &sql, &params)
    })?;
    Ok((value, Vec::new()))
}

/// COUNT plus the per-subscriber snapshot, worst offenders first.
fn count_with_affected(
    store: &Store,
    config: &AlertConfig,
    since: &str,
    predicate: &str,
    value_column: &str,
    cap: u32,
) -> Result<(f64, Vec<AffectedSubscriber>)> {
    let (filter_sql, filter_params) = product_filter(config);

    let count_sql = format!(
        "SELECT COUNT(*) FROM conversation_summary
         WHERE {predicate} AND conversation_time > ?1{filter_sql}"
    );
    let value = store.with_conn(|conn| {
        let mut params = vec![since];
        params.extend(filter_params.iter().map(String::as_str));
        query_scalar(conn, &count_sql, &params)
    })?;

    // Low-satisfaction alerts surface the unhappiest first; everything else
    // surfaces the highest metric first.
    let order = if value_column == "customer_satisfaction" {
        "ASC"
    } else {
        "DESC"
    };
    let subs_sql = format!(
        "SELECT subscriber_no, ban, CAST({value_column} AS REAL), conversation_time
         FROM conversation_summary
         WHERE {predicate} AND conversation_time > ?1{filter_sql}
         ORDER BY {value_column} {order}
         LIMIT {cap}"
    );
    let affected = store.with_conn(|conn| {
        let mut params = vec![since];
        params.extend(filter_params.iter().map(String::as_str));
        let mut stmt = conn.prepare(&subs_sql)?;
        let rows: Vec<AffectedSubscriber> = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), |row| {
                Ok(AffectedSubscriber {
                    subscriber_no: row.get(0)?,
                    ban: row.get(1)?,
                    value: row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                    conversation_time: row.get(3)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    })?;

    Ok((value, affected))
}

/// Pending recommendations live in the evaluation schema, which may not have
/// been created yet on a fresh deployment; report zero rather than fail.
fn pending_recommendations(store: &Store) -> Result<(f64, Vec<AffectedSubscriber>)> {
    let value = store.with_conn(|conn| {
        let exists: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master
             WHERE type = 'table' AND name = 'ml_recommendation'",
            [],
            |row| row.get(0),
        )?;
        if exists == 0 {
            return Ok(0.0);
        }
        query_scalar(
            conn,
            "SELECT COUNT(*) FROM ml_recommendation WHERE status = 'PENDING'",
            &[],
        )
    })?;
    Ok((value, Vec::new()))
}

fn error_count(store: &Store, since: &str) -> Result<(f64, Vec<AffectedSubscriber>)> {
    let value = store.with_conn(|conn| {
        query_scalar(
            conn,
            "SELECT COUNT(*) FROM cdc_error_log WHERE created_at > ?1",
            &[since],
        )
    })?;
    Ok((value, Vec::new()))
}
