use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use convey_store::Store;

use crate::db::enabled_configs;
use crate::error::{AlertError, Result};
use crate::metrics::evaluate_metric;
use crate::types::{AffectedSubscriber, AlertConfig, AlertStatus};

/// Result of evaluating one configuration.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationOutcome {
    pub config_id: String,
    pub name: String,
    pub metric_value: f64,
    pub threshold: f64,
    pub triggered: bool,
    pub created_alert: bool,
    pub already_active: bool,
}

/// Evaluate every enabled configuration once.
///
/// A triggered rule with an existing ACTIVE row is left alone: one live
/// alert per configuration, no duplicates, no auto-resolve.
pub fn evaluate_all(store: &Store, affected_cap: u32) -> Result<Vec<EvaluationOutcome>> {
    let configs = enabled_configs(store)?;
    let mut outcomes = Vec::with_capacity(configs.len());

    for config in &configs {
        let (value, affected) = match evaluate_metric(store, config, affected_cap) {
            Ok(v) => v,
            Err(AlertError::UnknownMetric { metric_source, name }) => {
                warn!(config = %config.name, source = %metric_source, metric = %name, "skipping unknown metric");
                continue;
            }
            Err(e) => return Err(e),
        };

        let triggered = config.operator.compare(value, config.threshold);
        let mut outcome = EvaluationOutcome {
            config_id: config.id.clone(),
            name: config.name.clone(),
            metric_value: value,
            threshold: config.threshold,
            triggered,
            created_alert: false,
            already_active: false,
        };

        if triggered {
            if has_active_alert(store, &config.id)? {
                outcome.already_active = true;
            } else {
                create_alert(store, config, value, &affected)?;
                outcome.created_alert = true;
                info!(
                    config = %config.name,
                    value,
                    threshold = config.threshold,
                    affected = affected.len(),
                    "alert raised"
                );
            }
        }

        outcomes.push(outcome);
    }

    Ok(outcomes)
}

fn has_active_alert(store: &Store, config_id: &str) -> Result<bool> {
    let n: i64 = store.with_conn(|conn| {
        conn.query_row(
            "SELECT COUNT(*) FROM alert_history
             WHERE config_id = ?1 AND status = 'ACTIVE'",
            [config_id],
            |row| row.get(0),
        )
    })?;
    Ok(n > 0)
}

fn create_alert(
    store: &Store,
    config: &AlertConfig,
    value: f64,
    affected: &[AffectedSubscriber],
) -> Result<()> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    let blob = serde_json::to_string(affected)?;
    store.with_conn(|conn| {
        conn.execute(
            "INSERT INTO alert_history
             (id, config_id, triggered_at, metric_value, threshold, severity,
              status, affected_count, affected_subscribers)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'ACTIVE', ?7, ?8)",
            rusqlite::params![
                id,
                config.id,
                now,
                value,
                config.threshold,
                config.severity.to_string(),
                affected.len() as i64,
                blob,
            ],
        )?;
        Ok(())
    })?;
    Ok(())
}

/// ACTIVE → ACKNOWLEDGED. Any other starting state is rejected.
pub fn acknowledge(store: &Store, alert_id: &str, by: &str) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    let changed = store.with_conn(|conn| {
        conn.execute(
            "UPDATE alert_history
             SET status = 'ACKNOWLEDGED', acknowledged_by = ?2, acknowledged_at = ?3
             WHERE id = ?1 AND status = 'ACTIVE'",
            rusqlite::params![alert_id, by, now],
        )
    })?;
    if changed == 0 {
        return transition_error(store, alert_id, AlertStatus::Acknowledged);
    }
    Ok(())
}

/// ACTIVE|ACKNOWLEDGED → RESOLVED, with optional notes.
pub fn resolve(store: &Store, alert_id: &str, by: &str, notes: Option<&str>) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    let changed = store.with_conn(|conn| {
        conn.execute(
            "UPDATE alert_history
             SET status = 'RESOLVED', resolved_by = ?2, resolved_at = ?3,
                 resolution_notes = ?4
             WHERE id = ?1 AND status IN ('ACTIVE', 'ACKNOWLEDGED')",
            rusqlite::params![alert_id, by, now, notes],
        )
    })?;
    if changed == 0 {
        return transition_error(store, alert_id, AlertStatus::Resolved);
    }
    Ok(())
}

/// Distinguish "no such alert" from "illegal transition" for the caller.
fn transition_error(store: &Store, alert_id: &str, target: AlertStatus) -> Result<()> {
    let current: Option<String> = store.with_conn(|conn| {
        match conn.query_row(
            "SELECT status FROM alert_history WHERE id = ?1",
            [alert_id],
            |row| row.get(0),
        ) {
            Ok(s) => Ok(Some(s)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    })?;
    match current {
        None => Err(AlertError::NotFound {
            id: alert_id.to_string(),
        }),
        Some(status) => Err(AlertError::InvalidTransition {
            id: alert_id.to_string(),
            detail: format!("{status} -> {target}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_alert_db, insert_config};
    use crate::types::{Operator, Severity};

    fn seed_store() -> Store {
        let store = Store::open_in_memory().unwrap();
        store.with_conn(init_alert_db).unwrap();
        store
    }

    fn insert_summary(store: &Store, source_id: &str, churn: i64, hours_ago: i64) {
        let time = (Utc::now() - chrono::Duration::hours(hours_ago)).to_rfc3339();
        store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO conversation_summary
                     (destination_type, source_id, subscriber_no, ban, conversation_time,
                      sentiment, customer_satisfaction, churn_score, created_at)
                     VALUES ('CALL', ?1, ?2, '880011', ?3, 3, 3, ?4, ?3)",
                    rusqlite::params![source_id, format!("05400{source_id}"), time, churn],
                )
            })
            .unwrap();
    }

    fn high_risk_config() -> AlertConfig {
        AlertConfig {
            id: String::new(),
            name: "HighRisk".to_string(),
            metric_source: "churn".to_string(),
            metric_name: "high_risk_count".to_string(),
            operator: Operator::Gte,
            threshold: 10.0,
            window_hours: 24,
            filter_product: None,
            filter_sentiment: None,
            severity: Severity::Warning,
            enabled: true,
        }
    }

    #[test]
    fn trigger_creates_single_active_alert() {
        let store = seed_store();
        insert_config(&store, &high_risk_config()).unwrap();

        for i in 0..12 {
            insert_summary(&store, &format!("C{i}"), 75, 1);
        }

        let outcomes = evaluate_all(&store, 100).unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].triggered);
        assert!(outcomes[0].created_alert);
        assert_eq!(outcomes[0].metric_value, 12.0);

        // Re-running immediately must not add a second row.
        let outcomes = evaluate_all(&store, 100).unwrap();
        assert!(outcomes[0].triggered);
        assert!(!outcomes[0].created_alert);
        assert!(outcomes[0].already_active);

        let (rows, affected_count): (i64, i64) = store
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT COUNT(*), MAX(affected_count) FROM alert_history",
                    [],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
            })
            .unwrap();
        assert_eq!(rows, 1);
        assert_eq!(affected_count, 12);
    }

    #[test]
    fn below_threshold_does_not_trigger() {
        let store = seed_store();
        insert_config(&store, &high_risk_config()).unwrap();
        for i in 0..5 {
            insert_summary(&store, &format!("C{i}"), 75, 1);
        }

        let outcomes = evaluate_all(&store, 100).unwrap();
        assert!(!outcomes[0].triggered);

        let rows: i64 = store
            .with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM alert_history", [], |r| r.get(0)))
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[test]
    fn window_excludes_old_rows() {
        let store = seed_store();
        insert_config(&store, &high_risk_config()).unwrap();
        for i in 0..12 {
            insert_summary(&store, &format!("C{i}"), 75, 48); // outside 24h window
        }

        let outcomes = evaluate_all(&store, 100).unwrap();
        assert_eq!(outcomes[0].metric_value, 0.0);
        assert!(!outcomes[0].triggered);
    }

    #[test]
    fn affected_snapshot_capped_and_ordered() {
        let store = seed_store();
        insert_config(&store, &high_risk_config()).unwrap();
        for i in 0..20 {
            insert_summary(&store, &format!("C{i:02}"), 70 + i, 1);
        }

        evaluate_all(&store, 5).unwrap();

        let blob: String = store
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT affected_subscribers FROM alert_history",
                    [],
                    |r| r.get(0),
                )
            })
            .unwrap();
        let affected: Vec<AffectedSubscriber> = serde_json::from_str(&blob).unwrap();
        assert_eq!(affected.len(), 5);
        assert_eq!(affected[0].value, 89.0, "worst churn score first");
    }

    #[test]
    fn state_machine_transitions() {
        let store = seed_store();
        insert_config(&store, &high_risk_config()).unwrap();
        for i in 0..12 {
            insert_summary(&store, &format!("C{i}"), 75, 1);
        }
        evaluate_all(&store, 100).unwrap();

        let alert_id: String = store
            .with_conn(|conn| conn.query_row("SELECT id FROM alert_history", [], |r| r.get(0)))
            .unwrap();

        acknowledge(&store, &alert_id, "noc-operator").unwrap();
        // Double-acknowledge is an illegal transition.
        assert!(matches!(
            acknowledge(&store, &alert_id, "noc-operator"),
            Err(AlertError::InvalidTransition { .. })
        ));

        resolve(&store, &alert_id, "noc-operator", Some("false positive")).unwrap();
        assert!(matches!(
            resolve(&store, &alert_id, "noc-operator", None),
            Err(AlertError::InvalidTransition { .. })
        ));

        assert!(matches!(
            acknowledge(&store, "missing-id", "x"),
            Err(AlertError::NotFound { .. })
        ));
    }
}
