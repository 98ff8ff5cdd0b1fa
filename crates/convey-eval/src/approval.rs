use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;

use convey_queue::{Notifier, ObjectStore};
use convey_store::Store;

use crate::error::{EvalError, Result};
use crate::types::{REC_CHURN_KEYWORDS, REC_CHURN_THRESHOLD};

/// Remote config artifacts mutated on approval.
pub const KEY_KEYWORDS: &str = "configs/classification-keywords.json";
pub const KEY_CLASSIFICATIONS: &str = "configs/call-classifications.json";

/// Operator surface for reviewing recommendations.
///
/// Approve and apply are deliberately separate: approving mutates the config
/// artifact, applying signals the remote service to reload it. The split
/// gives operators exact control over rollout timing.
pub struct ApprovalChannel {
    store: Store,
    objects: Arc<dyn ObjectStore>,
    notifier: Arc<dyn Notifier>,
}

impl ApprovalChannel {
    pub fn new(store: Store, objects: Arc<dyn ObjectStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            objects,
            notifier,
        }
    }

    /// Apply the recommendation's side effect to the config artifact, then
    /// transition PENDING → APPROVED. An artifact failure leaves the row
    /// PENDING so the operator can retry. Never notifies the service.
    pub async fn approve(&self, rec_id: &str, approver: &str) -> Result<String> {
        let (rec_type, details) = self.pending_recommendation(rec_id)?;

        match rec_type.as_str() {
            REC_CHURN_KEYWORDS => self.merge_keywords(&details).await?,
            REC_CHURN_THRESHOLD => self.update_threshold(&details).await?,
            // Advisory kinds (coverage, classification fixes) carry no
            // artifact mutation; approval just records the decision.
            _ => {}
        }

        let now = Utc::now().to_rfc3339();
        let changed = self.store.with_conn(|conn| {
            conn.execute(
                "UPDATE ml_recommendation
                 SET status = 'APPROVED', approved_by = ?2, approved_at = ?3
                 WHERE id = ?1 AND status = 'PENDING'",
                rusqlite::params![rec_id, approver, now],
            )
        })?;
        if changed == 0 {
            return Err(EvalError::NotFound {
                id: rec_id.to_string(),
            });
        }

        info!(rec_id = %rec_id, rec_type = %rec_type, approver = %approver, "recommendation approved");
        Ok(rec_type)
    }

    /// PENDING → REJECTED with the operator's reason.
    pub fn reject(&self, rec_id: &str, rejected_by: &str, reason: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let changed = self.store.with_conn(|conn| {
            conn.execute(
                "UPDATE ml_recommendation
                 SET status = 'REJECTED', rejected_by = ?2, rejected_at = ?3,
                     rejection_reason = ?4
                 WHERE id = ?1 AND status = 'PENDING'",
                rusqlite::params![rec_id, rejected_by, now, reason],
            )
        })?;
        if changed == 0 {
            return Err(EvalError::NotFound {
                id: rec_id.to_string(),
            });
        }
        info!(rec_id = %rec_id, rejected_by = %rejected_by, "recommendation rejected");
        Ok(())
    }

    /// Tell the remote service to reload its configs. Carries no payload and
    /// never touches the object store.
    pub async fn apply_to_service(&self, triggered_by: &str) -> Result<()> {
        let message = json!({
            "action": "reload_configs",
            "triggered_by": triggered_by,
            "timestamp": Utc::now().to_rfc3339(),
        });
        self.notifier.publish(&message).await?;
        info!(triggered_by = %triggered_by, "reload signal sent");
        Ok(())
    }

    fn pending_recommendation(&self, rec_id: &str) -> Result<(String, Value)> {
        let row: Option<(String, String)> = self.store.with_conn(|conn| {
            match conn.query_row(
                "SELECT rec_type, details FROM ml_recommendation
                 WHERE id = ?1 AND status = 'PENDING'",
                [rec_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            ) {
                Ok(r) => Ok(Some(r)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })?;
        let (rec_type, details) = row.ok_or_else(|| EvalError::NotFound {
            id: rec_id.to_string(),
        })?;
        Ok((rec_type, serde_json::from_str(&details)?))
    }

    /// Union the recommended keywords into `churn_keywords.medium`,
    /// preserving every other field of the artifact.
    async fn merge_keywords(&self, details: &Value) -> Result<()> {
        let new_keywords: BTreeSet<String> = details["keywords"]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        let mut config = self.objects.get_json(KEY_KEYWORDS).await?;
        let existing: BTreeSet<String> = config["churn_keywords"]["medium"]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        let merged: Vec<Value> = existing
            .union(&new_keywords)
            .map(|k| Value::String(k.clone()))
            .collect();

        if !config["churn_keywords"].is_object() {
            config["churn_keywords"] = json!({});
        }
        config["churn_keywords"]["medium"] = Value::Array(merged);
        self.objects.put_json(KEY_KEYWORDS, &config).await?;
        info!(added = new_keywords.len(), "churn keywords merged into artifact");
        Ok(())
    }

    /// `churn_detection.threshold` is stored as a 0..1 fraction.
    async fn update_threshold(&self, details: &Value) -> Result<()> {
        let recommended = details["recommended_value"].as_f64().unwrap_or(40.0);

        let mut config = self.objects.get_json(KEY_CLASSIFICATIONS).await?;
        if !config["churn_detection"].is_object() {
            config["churn_detection"] = json!({});
        }
        config["churn_detection"]["threshold"] = json!(recommended / 100.0);
        self.objects.put_json(KEY_CLASSIFICATIONS, &config).await?;
        info!(threshold = recommended / 100.0, "churn threshold updated in artifact");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use convey_queue::QueueError;

    use crate::db::init_eval_db;
    use crate::recommend::store_recommendations;
    use crate::types::{RecommendationDraft, REC_PIPELINE_COVERAGE};

    /// In-memory artifact store; can be switched to fail puts.
    #[derive(Default)]
    struct MockObjectStore {
        objects: Mutex<HashMap<String, Value>>,
        fail_puts: Mutex<bool>,
    }

    #[async_trait]
    impl ObjectStore for MockObjectStore {
        async fn get_json(&self, key: &str) -> convey_queue::error::Result<Value> {
            self.objects
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| QueueError::Api {
                    status: 404,
                    message: format!("no such key: {key}"),
                })
        }

        async fn put_json(&self, key: &str, value: &Value) -> convey_queue::error::Result<()> {
            if *self.fail_puts.lock().unwrap() {
                return Err(QueueError::Unavailable("scripted outage".to_string()));
            }
            self.objects
                .lock()
                .unwrap()
                .insert(key.to_string(), value.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockNotifier {
        published: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl Notifier for MockNotifier {
        async fn publish(&self, message: &Value) -> convey_queue::error::Result<()> {
            self.published.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    struct Harness {
        channel: ApprovalChannel,
        store: Store,
        objects: Arc<MockObjectStore>,
        notifier: Arc<MockNotifier>,
    }

    fn harness() -> Harness {
        let store = Store::open_in_memory().unwrap();
        store.with_conn(init_eval_db).unwrap();

        let objects = Arc::new(MockObjectStore::default());
        objects.objects.lock().unwrap().insert(
            KEY_KEYWORDS.to_string(),
            json!({
                "churn_keywords": { "medium": ["cancel"], "high": ["lawsuit"] },
                "version": 7
            }),
        );
        objects.objects.lock().unwrap().insert(
            KEY_CLASSIFICATIONS.to_string(),
            json!({
                "churn_detection": { "threshold": 0.7, "enabled": true },
                "categories": ["BILLING"]
            }),
        );

        let notifier = Arc::new(MockNotifier::default());
        let channel = ApprovalChannel::new(store.clone(), objects.clone(), notifier.clone());
        Harness {
            channel,
            store,
            objects,
            notifier,
        }
    }

    fn pending_rec(store: &Store, rec_type: &str, details: Value) -> String {
        store_recommendations(
            store,
            &[RecommendationDraft {
                rec_type: rec_type.to_string(),
                details,
            }],
        )
        .unwrap();
        store
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT id FROM ml_recommendation WHERE rec_type = ?1",
                    [rec_type],
                    |r| r.get(0),
                )
            })
            .unwrap()
    }

    #[tokio::test]
    async fn approve_threshold_mutates_artifact_without_notifying() {
        let h = harness();
        let rec_id = pending_rec(
            &h.store,
            REC_CHURN_THRESHOLD,
            json!({ "recommended_value": 40 }),
        );

        h.channel.approve(&rec_id, "ops-lead").await.unwrap();

        let artifact = h.objects.objects.lock().unwrap()[KEY_CLASSIFICATIONS].clone();
        assert_eq!(artifact["churn_detection"]["threshold"], json!(0.4));
        // untouched fields preserved
        assert_eq!(artifact["churn_detection"]["enabled"], json!(true));
        assert_eq!(artifact["categories"], json!(["BILLING"]));

        let status: String = h
            .store
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT status FROM ml_recommendation WHERE id = ?1",
                    [&rec_id],
                    |r| r.get(0),
                )
            })
            .unwrap();
        assert_eq!(status, "APPROVED");
        assert!(
            h.notifier.published.lock().unwrap().is_empty(),
            "approve must never signal the service"
        );
    }

    #[tokio::test]
    async fn approve_keywords_unions_medium_list() {
        let h = harness();
        let rec_id = pending_rec(
            &h.store,
            REC_CHURN_KEYWORDS,
            json!({ "keywords": ["expensive", "cancel"] }),
        );

        h.channel.approve(&rec_id, "ops-lead").await.unwrap();

        let artifact = h.objects.objects.lock().unwrap()[KEY_KEYWORDS].clone();
        let medium: Vec<String> = artifact["churn_keywords"]["medium"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect();
        assert_eq!(medium, vec!["cancel", "expensive"], "deduped union");
        assert_eq!(artifact["churn_keywords"]["high"], json!(["lawsuit"]));
        assert_eq!(artifact["version"], json!(7));
    }

    #[tokio::test]
    async fn artifact_failure_keeps_recommendation_pending() {
        let h = harness();
        let rec_id = pending_rec(
            &h.store,
            REC_CHURN_THRESHOLD,
            json!({ "recommended_value": 40 }),
        );
        *h.objects.fail_puts.lock().unwrap() = true;

        assert!(h.channel.approve(&rec_id, "ops-lead").await.is_err());

        let status: String = h
            .store
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT status FROM ml_recommendation WHERE id = ?1",
                    [&rec_id],
                    |r| r.get(0),
                )
            })
            .unwrap();
        assert_eq!(status, "PENDING", "operator can retry after the outage");
    }

    #[tokio::test]
    async fn apply_sends_exactly_one_notification() {
        let h = harness();
        h.channel.apply_to_service("ops-lead").await.unwrap();

        let published = h.notifier.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0]["action"], "reload_configs");
        assert_eq!(published[0]["triggered_by"], "ops-lead");
        // apply never touches artifacts
        let artifact = h.objects.objects.lock().unwrap()[KEY_CLASSIFICATIONS].clone();
        assert_eq!(artifact["churn_detection"]["threshold"], json!(0.7));
    }

    #[tokio::test]
    async fn reject_and_double_processing() {
        let h = harness();
        let rec_id = pending_rec(&h.store, REC_PIPELINE_COVERAGE, json!({}));

        h.channel.reject(&rec_id, "ops-lead", "known gap").unwrap();
        assert!(matches!(
            h.channel.reject(&rec_id, "ops-lead", "again"),
            Err(EvalError::NotFound { .. })
        ));
        assert!(matches!(
            h.channel.approve(&rec_id, "ops-lead").await,
            Err(EvalError::NotFound { .. })
        ));

        assert!(matches!(
            h.channel.approve("no-such-id", "ops-lead").await,
            Err(EvalError::NotFound { .. })
        ));
    }
}
