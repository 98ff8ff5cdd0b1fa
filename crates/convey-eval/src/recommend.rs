use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use convey_store::Store;

use crate::error::Result;
use crate::types::{
    EvalMetrics, PatternReport, RecommendationDraft, REC_CHURN_KEYWORDS, REC_CHURN_THRESHOLD,
    REC_CLASSIFICATION_FIX, REC_PIPELINE_COVERAGE,
};

/// Recall below this emits a threshold recommendation.
const MIN_RECALL: f64 = 0.5;
/// Coverage below this emits a pipeline investigation note.
const MIN_COVERAGE: f64 = 0.8;
/// Misclassification pairs need at least this many occurrences.
const MIN_FEEDBACK_ERRORS: i64 = 3;

/// Turn metrics + patterns into reviewable drafts. Nothing is applied here;
/// a human approves each one through the dashboard.
pub fn generate_recommendations(
    metrics: &EvalMetrics,
    patterns: &PatternReport,
    high_threshold: i64,
    medium_threshold: i64,
) -> Vec<RecommendationDraft> {
    let mut drafts = Vec::new();

    if metrics.recall_medium < MIN_RECALL {
        drafts.push(RecommendationDraft {
            rec_type: REC_CHURN_THRESHOLD.to_string(),
            details: json!({
                "type": REC_CHURN_THRESHOLD,
                "current_value": high_threshold,
                "recommended_value": medium_threshold,
                "reason": format!(
                    "Churn recall is only {:.1}%. Lowering the alert threshold will catch more churners.",
                    metrics.recall_medium * 100.0
                ),
                "impact": "May increase false positives but will catch more actual churners",
                "metrics": {
                    "current_recall": metrics.recall_medium,
                    "missed_churners": metrics.with_score - metrics.medium_plus_caught,
                },
            }),
        });
    }

    if !patterns.keywords.is_empty() {
        drafts.push(RecommendationDraft {
            rec_type: REC_CHURN_KEYWORDS.to_string(),
            details: json!({
                "type": REC_CHURN_KEYWORDS,
                "keywords": patterns.keywords,
                "reason": format!(
                    "Found {} keywords appearing frequently in conversations of churners we missed",
                    patterns.keywords.len()
                ),
                "keyword_counts": patterns.keyword_counts
                    .iter()
                    .map(|(k, v)| (k.clone(), *v))
                    .collect::<std::collections::BTreeMap<String, usize>>(),
                "sample_phrases": patterns.sample_phrases,
                "impact": format!(
                    "Adding these keywords may help catch {} similar churners",
                    patterns.missed_count
                ),
            }),
        });
    }

    if metrics.coverage < MIN_COVERAGE {
        drafts.push(RecommendationDraft {
            rec_type: REC_PIPELINE_COVERAGE.to_string(),
            details: json!({
                "type": REC_PIPELINE_COVERAGE,
                "current_coverage": metrics.coverage,
                "reason": format!(
                    "Only {:.1}% of churner calls were processed. {} subscribers had no churn score.",
                    metrics.coverage * 100.0,
                    metrics.without_score
                ),
                "impact": "Investigate why some calls are not reaching the analytics service",
            }),
        });
    }

    drafts
}

/// Mine the last 30 days of human classification feedback for recurring
/// misclassification pairs.
pub fn analyze_classification_feedback(store: &Store) -> Result<Option<RecommendationDraft>> {
    let since = (Utc::now() - ChronoDuration::days(30)).to_rfc3339();
    let pairs: Vec<(String, String, i64)> = store.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT ml_category, correct_category, COUNT(*) AS error_count
             FROM ml_classification_feedback
             WHERE is_correct = 0 AND created_at > ?1
             GROUP BY ml_category, correct_category
             HAVING COUNT(*) >= ?2
             ORDER BY error_count DESC",
        )?;
        let rows: Vec<(String, String, i64)> = stmt
            .query_map(rusqlite::params![since, MIN_FEEDBACK_ERRORS], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    })?;

    if pairs.is_empty() {
        return Ok(None);
    }

    let total: i64 = pairs.iter().map(|(_, _, n)| n).sum();
    let misclassifications: Vec<_> = pairs
        .iter()
        .map(|(predicted, actual, count)| {
            json!({ "predicted": predicted, "actual": actual, "count": count })
        })
        .collect();

    Ok(Some(RecommendationDraft {
        rec_type: REC_CLASSIFICATION_FIX.to_string(),
        details: json!({
            "type": REC_CLASSIFICATION_FIX,
            "misclassifications": misclassifications,
            "reason": format!("Human reviewers corrected these classifications {total} times"),
            "impact": "Consider adding keywords to differentiate these categories",
        }),
    }))
}

/// Persist drafts as PENDING rows awaiting review.
pub fn store_recommendations(store: &Store, drafts: &[RecommendationDraft]) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    for draft in drafts {
        let id = Uuid::new_v4().to_string();
        let details = serde_json::to_string(&draft.details)?;
        store.with_conn(|conn| {
            conn.execute(
                "INSERT INTO ml_recommendation (id, rec_type, details, status, created_at)
                 VALUES (?1, ?2, ?3, 'PENDING', ?4)",
                rusqlite::params![id, draft.rec_type, details, now],
            )?;
            Ok(())
        })?;
    }
    if !drafts.is_empty() {
        info!(count = drafts.len(), "recommendations stored for review");
    }
    Ok(())
}

/// Append one evaluation-history row.
pub fn store_evaluation_history(
    store: &Store,
    metrics: &EvalMetrics,
    recommendations_generated: usize,
) -> Result<()> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    let notes = serde_json::to_string(metrics)?;
    store.with_conn(|conn| {
        conn.execute(
            "INSERT INTO ml_evaluation_history
             (id, eval_date, churned_count, with_score_count, recall_rate,
              coverage_rate, avg_churn_score, recommendations_generated, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                id,
                now,
                metrics.total_churned as i64,
                metrics.with_score as i64,
                metrics.recall_medium,
                metrics.coverage,
                metrics.avg_churn_score,
                recommendations_generated as i64,
                notes,
            ],
        )?;
        Ok(())
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_eval_db;

    #[test]
    fn low_recall_recommends_threshold_drop() {
        let metrics = EvalMetrics {
            total_churned: 100,
            with_score: 80,
            without_score: 20,
            medium_plus_caught: 30,
            recall_medium: 0.375,
            coverage: 0.8,
            ..EvalMetrics::default()
        };
        let drafts = generate_recommendations(&metrics, &PatternReport::default(), 70, 40);

        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].rec_type, REC_CHURN_THRESHOLD);
        assert_eq!(drafts[0].details["recommended_value"], 40);
        assert_eq!(drafts[0].details["metrics"]["missed_churners"], 50);
    }

    #[test]
    fn healthy_metrics_recommend_nothing() {
        let metrics = EvalMetrics {
            total_churned: 100,
            with_score: 90,
            recall_medium: 0.7,
            coverage: 0.9,
            ..EvalMetrics::default()
        };
        let drafts = generate_recommendations(&metrics, &PatternReport::default(), 70, 40);
        assert!(drafts.is_empty());
    }

    #[test]
    fn keywords_and_coverage_stack() {
        let metrics = EvalMetrics {
            total_churned: 10,
            with_score: 5,
            without_score: 5,
            recall_medium: 0.8,
            coverage: 0.5,
            ..EvalMetrics::default()
        };
        let patterns = PatternReport {
            keywords: vec!["cancel".to_string()],
            keyword_counts: vec![("cancel".to_string(), 4)],
            sample_phrases: vec!["I want to cancel".to_string()],
            missed_count: 5,
        };
        let drafts = generate_recommendations(&metrics, &patterns, 70, 40);
        let kinds: Vec<&str> = drafts.iter().map(|d| d.rec_type.as_str()).collect();
        assert_eq!(kinds, vec![REC_CHURN_KEYWORDS, REC_PIPELINE_COVERAGE]);
    }

    #[test]
    fn feedback_mining_needs_three_errors() {
        let store = Store::open_in_memory().unwrap();
        store.with_conn(init_eval_db).unwrap();
        let now = Utc::now().to_rfc3339();

        for i in 0..3 {
            store
                .with_conn(|conn| {
                    conn.execute(
                        "INSERT INTO ml_classification_feedback
                         (id, source_id, ml_category, correct_category, is_correct, created_at)
                         VALUES (?1, 'C1', 'BILLING', 'OFFER', 0, ?2)",
                        rusqlite::params![format!("f{i}"), now],
                    )
                })
                .unwrap();
        }
        // pair below the bar
        store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO ml_classification_feedback
                     (id, source_id, ml_category, correct_category, is_correct, created_at)
                     VALUES ('f9', 'C2', 'NETWORK', 'ROAMING', 0, ?1)",
                    rusqlite::params![now],
                )
            })
            .unwrap();

        let draft = analyze_classification_feedback(&store).unwrap().unwrap();
        assert_eq!(draft.rec_type, REC_CLASSIFICATION_FIX);
        let pairs = draft.details["misclassifications"].as_array().unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0]["predicted"], "BILLING");
        assert_eq!(pairs[0]["count"], 3);
    }

    #[test]
    fn history_row_written() {
        let store = Store::open_in_memory().unwrap();
        store.with_conn(init_eval_db).unwrap();

        let metrics = EvalMetrics {
            total_churned: 100,
            with_score: 80,
            recall_medium: 0.375,
            coverage: 0.8,
            avg_churn_score: 31.5,
            ..EvalMetrics::default()
        };
        store_evaluation_history(&store, &metrics, 1).unwrap();

        let (churned, recall): (i64, f64) = store
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT churned_count, recall_rate FROM ml_evaluation_history",
                    [],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
            })
            .unwrap();
        assert_eq!(churned, 100);
        assert!((recall - 0.375).abs() < 1e-9);
    }
}
